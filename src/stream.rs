use crate::{error::Result, types::Generation};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_util::sync::DropGuard;

/// Handle to a pipeline running in the background.
///
/// Yields one `Ok(Generation)` per completed step, in step order. A failed
/// or cancelled run yields a single trailing `Err` and then ends. The
/// sequence cannot be restarted; run the pipeline again for a fresh one.
///
/// Dropping the handle cancels the run: no further steps start.
#[derive(Debug)]
pub struct GenerationStream {
    rx: mpsc::Receiver<Result<Generation>>,
    done: bool,
    _cancel_on_drop: DropGuard,
}

impl GenerationStream {
    pub(crate) fn new(rx: mpsc::Receiver<Result<Generation>>, guard: DropGuard) -> Self {
        Self {
            rx,
            done: false,
            _cancel_on_drop: guard,
        }
    }

    /// Wait for the next generation. `None` once the run is over.
    pub async fn recv(&mut self) -> Option<Result<Generation>> {
        self.next().await
    }

    /// Drain the stream, returning the final generation or the terminal error.
    pub async fn into_last(mut self) -> Result<Option<Generation>> {
        let mut last = None;
        while let Some(item) = self.recv().await {
            last = Some(item?);
        }
        Ok(last)
    }
}

impl Stream for GenerationStream {
    type Item = Result<Generation>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Err(e))) => {
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.done = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

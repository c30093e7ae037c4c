use crate::{
    console::ConsoleObserver,
    context::RunContext,
    error::Result,
    observer::PipelineObserver,
    options::ModelOptions,
    step::{Step, StepInfo},
    stream::GenerationStream,
    types::{Generation, Prompt},
    PipelineError,
};
use async_trait::async_trait;
use std::future::{ready, Future};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::Instrument;

/// An ordered chain of steps.
///
/// Each step receives a prompt built solely from the previous step's
/// generation; the caller's prompt only reaches the first step. Steps run
/// strictly one after another in the order they were added.
///
/// A pipeline holds no per-run state. Cloning is cheap (steps are shared)
/// and independent runs may proceed concurrently.
#[derive(Clone)]
pub struct Pipeline {
    steps: Vec<Arc<dyn Step>>,
    observer: Option<Arc<dyn PipelineObserver>>,
    name: Option<String>,
    description: Option<String>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field(
                "steps",
                &self.step_infos().into_iter().map(|i| i.name).collect::<Vec<_>>(),
            )
            .field("has_observer", &self.observer.is_some())
            .finish()
    }
}

impl Pipeline {
    /// Create a new pipeline builder.
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// A pipeline over `steps` with no observer.
    pub fn new(steps: Vec<Arc<dyn Step>>) -> Self {
        Self {
            steps,
            observer: None,
            name: None,
            description: None,
        }
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Display labels for every step, in execution order.
    pub fn step_infos(&self) -> Vec<StepInfo> {
        self.steps
            .iter()
            .enumerate()
            .map(|(idx, step)| StepInfo::describe(step.as_ref(), idx))
            .collect()
    }

    /// Run every step and return the last generation.
    ///
    /// The first failing step aborts the run and its error is returned
    /// unchanged. Cancellation of `ctx` is checked before each step and
    /// reported as [`PipelineError::Cancelled`] or
    /// [`PipelineError::DeadlineExceeded`].
    ///
    /// The initial prompt must hold at least one message, and every step
    /// must produce at least one; otherwise the run fails with
    /// [`PipelineError::InvalidConfig`] or [`PipelineError::EmptyResponse`].
    ///
    /// A pipeline without steps returns `prompt` unchanged as the generation,
    /// unless `ctx` is already cancelled.
    pub async fn run(
        &self,
        ctx: &RunContext,
        prompt: Prompt,
        options: &ModelOptions,
    ) -> Result<Generation> {
        let passthrough = self.steps.is_empty().then(|| prompt.clone());
        let mut last = None;

        let span = tracing::debug_span!(
            "pipeline",
            name = self.name.as_deref(),
            steps = self.len()
        );
        self.execute(ctx, prompt, options, |generation| {
            last = Some(generation);
            ready(true)
        })
        .instrument(span)
        .await?;

        last.or_else(|| passthrough.map(Generation::from))
            .ok_or_else(|| PipelineError::Other("pipeline produced no generation".to_string()))
    }

    /// Run the pipeline in a background task, yielding each step's
    /// generation as soon as it completes.
    ///
    /// The stream ends after the last step, or after a single terminal
    /// `Err` item. At most one generation is buffered ahead of the consumer.
    /// Cancelling `ctx` or dropping the stream stops the run before its next
    /// step; a step already in flight finishes. Must be called from within
    /// a tokio runtime.
    pub fn run_stream(
        &self,
        ctx: &RunContext,
        prompt: Prompt,
        options: &ModelOptions,
    ) -> GenerationStream {
        let pipeline = self.clone();
        let ctx = ctx.child();
        let options = options.clone();
        let guard = ctx.token().clone().drop_guard();
        let (tx, rx) = mpsc::channel(1);

        let span = tracing::debug_span!(
            "pipeline_stream",
            name = self.name.as_deref(),
            steps = self.len()
        );
        tokio::spawn(
            async move {
                let outcome = pipeline
                    .execute(&ctx, prompt, &options, |generation| {
                        let tx = tx.clone();
                        async move { tx.send(Ok(generation)).await.is_ok() }
                    })
                    .await;

                if let Err(e) = outcome {
                    let _ = tx.send(Err(e)).await;
                }
            }
            .instrument(span),
        );

        GenerationStream::new(rx, guard)
    }

    /// Shared sequential driver. `hand_off` receives each generation in
    /// order and returns `false` when nobody is listening any more.
    async fn execute<F, Fut>(
        &self,
        ctx: &RunContext,
        prompt: Prompt,
        options: &ModelOptions,
        mut hand_off: F,
    ) -> Result<()>
    where
        F: FnMut(Generation) -> Fut,
        Fut: Future<Output = bool>,
    {
        options.validate()?;

        let total = self.steps.len();
        if total == 0 {
            ctx.check()?;
            self.notify(|o| o.on_start(total, &prompt));
            self.notify(|o| o.on_finish(&Generation::from(prompt)));
            return Ok(());
        }
        if prompt.is_empty() {
            return Err(PipelineError::InvalidConfig(
                "initial prompt has no messages".to_string(),
            ));
        }

        self.notify(|o| o.on_start(total, &prompt));

        let mut state = prompt;
        for (idx, step) in self.steps.iter().enumerate() {
            let info = StepInfo::describe(step.as_ref(), idx);

            if let Err(e) = ctx.check() {
                tracing::debug!(step = info.position, "run interrupted before step");
                self.notify(|o| o.on_error(&info, &e));
                return Err(e);
            }

            self.notify(|o| o.on_step_start(&info, total, &state));
            tracing::debug!(step = info.position, name = %info.name, "running step");

            let started = Instant::now();
            let generation = match step.run(ctx, &state, options).await {
                Ok(generation) => generation,
                Err(e) => {
                    self.notify(|o| o.on_error(&info, &e));
                    return Err(e);
                }
            };
            let elapsed = started.elapsed();

            if generation.messages.is_empty() {
                let e = PipelineError::EmptyResponse;
                tracing::debug!(step = info.position, "step produced no messages");
                self.notify(|o| o.on_error(&info, &e));
                return Err(e);
            }

            tracing::debug!(
                step = info.position,
                elapsed_ms = elapsed.as_millis() as u64,
                "step completed"
            );
            self.notify(|o| o.on_step_end(&info, &generation, elapsed));
            let is_last = idx + 1 == total;
            if is_last {
                self.notify(|o| o.on_finish(&generation));
            }

            state = Prompt::from(&generation);
            if !hand_off(generation).await && !is_last {
                tracing::debug!(step = info.position, "consumer dropped the stream");
                return Err(PipelineError::Cancelled);
            }
        }

        Ok(())
    }

    fn notify(&self, f: impl FnOnce(&dyn PipelineObserver)) {
        if let Some(observer) = &self.observer {
            f(observer.as_ref());
        }
    }
}

#[async_trait]
impl Step for Pipeline {
    async fn run(
        &self,
        ctx: &RunContext,
        prompt: &Prompt,
        options: &ModelOptions,
    ) -> Result<Generation> {
        Pipeline::run(self, ctx, prompt.clone(), options).await
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn instructions(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Builder for creating pipelines.
#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<Arc<dyn Step>>,
    observer: Option<Arc<dyn PipelineObserver>>,
    name: Option<String>,
    description: Option<String>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step.
    pub fn add_step<S: Step + 'static>(mut self, step: S) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Append a step that is shared with other pipelines.
    pub fn add_shared(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    /// Name reported when this pipeline is nested inside another.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Instructions reported when this pipeline is nested inside another.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_observer<O: PipelineObserver + 'static>(mut self, observer: O) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    pub fn with_shared_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Print a colored transcript of every run to stdout, or turn it off.
    pub fn verbose(mut self, enabled: bool) -> Self {
        self.observer = if enabled {
            Some(Arc::new(ConsoleObserver::stdout()))
        } else {
            None
        };
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            steps: self.steps,
            observer: self.observer,
            name: self.name,
            description: self.description,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::{map_text, StepExt};

    #[test]
    fn test_pipeline_builder() {
        let pipeline = Pipeline::builder()
            .add_step(map_text(|t| t.to_uppercase()))
            .add_step(map_text(|t| format!("{}!", t)))
            .build();
        assert_eq!(pipeline.len(), 2);
        assert!(!pipeline.is_empty());
    }

    #[test]
    fn test_empty_pipeline_is_valid() {
        let pipeline = Pipeline::builder().build();
        assert!(pipeline.is_empty());
        assert!(pipeline.step_infos().is_empty());
    }

    #[test]
    fn test_step_infos_in_order() {
        let pipeline = Pipeline::builder()
            .add_step(map_text(|t| t.to_string()).labeled("a", "first"))
            .add_step(map_text(|t| t.to_string()))
            .build();
        let infos = pipeline.step_infos();
        assert_eq!(infos[0].name, "a");
        assert_eq!(infos[0].instructions, "first");
        assert_eq!(infos[1].name, "Step 2");
    }

    #[test]
    fn test_verbose_toggles_observer() {
        let verbose = Pipeline::builder().verbose(true).build();
        assert!(verbose.observer.is_some());
        let quiet = Pipeline::builder().verbose(true).verbose(false).build();
        assert!(quiet.observer.is_none());
    }

    #[test]
    fn test_nested_pipeline_introspection() {
        let inner = Pipeline::builder()
            .with_name("refiner")
            .with_description("Polish the draft")
            .build();
        assert_eq!(Step::name(&inner), Some("refiner"));
        assert_eq!(Step::instructions(&inner), Some("Polish the draft"));
    }

    #[test]
    fn test_debug_lists_steps() {
        let pipeline = Pipeline::builder()
            .with_name("demo")
            .add_step(map_text(|t| t.to_string()).labeled("only", "x"))
            .build();
        let dbg = format!("{:?}", pipeline);
        assert!(dbg.contains("demo"));
        assert!(dbg.contains("only"));
    }

    #[tokio::test]
    async fn test_invalid_options_rejected_before_any_step() {
        let pipeline = Pipeline::builder()
            .add_step(map_text(|t| t.to_string()))
            .build();
        let result = pipeline
            .run(
                &RunContext::new(),
                Prompt::from_text("hi"),
                &ModelOptions::new().with_temperature(9.0),
            )
            .await;
        match result {
            Err(PipelineError::InvalidConfig(msg)) => assert!(msg.contains("temperature")),
            _ => panic!("Expected InvalidConfig error"),
        }
    }

    #[tokio::test]
    async fn test_empty_pipeline_honors_cancelled_context() {
        let pipeline = Pipeline::builder().build();
        let ctx = RunContext::new();
        ctx.cancel();

        let result = pipeline
            .run(&ctx, Prompt::from_text("x"), &ModelOptions::default())
            .await;
        assert!(matches!(result, Err(PipelineError::Cancelled)));

        let mut stream =
            pipeline.run_stream(&ctx, Prompt::from_text("x"), &ModelOptions::default());
        assert!(matches!(stream.recv().await, Some(Err(PipelineError::Cancelled))));
        assert!(stream.recv().await.is_none());
    }
}

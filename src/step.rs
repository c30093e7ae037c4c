use crate::{
    context::RunContext,
    error::Result,
    options::ModelOptions,
    types::{Generation, Prompt},
};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

pub const DEFAULT_INSTRUCTIONS: &str = "Executing task...";

/// A unit of work that advances a conversation.
///
/// Implementations are typically a single model call ([`Agent`](crate::Agent)),
/// but a [`Pipeline`](crate::Pipeline) is a step too, so pipelines nest.
/// Steps may be invoked concurrently from independent runs and must not
/// keep per-run state.
#[async_trait]
pub trait Step: Send + Sync {
    /// Produce the next conversation state from `prompt`.
    async fn run(
        &self,
        ctx: &RunContext,
        prompt: &Prompt,
        options: &ModelOptions,
    ) -> Result<Generation>;

    /// Optional display name.
    fn name(&self) -> Option<&str> {
        None
    }

    /// Optional human-readable description of what the step does.
    fn instructions(&self) -> Option<&str> {
        None
    }
}

#[async_trait]
impl<T: Step + ?Sized> Step for Arc<T> {
    async fn run(
        &self,
        ctx: &RunContext,
        prompt: &Prompt,
        options: &ModelOptions,
    ) -> Result<Generation> {
        (**self).run(ctx, prompt, options).await
    }

    fn name(&self) -> Option<&str> {
        (**self).name()
    }

    fn instructions(&self) -> Option<&str> {
        (**self).instructions()
    }
}

/// Display label for a step, with positional fallbacks filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInfo {
    /// 1-based position within the pipeline.
    pub position: usize,
    pub name: String,
    pub instructions: String,
}

impl StepInfo {
    /// Describe the step at 0-based `index`.
    pub fn describe(step: &dyn Step, index: usize) -> Self {
        let position = index + 1;
        let name = step
            .name()
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Step {}", position));
        let instructions = step
            .instructions()
            .filter(|i| !i.is_empty())
            .unwrap_or(DEFAULT_INSTRUCTIONS)
            .to_string();
        Self {
            position,
            name,
            instructions,
        }
    }
}

/// Step backed by an async closure over the incoming prompt.
pub struct FnStep<F> {
    f: F,
}

/// Wrap an async closure as a [`Step`].
///
/// ```
/// use llm_chain::{step_fn, Generation, Prompt};
///
/// let echo = step_fn(|prompt: Prompt| async move {
///     Ok(Generation::from_text(prompt.latest_text()))
/// });
/// # let _ = echo;
/// ```
pub fn step_fn<F, Fut>(f: F) -> FnStep<F>
where
    F: Fn(Prompt) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Generation>> + Send,
{
    FnStep { f }
}

#[async_trait]
impl<F, Fut> Step for FnStep<F>
where
    F: Fn(Prompt) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Generation>> + Send,
{
    async fn run(
        &self,
        _ctx: &RunContext,
        prompt: &Prompt,
        _options: &ModelOptions,
    ) -> Result<Generation> {
        (self.f)(prompt.clone()).await
    }
}

/// Step that rewrites the newest message's text into an assistant reply.
pub struct MapText<F> {
    f: F,
}

pub fn map_text<F>(f: F) -> MapText<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    MapText { f }
}

#[async_trait]
impl<F> Step for MapText<F>
where
    F: Fn(&str) -> String + Send + Sync,
{
    async fn run(
        &self,
        _ctx: &RunContext,
        prompt: &Prompt,
        _options: &ModelOptions,
    ) -> Result<Generation> {
        Ok(Generation::from_text((self.f)(&prompt.latest_text())))
    }
}

/// Any step with an explicit display name and instructions.
pub struct Labeled<S> {
    inner: S,
    name: String,
    instructions: String,
}

impl<S> Labeled<S> {
    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S: Step> Step for Labeled<S> {
    async fn run(
        &self,
        ctx: &RunContext,
        prompt: &Prompt,
        options: &ModelOptions,
    ) -> Result<Generation> {
        self.inner.run(ctx, prompt, options).await
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }

    fn instructions(&self) -> Option<&str> {
        Some(&self.instructions)
    }
}

pub trait StepExt: Step + Sized {
    /// Attach a display name and instructions, overriding the step's own.
    fn labeled(self, name: impl Into<String>, instructions: impl Into<String>) -> Labeled<Self> {
        Labeled {
            inner: self,
            name: name.into(),
            instructions: instructions.into(),
        }
    }
}

impl<S: Step> StepExt for S {}

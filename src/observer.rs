use crate::{
    error::PipelineError,
    step::StepInfo,
    types::{Generation, Prompt},
};
use std::time::Duration;

/// Receives progress notifications from a running pipeline.
///
/// Observers only see borrowed data and cannot influence execution.
/// All methods default to no-ops, so implement just the ones you need.
pub trait PipelineObserver: Send + Sync {
    /// Called once before the first step with the total step count.
    fn on_start(&self, _total_steps: usize, _input: &Prompt) {}

    /// Called right before a step is invoked.
    fn on_step_start(&self, _info: &StepInfo, _total_steps: usize, _input: &Prompt) {}

    /// Called after a step succeeds.
    fn on_step_end(&self, _info: &StepInfo, _output: &Generation, _elapsed: Duration) {}

    /// Called when the run stops on an error or cancellation. `info`
    /// describes the step that failed or was about to start.
    fn on_error(&self, _info: &StepInfo, _error: &PipelineError) {}

    /// Called once with the final result after the last step.
    fn on_finish(&self, _result: &Generation) {}
}

/// Reports pipeline progress through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn on_start(&self, total_steps: usize, _input: &Prompt) {
        tracing::info!(total_steps, "pipeline started");
    }

    fn on_step_start(&self, info: &StepInfo, total_steps: usize, _input: &Prompt) {
        tracing::info!(
            step = info.position,
            total_steps,
            name = %info.name,
            "step started"
        );
    }

    fn on_step_end(&self, info: &StepInfo, output: &Generation, elapsed: Duration) {
        tracing::info!(
            step = info.position,
            name = %info.name,
            elapsed_ms = elapsed.as_millis() as u64,
            output_chars = output.text().chars().count(),
            "step finished"
        );
    }

    fn on_error(&self, info: &StepInfo, error: &PipelineError) {
        if error.is_cancellation() {
            tracing::warn!(step = info.position, name = %info.name, "pipeline stopped: {}", error);
        } else {
            tracing::warn!(step = info.position, name = %info.name, "step failed: {}", error);
        }
    }

    fn on_finish(&self, result: &Generation) {
        tracing::info!(messages = result.messages.len(), "pipeline finished");
    }
}

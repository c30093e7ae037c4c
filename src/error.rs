use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Provider returned an empty response")]
    EmptyResponse,

    #[error("Pipeline was cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// True when the run was abandoned by the caller rather than failed by a step.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, PipelineError::Cancelled | PipelineError::DeadlineExceeded)
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_classification() {
        assert!(PipelineError::Cancelled.is_cancellation());
        assert!(PipelineError::DeadlineExceeded.is_cancellation());
        assert!(!PipelineError::Provider("boom".into()).is_cancellation());
        assert!(!PipelineError::EmptyResponse.is_cancellation());
    }

    #[test]
    fn test_from_anyhow() {
        let err: PipelineError = anyhow::anyhow!("something broke").into();
        match err {
            PipelineError::Other(msg) => assert_eq!(msg, "something broke"),
            _ => panic!("Expected Other error"),
        }
    }
}

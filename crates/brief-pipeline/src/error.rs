use brief_generator::GeneratorError;
use brief_publisher::PublisherError;
use brief_signals::SignalsError;
use brief_store::StoreError;
use brief_types::WebhookError;
use thiserror::Error;

/// Pipeline error taxonomy.
///
/// `Cancelled` short-circuits to the cancel path and is not an error at
/// the API boundary; everything else short-circuits to the failure path,
/// which persists a COALESCE-merged snapshot of the blackboard.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("pipeline cancelled")]
    Cancelled,
    #[error("external error: {0}")]
    External(String),
    #[error("store error: {0}")]
    Store(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    /// Whether the failure path should treat this as a step timeout in
    /// the audit log.
    pub fn is_timeout(&self) -> bool {
        matches!(self, PipelineError::Timeout(_))
    }
}

impl From<WebhookError> for PipelineError {
    fn from(err: WebhookError) -> Self {
        PipelineError::Validation(err.to_string())
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::Store(err.to_string())
    }
}

impl From<SignalsError> for PipelineError {
    fn from(err: SignalsError) -> Self {
        match err {
            SignalsError::Timeout { .. } => PipelineError::Timeout(err.to_string()),
            other => PipelineError::External(other.to_string()),
        }
    }
}

impl From<GeneratorError> for PipelineError {
    fn from(err: GeneratorError) -> Self {
        match err {
            GeneratorError::Cancelled => PipelineError::Cancelled,
            GeneratorError::Timeout { .. } => PipelineError::Timeout(err.to_string()),
            other => PipelineError::External(other.to_string()),
        }
    }
}

impl From<PublisherError> for PipelineError {
    fn from(err: PublisherError) -> Self {
        PipelineError::External(err.to_string())
    }
}

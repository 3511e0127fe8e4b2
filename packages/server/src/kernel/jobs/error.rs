use thiserror::Error;

/// How a handler run ended, from the queue's point of view.
#[derive(Debug, Error)]
pub enum JobError {
    /// Redeliver after backoff if attempts remain
    #[error("retryable failure: {0}")]
    Retryable(String),

    /// Never redeliver
    #[error("fatal failure: {0}")]
    Fatal(String),

    /// Stopped by shutdown; return the job without consuming an attempt
    #[error("interrupted by shutdown")]
    Interrupted,
}

pub type JobResult = Result<(), JobError>;

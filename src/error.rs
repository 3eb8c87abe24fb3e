use thiserror::Error;

/// Error-kind taxonomy for the pipeline's upstream data sources (feeds,
/// weather, holidays, market data, AI commentary). Call sites match on the
/// variant, not the message, to decide retry vs. give-up-and-placeholder.
/// Transport (Telegram) errors have their own taxonomy, `TransportErrorKind`,
/// since they're classified from a different error shape and drive a
/// different state machine (retry/backoff/deactivate in the Scheduler)
/// than a data source's retry-then-placeholder.
#[derive(Debug, Error)]
pub enum DigestError {
    #[error("upstream transient failure: {0}")]
    UpstreamTransient(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl DigestError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DigestError::UpstreamTransient(_))
    }
}

pub type Result<T> = std::result::Result<T, DigestError>;

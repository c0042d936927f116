use thiserror::Error;

/// A single attempt against the hosted completion service failed.
///
/// Every variant is terminal for the request that produced it: there is no
/// retry or backoff anywhere in the stack. One-shot features recover by
/// substituting a fixed apology string; interview turns surface the error
/// and leave session state untouched so the same turn can be resubmitted.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion transport failed: {0}")]
    Network(String),

    #[error("completion service rate limited the request")]
    RateLimited,

    #[error("completion service returned status {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("completion response carried no usable content")]
    MalformedResponse,

    #[error("no completion provider registered for '{0}'")]
    UnknownProvider(String),

    #[error("API key not configured for {0}")]
    MissingApiKey(&'static str),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("no insights remaining; top up or upgrade to premium")]
    QuotaExhausted,

    #[error("no interview in progress for this user")]
    SessionStateMissing,

    #[error("unknown MBTI type code '{0}'")]
    UnknownType(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

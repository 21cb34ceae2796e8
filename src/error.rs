use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Structured discriminant for callers and operators. Message strings are
/// informational only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DependencyUnavailable,
    DependencyRejected,
    CircuitOpen,
    TooManyRequests,
    Persistence,
    Publish,
    NotFound,
    Cancelled,
    DeadlineExceeded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("request cancelled")]
    Cancelled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl Interrupted {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Interrupted::Cancelled => ErrorKind::Cancelled,
            Interrupted::DeadlineExceeded => ErrorKind::DeadlineExceeded,
        }
    }
}

/// Failure of a call to a downstream HTTP dependency.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{service} is temporarily unavailable: circuit breaker is open")]
    CircuitOpen { service: &'static str },

    #[error("{service} is recovering, please retry: too many requests while half-open")]
    TooManyRequests { service: &'static str },

    #[error("{service} request failed: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },

    #[error("{service} returned status {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("{service} returned an unreadable response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl ClientError {
    /// Network failures, timeouts, 5xx and 429 are worth another attempt.
    /// Breaker rejections are not; the retry loop fails fast on them.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { .. } => true,
            ClientError::Status { status, .. } => is_retryable_status(*status),
            ClientError::CircuitOpen { .. }
            | ClientError::TooManyRequests { .. }
            | ClientError::Decode { .. }
            | ClientError::Interrupted(_) => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ClientError::TooManyRequests { .. } => ErrorKind::TooManyRequests,
            ClientError::Transport { .. } => ErrorKind::DependencyUnavailable,
            ClientError::Status { status, .. } if is_retryable_status(*status) => {
                ErrorKind::DependencyUnavailable
            }
            ClientError::Status { .. } | ClientError::Decode { .. } => {
                ErrorKind::DependencyRejected
            }
            ClientError::Interrupted(interrupted) => interrupted.kind(),
        }
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 429
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("notification not found: {0}")]
    NotFound(Uuid),

    #[error("invalid notification row: {0}")]
    InvalidRow(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("broker did not confirm message on '{routing_key}'")]
    Nacked { routing_key: String },

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl PublishError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PublishError::Broker(_) | PublishError::Nacked { .. } | PublishError::Unavailable(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Failure that leaves the outcome of a request undetermined. Business-rule
/// outcomes (skipped, failed preference checks) are never reported this way.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("failed to get user preferences: {0}")]
    Preferences(#[source] ClientError),

    #[error("failed to render template: {0}")]
    Render(#[source] ClientError),

    #[error("failed to persist notification during {stage}: {source}")]
    Persistence {
        stage: &'static str,
        notification_id: Option<Uuid>,
        #[source]
        source: StoreError,
    },

    #[error("failed to queue notification {notification_id}: {source}")]
    Publish {
        notification_id: Uuid,
        #[source]
        source: PublishError,
    },

    #[error("notification not found: {0}")]
    NotFound(Uuid),

    #[error(transparent)]
    Interrupted(#[from] Interrupted),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Preferences(err) | PipelineError::Render(err) => err.kind(),
            PipelineError::Persistence { .. } => ErrorKind::Persistence,
            PipelineError::Publish { .. } => ErrorKind::Publish,
            PipelineError::NotFound(_) => ErrorKind::NotFound,
            PipelineError::Interrupted(interrupted) => interrupted.kind(),
        }
    }
}

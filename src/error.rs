//! Shared error kinds, per spec.md §7: transient transport, rate-limited,
//! schema, semantic, internal, config.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SurveilError {
    #[error("transport error calling {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("rate limited by {endpoint}, retry after backoff")]
    RateLimited { endpoint: String },

    #[error("schema error decoding {what}: {reason}")]
    Schema { what: String, reason: String },

    #[error("semantic error: {0}")]
    Semantic(String),

    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("missing configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SurveilError>;

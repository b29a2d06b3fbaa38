//! Crate-wide error types.

pub type Result<T> = anyhow::Result<T>;

/// Errors raised while forwarding a request through a credentialed upstream call.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("no credential available for this call")]
    NoCredential,

    #[error("upstream returned HTTP {0}")]
    UpstreamStatus(u16),

    #[error("upstream returned a malformed response: {0}")]
    MalformedResponse(String),

    #[error("upstream request timed out or was unreachable")]
    Transient(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProxyError {
    /// Whether the pool had no eligible credential left to try this call with.
    pub fn is_no_credential(&self) -> bool {
        matches!(self, ProxyError::NoCredential)
    }
}

impl From<PoolError> for ProxyError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Exhausted(_) => ProxyError::NoCredential,
            other => ProxyError::Other(other.into()),
        }
    }
}

/// Errors raised while selecting or updating a credential in the pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("no credential available for search type {0:?}")]
    Exhausted(crate::models::SearchType),

    #[error("credential {0} not found")]
    NotFound(i32),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

//! Object store errors

use thiserror::Error;

/// Errors that can occur when reading or writing objects in the store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object already exists (create raced with another writer)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic-concurrency failure: the object changed since it was read
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The API server could not be reached or is overloaded
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The controller is not allowed to perform the operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Any other Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Whether retrying the same write may succeed without any spec change.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::AlreadyExists(_) | StoreError::Conflict(_) | StoreError::Unavailable(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

impl From<kube::Error> for StoreError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                404 => StoreError::NotFound(resp.message.clone()),
                409 if resp.reason == "AlreadyExists" => StoreError::AlreadyExists(resp.message.clone()),
                409 => StoreError::Conflict(resp.message.clone()),
                401 | 403 => StoreError::Forbidden(resp.message.clone()),
                429 | 500..=599 => StoreError::Unavailable(resp.message.clone()),
                _ => StoreError::Kube(kube::Error::Api(resp)),
            },
            kube::Error::HyperError(e) => StoreError::Unavailable(e.to_string()),
            kube::Error::Service(e) => StoreError::Unavailable(e.to_string()),
            other => StoreError::Kube(other),
        }
    }
}

use super::BackendError;

#[derive(thiserror::Error, Debug)]
pub enum BlobError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    ConfigMissing(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: BackendError,
    },
    #[error("{0} timed out after {1:?}")]
    Timeout(String, std::time::Duration),
}

impl BlobError {
    /// Wrap a backend failure with the operation it happened in. Missing
    /// buckets, keys and versions become [`BlobError::NotFound`].
    pub fn backend(context: impl Into<String>, source: BackendError) -> Self {
        let context = context.into();
        match source {
            e if e.is_not_found() => BlobError::NotFound(format!("{}: {}", context, e)),
            e @ BackendError::InvalidBucketName(_) => {
                BlobError::Validation(format!("{}: {}", context, e))
            }
            BackendError::Unavailable(reason) => {
                BlobError::StorageUnavailable(format!("{}: {}", context, reason))
            }
            source => BlobError::Storage { context, source },
        }
    }

    /// Caller supplied something unusable; retrying will not help.
    pub fn is_client_error(&self) -> bool {
        matches!(self, BlobError::Validation(_) | BlobError::InvalidArgument(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, BlobError::NotFound(_))
    }
}

use nimbus_transport::BusError;

use crate::{blob::BlobError, config::ConfigError};

#[derive(thiserror::Error, Debug)]
pub enum NimbusError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("transport error: {0}")]
    Bus(#[from] BusError),
    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),
    #[error("failed to subscribe to '{subject}': {source}")]
    Subscribe {
        subject: String,
        #[source]
        source: BusError,
    },
    #[error("failed to bootstrap bucket '{bucket}': {source}")]
    Bootstrap {
        bucket: String,
        #[source]
        source: BlobError,
    },
    #[error("health server error: {0}")]
    Health(#[from] std::io::Error),
    #[error("distributed mode is not supported yet")]
    Unsupported,
    #[error("tracing setup error: {0}")]
    Tracing(String),
}

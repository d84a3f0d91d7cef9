//! Per-shard request dispatch.
//!
//! Every owned shard gets a subscription on `{prefix}.shards.{id}.op`, a
//! bounded queue and exactly one worker, so requests for a shard run one
//! at a time in arrival order.

mod dispatcher;
pub mod headers;
pub mod response;

pub use dispatcher::{ShardHandler, ShardOperationHandler, start_shard_handlers};
pub use headers::{HeaderError, ShardOperationHeaders};
pub use response::{DbResponse, ShardReply, ShardsResponse};

pub const TYPE_HEADER: &str = "type";
pub const FILE_NAME_HEADER: &str = "fileName";
pub const BUCKET_NAME_HEADER: &str = "bucketName";
pub const OVERWRITE_HEADER: &str = "overwrite";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    PointWrite,
    PointRead,
    CollectionWrite,
    CollectionRead,
    Unknown(i64),
}

impl From<i64> for OperationKind {
    fn from(code: i64) -> Self {
        match code {
            0 => OperationKind::PointWrite,
            1 => OperationKind::PointRead,
            2 => OperationKind::CollectionWrite,
            3 => OperationKind::CollectionRead,
            other => OperationKind::Unknown(other),
        }
    }
}

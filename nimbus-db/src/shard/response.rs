use bytes::Bytes;
use serde::{Deserialize, Serialize};

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

/// Status envelope returned for everything except a successful read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbResponse {
    pub error: String,
    pub status: u16,
}

impl DbResponse {
    pub fn ok() -> Self {
        Self {
            error: String::new(),
            status: STATUS_OK,
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status: STATUS_BAD_REQUEST,
        }
    }

    pub fn internal(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status: STATUS_INTERNAL_ERROR,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        // infallible for this shape
        Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardsResponse {
    #[serde(rename = "shardCount")]
    pub shard_count: u16,
}

/// What a shard worker sends back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardReply {
    Status(DbResponse),
    /// Raw object bytes of a successful point read.
    Data(Bytes),
}

impl ShardReply {
    pub fn status(&self) -> u16 {
        match self {
            ShardReply::Status(resp) => resp.status,
            ShardReply::Data(_) => STATUS_OK,
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self {
            ShardReply::Status(resp) => resp.to_bytes(),
            ShardReply::Data(data) => data,
        }
    }
}

impl From<DbResponse> for ShardReply {
    fn from(resp: DbResponse) -> Self {
        ShardReply::Status(resp)
    }
}

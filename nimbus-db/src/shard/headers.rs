use nimbus_transport::Headers;

use super::{BUCKET_NAME_HEADER, FILE_NAME_HEADER, OVERWRITE_HEADER, OperationKind, TYPE_HEADER};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HeaderError {
    #[error("missing 'type' header")]
    MissingType,
    #[error("invalid 'type' header: {0}")]
    InvalidType(String),
    #[error("missing 'fileName' header")]
    MissingFileName,
    #[error("missing 'bucketName' header")]
    MissingBucketName,
    #[error("invalid 'overwrite' header: {0}")]
    InvalidOverwrite(String),
}

/// Validated routing headers of a shard operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardOperationHeaders {
    pub operation: OperationKind,
    pub file_name: String,
    pub bucket_name: String,
    pub overwrite: bool,
}

impl ShardOperationHeaders {
    pub fn extract(headers: &Headers) -> Result<Self, HeaderError> {
        let raw_type = non_empty(headers, TYPE_HEADER).ok_or(HeaderError::MissingType)?;
        let code = raw_type
            .parse::<i64>()
            .map_err(|_| HeaderError::InvalidType(raw_type.to_string()))?;
        let file_name =
            non_empty(headers, FILE_NAME_HEADER).ok_or(HeaderError::MissingFileName)?;
        let bucket_name =
            non_empty(headers, BUCKET_NAME_HEADER).ok_or(HeaderError::MissingBucketName)?;
        let overwrite = match non_empty(headers, OVERWRITE_HEADER) {
            Some(raw) => parse_bool(raw)
                .ok_or_else(|| HeaderError::InvalidOverwrite(raw.to_string()))?,
            None => true,
        };
        Ok(Self {
            operation: OperationKind::from(code),
            file_name: file_name.to_string(),
            bucket_name: bucket_name.to_string(),
            overwrite,
        })
    }
}

fn non_empty<'a>(headers: &'a Headers, key: &str) -> Option<&'a str> {
    headers.get(key).filter(|v| !v.is_empty())
}

/// Same spellings as Go's `strconv.ParseBool`.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

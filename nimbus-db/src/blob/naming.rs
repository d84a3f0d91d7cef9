use super::BlobError;

pub const MIN_BUCKET_NAME_LEN: usize = 3;
pub const MAX_BUCKET_NAME_LEN: usize = 63;

/// S3-style bucket naming: 3 to 63 characters of lowercase letters,
/// digits, dots and hyphens, starting and ending with a letter or digit,
/// without consecutive dots.
pub fn validate_bucket_name(name: &str) -> Result<(), BlobError> {
    if name.is_empty() {
        return Err(BlobError::InvalidArgument("bucket name cannot be empty".into()));
    }
    if !(MIN_BUCKET_NAME_LEN..=MAX_BUCKET_NAME_LEN).contains(&name.len()) {
        return Err(BlobError::Validation(format!(
            "bucket name must be between {} and {} characters, got length {}",
            MIN_BUCKET_NAME_LEN,
            MAX_BUCKET_NAME_LEN,
            name.len()
        )));
    }
    let edge_ok = |c: u8| c.is_ascii_lowercase() || c.is_ascii_digit();
    let bytes = name.as_bytes();
    let body_ok = bytes
        .iter()
        .all(|&c| edge_ok(c) || c == b'.' || c == b'-');
    if !body_ok || !edge_ok(bytes[0]) || !edge_ok(bytes[bytes.len() - 1]) {
        return Err(BlobError::Validation(format!(
            "bucket name contains invalid characters or format: {}",
            name
        )));
    }
    if name.contains("..") {
        return Err(BlobError::Validation(format!(
            "bucket name cannot contain consecutive dots: {}",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::validate_bucket_name;
    use crate::blob::BlobError;

    #[test]
    fn accepts_regular_names() {
        for name in ["valid-bucket1", "gk-test", "abc", "a.b.c", "0-9"] {
            assert!(validate_bucket_name(name).is_ok(), "{}", name);
        }
        assert!(validate_bucket_name(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn rejects_malformed_names() {
        for name in [
            "ab",
            "a..b",
            "-abc",
            "abc-",
            "Abc",
            "ab_c",
            "abc.",
            &"a".repeat(64),
        ] {
            assert!(
                matches!(validate_bucket_name(name), Err(BlobError::Validation(_))),
                "{}",
                name
            );
        }
        assert!(matches!(
            validate_bucket_name(""),
            Err(BlobError::InvalidArgument(_))
        ));
    }
}

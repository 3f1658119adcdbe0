//! Bucket and object naming rules.

/// Maximum object key length in bytes.
pub const MAX_OBJECT_NAME_LEN: usize = 1024;

/// Validate a bucket name: 3-63 chars of lowercase letters, digits, `-` and
/// `.`, starting and ending with a letter or digit.
pub fn validate_bucket_name(name: &str) -> crate::Result<()> {
    let err = |reason: &str| Err(crate::Error::InvalidBucketName(format!("{name:?}: {reason}")));

    if !(3..=63).contains(&name.len()) {
        return err("must be 3 to 63 characters");
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.')
    {
        return err("only lowercase letters, digits, '-' and '.' are allowed");
    }
    let first = name.as_bytes()[0];
    let last = name.as_bytes()[name.len() - 1];
    if !first.is_ascii_alphanumeric() || !last.is_ascii_alphanumeric() {
        return err("must start and end with a letter or digit");
    }
    if name.contains("..") {
        return err("must not contain consecutive dots");
    }
    Ok(())
}

/// Validate an object key as a relative, slash-separated path.
pub fn validate_object_name(name: &str) -> crate::Result<()> {
    let err = |reason: &str| Err(crate::Error::InvalidObjectName(format!("{name:?}: {reason}")));

    if name.is_empty() {
        return err("must not be empty");
    }
    if name.len() > MAX_OBJECT_NAME_LEN {
        return err("too long");
    }
    if name.starts_with('/') {
        return err("must be relative");
    }
    if name.chars().any(|c| c.is_control() || c == '\\') {
        return err("contains a control character or backslash");
    }
    for component in name.split('/') {
        match component {
            "" => return err("contains an empty path component"),
            "." | ".." => return err("contains a relative path component"),
            _ => {}
        }
    }
    Ok(())
}

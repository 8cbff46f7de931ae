//! Key validation.
//!
//! Keys are `/`-separated segments. The file-tree backend maps them straight
//! onto paths, so every backend enforces the same rules to keep the observable
//! semantics identical: a key that one backend accepts must be accepted by all
//! of them.

use crate::error::{ErrorKind, Result};

const SEPARATOR: char = '/';

fn forbidden(s: &str) -> bool {
    // Null bytes pass through Path::components() on Unix but cause
    // truncation in C-based syscalls. Backslashes are separators on Windows.
    s.contains('\0') || s.contains('\\') || s.starts_with(SEPARATOR)
}

fn bad_segment(segment: &str) -> bool {
    matches!(segment, "" | "." | "..")
}

/// Validates a storage key.
///
/// Keys are **not** normalized: `a//b` and `a/./b` are rejected instead of
/// being resolved, so two different strings can never alias the same stored
/// value.
///
/// # Examples
///
/// ```
/// use reel_storage::validate_key;
/// assert!(validate_key("u/alice/play/siteA+12345").is_ok());
/// assert!(validate_key("admin/config").is_ok());
/// assert!(validate_key("../etc/passwd").is_err());
/// assert!(validate_key("a//b").is_err());
/// assert!(validate_key("a/").is_err());
/// assert!(validate_key("").is_err());
/// ```
pub fn validate(key: &str) -> Result<&str> {
    if key.is_empty() || forbidden(key) || key.split(SEPARATOR).any(bad_segment) {
        exn::bail!(ErrorKind::InvalidKey(key.to_string()));
    }
    Ok(key)
}

/// Validates a listing prefix.
///
/// A prefix is a plain string prefix, not a key: it may be empty (everything)
/// and its last segment may be partial (`u/al` matches `u/alice/...`). Only the
/// complete segments before the last separator are checked.
pub fn validate_prefix(prefix: &str) -> Result<&str> {
    if forbidden(prefix) {
        exn::bail!(ErrorKind::InvalidKey(prefix.to_string()));
    }
    if let Some((complete, _partial)) = prefix.rsplit_once(SEPARATOR)
        && complete.split(SEPARATOR).any(bad_segment)
    {
        exn::bail!(ErrorKind::InvalidKey(prefix.to_string()));
    }
    Ok(prefix)
}

/// Directory part of a prefix (everything up to the last separator), used by
/// hierarchical backends to decide where to start walking.
pub(crate) fn prefix_dir(prefix: &str) -> Option<&str> {
    prefix.rsplit_once(SEPARATOR).map(|(dir, _)| dir).filter(|dir| !dir.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("simple")]
    #[case("u/alice/play/siteA+12345")]
    #[case("cache/videos/abc_123")]
    #[case("a/.hidden")]
    #[case("users/bob:smith")]
    fn test_valid_keys(#[case] key: &str) {
        assert_eq!(validate(key).unwrap(), key);
    }

    #[rstest]
    #[case("")]
    #[case("/absolute")]
    #[case("../etc/passwd")]
    #[case("a/../../b")]
    #[case("a/./b")]
    #[case("a//b")]
    #[case("trailing/")]
    #[case("..")]
    #[case("a\0b")]
    #[case("a\\b")]
    fn test_invalid_keys(#[case] key: &str) {
        let err = validate(key).unwrap_err();
        assert!(matches!(&*err, ErrorKind::InvalidKey(k) if k == key));
    }

    #[rstest]
    #[case("")]
    #[case("u/")]
    #[case("u/al")]
    #[case("cache/videos/")]
    fn test_valid_prefixes(#[case] prefix: &str) {
        assert!(validate_prefix(prefix).is_ok());
    }

    #[rstest]
    #[case("/u")]
    #[case("../u/")]
    #[case("u//alice")]
    #[case("a\0")]
    fn test_invalid_prefixes(#[case] prefix: &str) {
        assert!(validate_prefix(prefix).is_err());
    }

    #[test]
    fn test_prefix_dir() {
        assert_eq!(prefix_dir(""), None);
        assert_eq!(prefix_dir("users"), None);
        assert_eq!(prefix_dir("u/alice/"), Some("u/alice"));
        assert_eq!(prefix_dir("u/alice/pl"), Some("u/alice"));
    }
}

//! Cache key scheme.

/// Directory under which the persistent tier stores its entries.
const PERSISTENT_ROOT: &str = "cache";

/// Key of an entry in the volatile tier: `{category}:{key}`.
pub fn cache_key(category: &str, key: &str) -> String {
    format!("{category}:{key}")
}

/// Reduce a string to `[A-Za-z0-9_-]`, replacing everything else with `_`.
///
/// Distinct inputs can collide (`a.b` and `a_b`), so the result is only a
/// safe storage key segment, not an identity: every persistent entry records
/// its unsanitized owner (see [`CacheEntry`](crate::CacheEntry)). An empty
/// input becomes `_` so that the segment is never empty.
pub fn sanitize(raw: &str) -> String {
    if raw.is_empty() {
        return "_".to_string();
    }
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

/// Storage key of an entry in the persistent tier: `cache/{category}/{key}`.
pub fn persistent_key(category: &str, key: &str) -> String {
    format!("{PERSISTENT_ROOT}/{}/{}", sanitize(category), sanitize(key))
}

/// Listing prefix covering one category of the persistent tier.
pub(crate) fn persistent_category_prefix(category: &str) -> String {
    format!("{PERSISTENT_ROOT}/{}/", sanitize(category))
}

/// Listing prefix covering the whole persistent tier.
pub(crate) fn persistent_prefix() -> String {
    format!("{PERSISTENT_ROOT}/")
}

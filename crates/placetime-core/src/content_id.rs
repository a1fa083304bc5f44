//! Content-addressed item identifiers.

/// Derive an item id from a feed-native identifier.
///
/// The id is the lowercase hex MD5 digest of the native id, so re-ingesting
/// the same feed entry always lands on the same item.
pub fn content_id(native_id: &str) -> String {
    format!("{:x}", md5::compute(native_id.as_bytes()))
}

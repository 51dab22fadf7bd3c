//! Address cleanup before querying providers.
//!
//! Addresses arrive as free-form text. Before a provider sees one it is
//! trimmed, internal whitespace is collapsed to single spaces, and it is
//! truncated to a maximum number of characters (public geocoders reject
//! or mis-handle very long queries). The raw text is never modified;
//! output rows always carry the address exactly as it was read.

/// Default maximum query length, in characters.
pub const MAX_QUERY_LEN: usize = 75;

/// Builds the query string sent to providers for `raw`.
///
/// Truncation counts characters, not bytes, so multi-byte text is never
/// split inside a code point. Returns an empty string for blank input.
#[must_use]
pub fn prepare_query(raw: &str, max_len: usize) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");

    if max_len == 0 || collapsed.chars().count() <= max_len {
        return collapsed;
    }

    collapsed
        .chars()
        .take(max_len)
        .collect::<String>()
        .trim_end()
        .to_string()
}

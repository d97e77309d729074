//! Correction of `Location` headers mangled by an intermediary proxy.
//!
//! The upload endpoint sits behind a reverse proxy that rewrites the host and
//! path prefix of the session URL it returns. Only the final path segment (the
//! session id) survives intact, so the session URL is rebuilt from the
//! statically configured endpoint plus that segment.

/// Returns the substring after the final `/` or `\` in `s`.
///
/// When `s` contains neither separator the whole string is returned. A
/// trailing separator yields an empty segment.
pub fn last_path_segment(s: &str) -> &str {
    match s.rfind(|c: char| c == '/' || c == '\\') {
        Some(idx) => &s[idx + 1..],
        None => s,
    }
}

/// Rebuilds a session URL as `endpoint + "/" + last_path_segment(raw)`.
///
/// A trailing `/` on `endpoint` is ignored so the result never contains a
/// doubled separator.
pub fn correct_location(endpoint: &str, raw: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        last_path_segment(raw.trim())
    )
}

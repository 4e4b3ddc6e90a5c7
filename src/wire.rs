//! Wire contract shared by the server and the decrypting client.
//!
//! The server never interprets IVs or salts; it only moves them between the
//! session, the object metadata map and these response headers.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

pub const HEADER_IV: &str = "x-iv";
pub const HEADER_SALT: &str = "x-salt";
pub const HEADER_IVS: &str = "x-ivs";
pub const HEADER_SALTS: &str = "x-salts";
pub const HEADER_IS_MULTI_FILE: &str = "x-is-multi-file";

pub const META_EXPIRATION_DATE: &str = "expirationDate";
pub const META_IV: &str = "iv";
pub const META_SALT: &str = "salt";
pub const META_IVS: &str = "ivs";
pub const META_SALTS: &str = "salts";
pub const META_IS_MULTI_FILE: &str = "isMultiFile";

pub fn encode_b64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_b64(value: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(value.trim())
}

/// Encode a list of byte strings as a JSON array of base64 strings.
pub fn encode_b64_list(items: &[Vec<u8>]) -> String {
    let encoded: Vec<String> = items.iter().map(|item| encode_b64(item)).collect();
    serde_json::to_string(&encoded).unwrap_or_else(|_| "[]".into())
}

/// Inverse of [`encode_b64_list`]. Returns `None` on any malformed element.
pub fn decode_b64_list(value: &str) -> Option<Vec<Vec<u8>>> {
    let encoded: Vec<String> = serde_json::from_str(value).ok()?;
    encoded
        .iter()
        .map(|item| decode_b64(item).ok())
        .collect()
}

pub fn encode_bool(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

/// Accepts `true`/`false` in any letter case.
pub fn decode_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// A resolved, inclusive byte range within an object of known size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, total: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, total)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeRequest {
    /// No usable `Range` header; serve the whole object.
    Full,
    Partial(ByteRange),
    Unsatisfiable,
}

/// Resolve a `Range` header against an object of `size` bytes.
///
/// Only single `bytes=` ranges are honoured. Multi-range and unknown units
/// fall back to a full response, which RFC 9110 permits.
pub fn parse_range(header: Option<&str>, size: u64) -> RangeRequest {
    let Some(raw) = header else {
        return RangeRequest::Full;
    };
    let Some(set) = raw.trim().strip_prefix("bytes=") else {
        return RangeRequest::Full;
    };
    if set.contains(',') {
        return RangeRequest::Full;
    }
    let Some((first, last)) = set.trim().split_once('-') else {
        return RangeRequest::Full;
    };

    let (first, last) = (first.trim(), last.trim());
    if first.is_empty() {
        // suffix form: last N bytes
        let Ok(suffix) = last.parse::<u64>() else {
            return RangeRequest::Full;
        };
        if suffix == 0 || size == 0 {
            return RangeRequest::Unsatisfiable;
        }
        let start = size.saturating_sub(suffix);
        return RangeRequest::Partial(ByteRange {
            start,
            end: size - 1,
        });
    }

    let Ok(start) = first.parse::<u64>() else {
        return RangeRequest::Full;
    };
    if start >= size {
        return RangeRequest::Unsatisfiable;
    }
    let end = if last.is_empty() {
        size - 1
    } else {
        match last.parse::<u64>() {
            Ok(end) if end >= start => end.min(size - 1),
            Ok(_) => return RangeRequest::Full,
            Err(_) => return RangeRequest::Full,
        }
    };
    RangeRequest::Partial(ByteRange { start, end })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_lists_survive_json_encoding() {
        let items = vec![vec![0u8, 1, 2, 255], vec![], vec![42; 16]];
        let encoded = encode_b64_list(&items);
        assert!(encoded.starts_with('['));
        assert_eq!(decode_b64_list(&encoded), Some(items));
        assert_eq!(decode_b64_list("[\"not base64!\"]"), None);
        assert_eq!(decode_b64_list("nope"), None);
    }

    #[test]
    fn bools_accept_any_case() {
        assert_eq!(decode_bool("True"), Some(true));
        assert_eq!(decode_bool("false"), Some(false));
        assert_eq!(decode_bool("FALSE "), Some(false));
        assert_eq!(decode_bool("yes"), None);
    }

    #[test]
    fn ranges_resolve_against_size() {
        assert_eq!(parse_range(None, 10), RangeRequest::Full);
        assert_eq!(
            parse_range(Some("bytes=0-3"), 10),
            RangeRequest::Partial(ByteRange { start: 0, end: 3 })
        );
        assert_eq!(
            parse_range(Some("bytes=4-"), 10),
            RangeRequest::Partial(ByteRange { start: 4, end: 9 })
        );
        assert_eq!(
            parse_range(Some("bytes=-3"), 10),
            RangeRequest::Partial(ByteRange { start: 7, end: 9 })
        );
        assert_eq!(
            parse_range(Some("bytes=5-100"), 10),
            RangeRequest::Partial(ByteRange { start: 5, end: 9 })
        );
        assert_eq!(parse_range(Some("bytes=10-"), 10), RangeRequest::Unsatisfiable);
        assert_eq!(parse_range(Some("bytes=0-1,4-5"), 10), RangeRequest::Full);
        assert_eq!(parse_range(Some("items=0-1"), 10), RangeRequest::Full);
    }

    #[test]
    fn content_range_is_inclusive() {
        let range = ByteRange { start: 2, end: 5 };
        assert_eq!(range.len(), 4);
        assert_eq!(range.content_range(10), "bytes 2-5/10");
    }
}

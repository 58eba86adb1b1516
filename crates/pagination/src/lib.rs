//! Cursor-based pagination shared by every listing tool.
//!
//! A cursor is URL-safe base64 (no padding) of the JSON
//! `{offset, limit, filter_hash?}`. Limits are clamped silently; cursor
//! content is validated on decode; filter changes mid-walk are a clean
//! error (`PaginationFilterMismatch`), never silent corruption.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use fleet_core::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CursorPayload {
    pub offset: usize,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_hash: Option<String>,
}

/// Metadata returned alongside items from any list operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageInfo {
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    pub has_more: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_cursor: Option<String>,
}

/// Clamp a caller-supplied limit into `[1, max]`; out-of-band values are
/// silently clamped, never an error.
pub fn clamp_limit(requested: Option<usize>, max: usize) -> usize {
    requested.unwrap_or(max.min(50)).clamp(1, max)
}

/// Canonical digest of a normalized filter set: sorted keys, JSON values,
/// first 16 hex chars of SHA-256.
pub fn filter_hash(filters: &serde_json::Value) -> String {
    let normalized = normalize(filters);
    let canonical = serde_json::to_string(&normalized).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn normalize(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut sorted: Vec<(&String, &serde_json::Value)> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                // Drop null/absent filters so {"x": null} and {} hash the same.
                if !v.is_null() {
                    out.insert(k.clone(), normalize(v));
                }
            }
            serde_json::Value::Object(out)
        }
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(normalize).collect())
        }
        other => other.clone(),
    }
}

pub fn encode_cursor(payload: &CursorPayload) -> String {
    let json = serde_json::to_vec(payload).expect("CursorPayload always serializes");
    URL_SAFE_NO_PAD.encode(json)
}

pub fn decode_cursor(cursor: &str) -> Result<CursorPayload> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|e| Error::InvalidCursor(e.to_string()))?;
    let payload: CursorPayload =
        serde_json::from_slice(&bytes).map_err(|e| Error::InvalidCursor(e.to_string()))?;
    if payload.limit == 0 || payload.limit > 1000 {
        return Err(Error::InvalidCursor(format!(
            "limit {} out of range [1,1000]",
            payload.limit
        )));
    }
    // `offset` is unsigned at the type level; a negative value can only
    // arrive as non-numeric JSON, which `serde_json::from_slice` above
    // already rejects with InvalidCursor.
    Ok(payload)
}

/// Resolve the starting state for a page: decode + validate the cursor
/// (if any) against the caller's current filters, or start at offset 0.
pub fn resolve_page_start(
    cursor: Option<&str>,
    filters: &serde_json::Value,
    default_limit: usize,
    requested_limit: Option<usize>,
    max_limit: usize,
) -> Result<(usize, usize)> {
    match cursor {
        None => {
            let limit = clamp_limit(requested_limit.or(Some(default_limit)), max_limit);
            Ok((0, limit))
        }
        Some(c) => {
            let decoded = decode_cursor(c)?;
            let expected_hash = filter_hash(filters);
            if let Some(h) = &decoded.filter_hash {
                if *h != expected_hash {
                    return Err(Error::PaginationFilterMismatch);
                }
            }
            Ok((decoded.offset, decoded.limit))
        }
    }
}

/// Build the `PageInfo` for a page, issuing a `next_cursor` when more
/// items remain.
pub fn build_page_info(
    offset: usize,
    limit: usize,
    returned: usize,
    total: Option<usize>,
    filters: &serde_json::Value,
) -> PageInfo {
    let next_offset = offset + returned;
    let has_more = match total {
        Some(t) => next_offset < t,
        None => returned == limit,
    };
    let next_cursor = has_more.then(|| {
        encode_cursor(&CursorPayload {
            offset: next_offset,
            limit,
            filter_hash: Some(filter_hash(filters)),
        })
    });
    let prev_cursor = (offset > 0).then(|| {
        encode_cursor(&CursorPayload {
            offset: offset.saturating_sub(limit),
            limit,
            filter_hash: Some(filter_hash(filters)),
        })
    });
    PageInfo {
        count: returned,
        total,
        has_more,
        next_cursor,
        prev_cursor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_zero_to_one() {
        assert_eq!(clamp_limit(Some(0), 1000), 1);
    }

    #[test]
    fn clamp_huge_to_max() {
        assert_eq!(clamp_limit(Some(1_000_000), 1000), 1000);
    }

    #[test]
    fn encode_decode_round_trips() {
        let payload = CursorPayload {
            offset: 5,
            limit: 50,
            filter_hash: Some("abc123".into()),
        };
        let cursor = encode_cursor(&payload);
        assert_eq!(decode_cursor(&cursor).unwrap(), payload);
    }

    #[test]
    fn decode_rejects_out_of_range_limit() {
        let payload = CursorPayload {
            offset: 0,
            limit: 0,
            filter_hash: None,
        };
        let cursor = encode_cursor(&payload);
        assert!(matches!(decode_cursor(&cursor), Err(Error::InvalidCursor(_))));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_cursor("not-valid-base64!!!").is_err());
    }

    #[test]
    fn filter_hash_is_order_independent() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(filter_hash(&a), filter_hash(&b));
    }

    #[test]
    fn filter_hash_ignores_null_fields() {
        let a = serde_json::json!({"a": 2, "b": null});
        let b = serde_json::json!({"a": 2});
        assert_eq!(filter_hash(&a), filter_hash(&b));
    }

    #[test]
    fn resolve_page_start_detects_filter_mismatch() {
        let filters_a = serde_json::json!({"status": "online"});
        let filters_b = serde_json::json!({"status": "busy"});
        let cursor = encode_cursor(&CursorPayload {
            offset: 10,
            limit: 50,
            filter_hash: Some(filter_hash(&filters_a)),
        });
        let err = resolve_page_start(Some(&cursor), &filters_b, 50, None, 1000).unwrap_err();
        assert!(matches!(err, Error::PaginationFilterMismatch));
    }

    #[test]
    fn build_page_info_walks_disjoint_pages() {
        let filters = serde_json::json!({});
        let page1 = build_page_info(0, 5, 5, Some(12), &filters);
        assert!(page1.has_more);
        let next = decode_cursor(page1.next_cursor.as_ref().unwrap()).unwrap();
        assert_eq!(next.offset, 5);
        let page2 = build_page_info(5, 5, 5, Some(12), &filters);
        assert!(page2.has_more);
        let page3 = build_page_info(10, 5, 2, Some(12), &filters);
        assert!(!page3.has_more);
    }
}

//! Opaque pagination cursors.
//!
//! A cursor records the [`SortKey`] of the last item handed out, not an
//! offset, so a page request made after a rebuild resumes at the same
//! place in the ordering even if entries came or went in between.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::error::{LinearError, LinearResult};

/// Ordering position: `rank` descending (absent ranks last), then `id`
/// ascending as the deterministic tie-break.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub rank: Option<i64>,
    pub id: String,
}

impl SortKey {
    pub fn new(rank: Option<i64>, id: impl Into<String>) -> Self {
        Self {
            rank,
            id: id.into(),
        }
    }
}

impl Ord for SortKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_rank = match (self.rank, other.rank) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_rank.then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for SortKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Which ordered collection a cursor walks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorScope {
    Issues,
    Users,
    Teams,
    States,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "s")]
    pub scope: CursorScope,
    #[serde(rename = "r")]
    pub rank: Option<i64>,
    #[serde(rename = "i")]
    pub id: String,
}

impl Cursor {
    pub fn new(scope: CursorScope, key: &SortKey) -> Self {
        Self {
            scope,
            rank: key.rank,
            id: key.id.clone(),
        }
    }

    pub fn encode(&self) -> String {
        // Serializing a plain struct of strings and integers cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> LinearResult<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| LinearError::InvalidCursor("not a valid cursor token".into()))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| LinearError::InvalidCursor("cursor payload is malformed".into()))
    }

    /// Decode `token` and require it to belong to `scope`.
    pub fn decode_for(token: &str, scope: CursorScope) -> LinearResult<SortKey> {
        let cursor = Self::decode(token)?;
        if cursor.scope != scope {
            return Err(LinearError::InvalidCursor(format!(
                "cursor belongs to {:?}, not {:?}",
                cursor.scope, scope
            )));
        }
        Ok(SortKey {
            rank: cursor.rank,
            id: cursor.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_key_order() {
        let mut keys = vec![
            SortKey::new(None, "a"),
            SortKey::new(Some(10), "b"),
            SortKey::new(Some(20), "z"),
            SortKey::new(Some(10), "a"),
        ];
        keys.sort();
        let ids: Vec<_> = keys.iter().map(|k| (k.rank, k.id.as_str())).collect();
        assert_eq!(
            ids,
            vec![(Some(20), "z"), (Some(10), "a"), (Some(10), "b"), (None, "a")]
        );
    }

    #[test]
    fn test_cursor_round_trip() {
        let cursor = Cursor::new(CursorScope::Issues, &SortKey::new(Some(1_700_000_000), "ENG-12"));
        let token = cursor.encode();
        assert!(!token.contains('='));
        assert_eq!(Cursor::decode(&token).unwrap(), cursor);

        let no_rank = Cursor::new(CursorScope::Teams, &SortKey::new(None, "ENG"));
        assert_eq!(Cursor::decode(&no_rank.encode()).unwrap(), no_rank);
    }

    #[test]
    fn test_garbage_cursor_rejected() {
        assert_eq!(Cursor::decode("!!!").unwrap_err().kind(), "invalid_cursor");
        let not_json = URL_SAFE_NO_PAD.encode(b"hello");
        assert_eq!(Cursor::decode(&not_json).unwrap_err().kind(), "invalid_cursor");
    }

    #[test]
    fn test_scope_mismatch_rejected() {
        let token = Cursor::new(CursorScope::Users, &SortKey::new(Some(3), "u1")).encode();
        assert!(Cursor::decode_for(&token, CursorScope::Users).is_ok());
        let err = Cursor::decode_for(&token, CursorScope::Issues).unwrap_err();
        assert_eq!(err.kind(), "invalid_cursor");
    }
}

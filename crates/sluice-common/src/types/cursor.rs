//! Persisted resume positions
//!
//! A cursor records the last successfully delivered position of a job's
//! source. It is saved only after the corresponding batch has been
//! acknowledged by the destination, never before, so a crash between
//! delivery and save re-delivers at most one batch (at-least-once).

use serde::{Deserialize, Serialize};

/// Resume position for a job's source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Cursor {
    /// Row offset into a file source (1-based, count of consumed rows)
    Offset(u64),
    /// High watermark for a polled source, milliseconds since epoch
    Timestamp(i64),
    /// Delivery checkpoint of a streamed source
    Sequence(u64),
}

impl Cursor {
    /// Whether this cursor is a strict advancement of `other`.
    ///
    /// Cursors of different kinds are never comparable; a job changing
    /// source kind starts over.
    pub fn advances(&self, other: &Cursor) -> bool {
        match (self, other) {
            (Cursor::Offset(a), Cursor::Offset(b)) => a > b,
            (Cursor::Timestamp(a), Cursor::Timestamp(b)) => a > b,
            (Cursor::Sequence(a), Cursor::Sequence(b)) => a > b,
            _ => false,
        }
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cursor::Offset(n) => write!(f, "offset={}", n),
            Cursor::Timestamp(ts) => write!(f, "timestamp={}", ts),
            Cursor::Sequence(n) => write!(f, "sequence={}", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advances_within_kind() {
        assert!(Cursor::Offset(10).advances(&Cursor::Offset(4)));
        assert!(!Cursor::Offset(4).advances(&Cursor::Offset(4)));
        assert!(Cursor::Timestamp(2_000).advances(&Cursor::Timestamp(1_000)));
        assert!(Cursor::Sequence(8).advances(&Cursor::Sequence(7)));
    }

    #[test]
    fn test_kinds_are_incomparable() {
        assert!(!Cursor::Offset(10).advances(&Cursor::Sequence(1)));
        assert!(!Cursor::Timestamp(10).advances(&Cursor::Offset(1)));
    }

    #[test]
    fn test_serde_round_trip() {
        let cursor = Cursor::Timestamp(1_700_000_000_000);
        let json = serde_json::to_string(&cursor).unwrap();
        let back: Cursor = serde_json::from_str(&json).unwrap();
        assert_eq!(cursor, back);
    }
}

//! Entry and source identity types.
//!
//! An entry id is unique within its owning manager and monotonically
//! assigned from a per-manager high-water mark; it is never reused, even
//! after deletion. A source id is assigned by an external notifier (host
//! firmware) and carries an explicit invalid sentinel meaning "not yet
//! correlated with a source report".

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dump entry ID, unique within one manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u32);

impl EntryId {
    /// The next id in the per-manager sequence.
    pub fn next(self) -> EntryId {
        EntryId(self.0 + 1)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for EntryId {
    fn from(id: u32) -> Self {
        EntryId(id)
    }
}

/// Identifier assigned to a dump by the external source that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub u32);

impl SourceId {
    /// Sentinel meaning "not yet correlated with a source report".
    pub const INVALID: SourceId = SourceId(u32::MAX);

    /// Whether this id has been correlated with a source report.
    pub fn is_valid(self) -> bool {
        self != SourceId::INVALID
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}", self.0)
        } else {
            write!(f, "invalid")
        }
    }
}

impl From<u32> for SourceId {
    fn from(id: u32) -> Self {
        SourceId(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_sequence() {
        assert_eq!(EntryId(0).next(), EntryId(1));
        assert_eq!(EntryId(41).next(), EntryId(42));
    }

    #[test]
    fn invalid_source_id_sentinel() {
        assert!(!SourceId::INVALID.is_valid());
        assert!(SourceId(0).is_valid());
        assert_eq!(SourceId::INVALID.to_string(), "invalid");
    }
}

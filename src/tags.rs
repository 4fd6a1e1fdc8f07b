// 🏷️ Tag Set Normalizer
// Turns raw RFID identifiers (as scanned or as configured) into comparable sets.
//
// Identifiers are opaque and case-sensitive: "a1" and "A1" are different tags.
// Nothing is trimmed or folded. Blank input is rejected here, at the boundary,
// so the reconciliation engine only ever sees valid identifiers.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// TAG IDENTIFIER
// ============================================================================

/// A single validated RFID tag identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(String);

impl TagId {
    /// Validate a raw identifier. Empty and whitespace-only values are `INVALID_TAG`.
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Err(Error::InvalidTag(
                "tag identifier must be a non-empty string".to_string(),
            ));
        }
        Ok(TagId(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// TAG SET
// ============================================================================

/// Ordered set of tag identifiers. Iteration is lexicographic, which keeps
/// every diff computed from it stable for a given input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagSet(BTreeSet<TagId>);

impl TagSet {
    /// Build a set from scanned identifiers. Repeated scans of the same tag
    /// collapse into one entry.
    pub fn from_scan<I, S>(raw: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for (index, tag) in raw.into_iter().enumerate() {
            let tag = TagId::parse(tag.as_ref()).map_err(|_| {
                Error::InvalidTag(format!("scanned tag at position {} is empty", index))
            })?;
            set.insert(tag);
        }
        Ok(TagSet(set))
    }

    /// Build a set from a configured list. A configuration naming the same
    /// tag twice is rejected rather than collapsed.
    pub fn from_expected<I, S>(raw: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for tag in raw {
            let tag = TagId::parse(tag.as_ref())?;
            if set.contains(&tag) {
                return Err(Error::Validation(format!(
                    "expected child tag '{}' is listed more than once",
                    tag
                )));
            }
            set.insert(tag);
        }
        Ok(TagSet(set))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tags in `self` that are absent from `other`, sorted
    pub fn difference(&self, other: &TagSet) -> Vec<String> {
        self.0
            .difference(&other.0)
            .map(|t| t.as_str().to_string())
            .collect()
    }
}

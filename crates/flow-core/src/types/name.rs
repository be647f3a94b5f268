//! Hashed string names for ports and event handlers.
//!
//! An `IndexableName` is a 64-bit hash paired with the label it was built
//! from. All comparison, ordering, and hashing go through the hash; the
//! label is kept for diagnostics only.

use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a 64-bit hash, evaluable in const context.
const fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash
}

/// Hashed integer representation of a string name.
///
/// For any fixed input string the hash is deterministic, and names built
/// from static strings are computable at compile time. Two names are equal
/// iff their hashes are equal; the label never participates.
#[derive(Debug, Clone)]
pub struct IndexableName {
    hash: u64,
    label: Cow<'static, str>,
}

impl IndexableName {
    /// The reserved sentinel name.
    pub const NONE: IndexableName = IndexableName::from_static("None");

    /// Builds a name from a static string. Usable in const context.
    pub const fn from_static(label: &'static str) -> Self {
        Self {
            hash: fnv1a_64(label.as_bytes()),
            label: Cow::Borrowed(label),
        }
    }

    /// Builds a name from a runtime string, taking an owned copy of the label.
    pub fn new(label: &str) -> Self {
        Self {
            hash: fnv1a_64(label.as_bytes()),
            label: Cow::Owned(label.to_owned()),
        }
    }

    /// The 64-bit hash value.
    pub const fn value(&self) -> u64 {
        self.hash
    }

    /// The label the name was built from.
    pub fn name(&self) -> &str {
        &self.label
    }
}

impl PartialEq for IndexableName {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl Eq for IndexableName {}

impl PartialOrd for IndexableName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexableName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.hash.cmp(&other.hash)
    }
}

impl Hash for IndexableName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl fmt::Display for IndexableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl From<&'static str> for IndexableName {
    fn from(label: &'static str) -> Self {
        Self::from_static(label)
    }
}

impl From<String> for IndexableName {
    fn from(label: String) -> Self {
        Self {
            hash: fnv1a_64(label.as_bytes()),
            label: Cow::Owned(label),
        }
    }
}

impl From<&IndexableName> for IndexableName {
    fn from(name: &IndexableName) -> Self {
        name.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(
            IndexableName::new("input").value(),
            IndexableName::from_static("input").value()
        );
    }

    #[test]
    fn test_distinct_strings_distinct_hashes() {
        // Every 4-character name over a small alphabet; no collisions.
        let alphabet = b"abcdefghij";
        let mut seen = HashSet::new();
        for a in alphabet {
            for b in alphabet {
                for c in alphabet {
                    for d in alphabet {
                        let label = String::from_utf8(vec![*a, *b, *c, *d]).unwrap();
                        assert!(seen.insert(IndexableName::new(&label).value()), "{label}");
                    }
                }
            }
        }
        assert_eq!(seen.len(), 10_000);
    }

    #[test]
    fn test_equality_ignores_label_storage() {
        let static_name = IndexableName::from_static("out");
        let owned_name = IndexableName::new("out");
        assert_eq!(static_name, owned_name);

        let mut set = HashSet::new();
        set.insert(static_name);
        assert!(set.contains(&owned_name));
    }

    #[test]
    fn test_none_sentinel() {
        assert_eq!(IndexableName::NONE, IndexableName::new("None"));
        assert_eq!(IndexableName::NONE.name(), "None");
    }

    #[test]
    fn test_const_evaluation() {
        const KEY: IndexableName = IndexableName::from_static("in");
        assert_eq!(KEY, IndexableName::new("in"));
    }
}

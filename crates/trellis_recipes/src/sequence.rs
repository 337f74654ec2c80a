//! Sequenced node names.
//!
//! Sequential nodes are named `<prefix>-<sequence>` by the coordination
//! service. Election candidates and queue elements are ranked by parsing
//! the name back apart: prefixes compare as strings, sequences compare
//! numerically, and names whose suffix does not parse sort after those
//! that do.

use crate::error::RecipeError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use tracing::debug;

/// A node name split into its prefix and numeric sequence suffix.
///
/// Immutable value type; the ordering is total, so a `BTreeSet` of these
/// is the candidate ranking used by the election.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequencedName {
    name: String,
    prefix: String,
    sequence: Option<u64>,
}

impl SequencedName {
    /// Split a bare node name into prefix and sequence.
    ///
    /// The prefix is everything before the final `-`; the sequence is the
    /// numeric suffix after it, or `None` when the suffix is absent or
    /// non-numeric.
    ///
    /// # Errors
    ///
    /// Returns `InvalidNodeName` for an empty name.
    pub fn parse(name: &str) -> Result<Self, RecipeError> {
        if name.is_empty() {
            return Err(RecipeError::InvalidNodeName {
                name: name.to_string(),
            });
        }
        let (prefix, sequence) = match name.rsplit_once('-') {
            Some((head, tail)) => match tail.parse::<u64>() {
                Ok(sequence) => (head.to_string(), Some(sequence)),
                Err(_) => {
                    debug!(name, "node name has a non-numeric sequence suffix");
                    (head.to_string(), None)
                }
            },
            None => (name.to_string(), None),
        };
        Ok(Self {
            name: name.to_string(),
            prefix,
            sequence,
        })
    }

    /// The full node name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Everything before the final `-`, or the whole name without one
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// The numeric suffix, if it parsed
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }
}

impl fmt::Display for SequencedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl Ord for SequencedName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.prefix
            .cmp(&other.prefix)
            .then_with(|| match (self.sequence, other.sequence) {
                (Some(a), Some(b)) => a.cmp(&b),
                // unparsable sorts after parsable
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for SequencedName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse(name: &str) -> SequencedName {
        SequencedName::parse(name).unwrap()
    }

    #[test]
    fn test_empty_name_is_rejected() {
        assert!(matches!(
            SequencedName::parse(""),
            Err(RecipeError::InvalidNodeName { .. })
        ));
    }

    #[test]
    fn test_parse_splits_on_last_dash() {
        let name = parse("election-5-0000000002");
        assert_eq!(name.prefix(), "election-5");
        assert_eq!(name.sequence(), Some(2));
        assert_eq!(name.name(), "election-5-0000000002");
    }

    #[test]
    fn test_name_without_dash_has_no_sequence() {
        let name = parse("plain");
        assert_eq!(name.prefix(), "plain");
        assert_eq!(name.sequence(), None);
    }

    #[test]
    fn test_non_numeric_suffix_has_no_sequence() {
        let name = parse("election-5-beta");
        assert_eq!(name.prefix(), "election-5");
        assert_eq!(name.sequence(), None);
    }

    #[test]
    fn test_numeric_ordering_within_a_prefix() {
        assert!(parse("election-5-0000000002") < parse("election-5-0000000010"));
        assert!(parse("qn-0000000000") < parse("qn-0000000001"));
    }

    #[test]
    fn test_unparsable_sorts_after_parsable_within_a_prefix() {
        assert!(parse("election-5-0000000099") < parse("election-5-beta"));
    }

    #[test]
    fn test_both_unparsable_falls_back_to_full_name() {
        assert!(parse("node-alpha") < parse("node-beta"));
    }

    #[test]
    fn test_prefix_dominates_sequence() {
        assert!(parse("a-0000000099") < parse("b-0000000000"));
    }

    #[test]
    fn test_sorted_set_ranks_candidates() {
        let mut set = std::collections::BTreeSet::new();
        for raw in [
            "election-5-0000000010",
            "election-5-0000000002",
            "election-5-x",
        ] {
            set.insert(parse(raw));
        }
        let ranked: Vec<&str> = set.iter().map(SequencedName::name).collect();
        assert_eq!(
            ranked,
            vec![
                "election-5-0000000002",
                "election-5-0000000010",
                "election-5-x",
            ]
        );
    }

    fn arb_name() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-c]{1,3}-[0-9]{1,6}",
            "[a-c]{1,3}-[a-z]{1,3}",
            "[a-c]{1,4}",
        ]
    }

    proptest::proptest! {
        #[test]
        fn prop_ordering_is_antisymmetric(a in arb_name(), b in arb_name()) {
            let left = parse(&a);
            let right = parse(&b);
            prop_assert_eq!(left.cmp(&right), right.cmp(&left).reverse());
        }

        #[test]
        fn prop_ordering_is_transitive(a in arb_name(), b in arb_name(), c in arb_name()) {
            let mut names = [parse(&a), parse(&b), parse(&c)];
            names.sort();
            prop_assert!(names[0] <= names[1]);
            prop_assert!(names[1] <= names[2]);
            prop_assert!(names[0] <= names[2]);
        }

        #[test]
        fn prop_equal_only_when_names_equal(a in arb_name(), b in arb_name()) {
            let left = parse(&a);
            let right = parse(&b);
            prop_assert_eq!(left.cmp(&right) == std::cmp::Ordering::Equal, a == b);
        }
    }
}

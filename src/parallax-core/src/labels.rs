//! Label sets and their signatures.
//!
//! A label set is an ordered list of `(name, value)` string pairs, unique by
//! name. Vector matching and aggregation grouping both rely on 64-bit
//! signatures computed over a subset of the labels; signatures are
//! deterministic for a given label set, so they can be compared across
//! operators and across query executions.

use std::fmt;
use std::hash::Hasher;

use fxhash::FxHasher64;
use serde::{Deserialize, Serialize};

/// The reserved label name holding the metric name.
pub const METRIC_NAME: &str = "__name__";

/// Separator byte between label names and values in the signature stream.
/// Label names cannot contain `0xFF`, which makes the encoding unambiguous.
const SEP: u8 = 0xFF;

/// A single `(name, value)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    /// Create a new label.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An ordered, name-unique label set.
///
/// Labels are kept sorted by name. When the same name is supplied more than
/// once, the last assignment wins.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Labels(Vec<Label>);

impl Labels {
    /// The empty label set.
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Build a label set from labels, sorting by name and deduplicating.
    pub fn new(mut labels: Vec<Label>) -> Self {
        labels.sort_by(|a, b| a.name.cmp(&b.name));
        labels.dedup_by(|next, prev| {
            if next.name == prev.name {
                // Last assignment wins.
                std::mem::swap(&mut prev.value, &mut next.value);
                true
            } else {
                false
            }
        });
        Self(labels)
    }

    /// Build a label set from `(name, value)` pairs.
    pub fn from_pairs<N, V>(pairs: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(n, v)| Label::new(n, v))
                .collect::<Vec<_>>(),
        )
    }

    /// Get the value for a label name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .binary_search_by(|l| l.name.as_str().cmp(name))
            .ok()
            .map(|i| self.0[i].value.as_str())
    }

    /// Whether a label with the given name is present.
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// The metric name, if set.
    pub fn metric_name(&self) -> Option<&str> {
        self.get(METRIC_NAME)
    }

    /// Number of labels.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the labels in name order.
    pub fn iter(&self) -> std::slice::Iter<'_, Label> {
        self.0.iter()
    }

    /// Deterministic 64-bit signature over all labels.
    pub fn hash(&self) -> u64 {
        self.hash_filtered(|_| true)
    }

    /// Signature over all labels except the given names and `__name__`.
    pub fn hash_without(&self, names: &[String]) -> u64 {
        self.hash_filtered(|l| l.name != METRIC_NAME && !names.iter().any(|n| *n == l.name))
    }

    /// Signature restricted to the given names, in label order.
    pub fn hash_for(&self, names: &[String]) -> u64 {
        self.hash_filtered(|l| names.iter().any(|n| *n == l.name))
    }

    fn hash_filtered(&self, keep: impl Fn(&Label) -> bool) -> u64 {
        let mut hasher = FxHasher64::default();
        for label in self.0.iter().filter(|l| keep(l)) {
            hasher.write(label.name.as_bytes());
            hasher.write_u8(SEP);
            hasher.write(label.value.as_bytes());
            hasher.write_u8(SEP);
        }
        hasher.finish()
    }
}

impl fmt::Display for Labels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, label) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", label.name, label.value)?;
        }
        write!(f, "}}")
    }
}

impl IntoIterator for Labels {
    type Item = Label;
    type IntoIter = std::vec::IntoIter<Label>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Derives a label set from a base set by deleting or keeping names.
///
/// `keep` removes every label not in the kept set; `del` removes the listed
/// names. Deletions are applied after the keep filter, matching the order the
/// binary operator needs when it combines both.
#[derive(Debug, Clone)]
pub struct LabelsBuilder {
    base: Labels,
    del: Vec<String>,
    keep: Option<Vec<String>>,
}

impl LabelsBuilder {
    /// Start from a base label set.
    pub fn new(base: Labels) -> Self {
        Self {
            base,
            del: Vec::new(),
            keep: None,
        }
    }

    /// Delete the given label names.
    pub fn del<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.del.extend(names.into_iter().map(Into::into));
        self
    }

    /// Keep only the given label names.
    pub fn keep<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Self {
        self.keep = Some(names.into_iter().map(Into::into).collect());
        self
    }

    /// Materialize the resulting label set.
    pub fn labels(self) -> Labels {
        let Self { base, del, keep } = self;
        let filtered = base
            .into_iter()
            .filter(|l| match &keep {
                Some(kept) => kept.iter().any(|n| *n == l.name),
                None => true,
            })
            .filter(|l| !del.iter().any(|n| *n == l.name))
            .collect();
        // The base was already sorted and unique; filtering preserves that.
        Labels(filtered)
    }
}

/// Construct a [`Labels`] value from `name => value` pairs.
#[macro_export]
macro_rules! labels {
    () => { $crate::Labels::empty() };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::Labels::from_pairs([$(($name, $value)),+])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sorted_and_unique() {
        let lbls = labels! {"b" => "2", "a" => "1", "b" => "3"};
        let names: Vec<_> = lbls.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(lbls.get("b"), Some("3"));
    }

    #[test]
    fn test_hash_deterministic() {
        let a = labels! {"__name__" => "up", "job" => "api"};
        let b = labels! {"job" => "api", "__name__" => "up"};
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_without_drops_metric_name() {
        let with_name = labels! {"__name__" => "up", "job" => "api"};
        let without_name = labels! {"job" => "api"};
        assert_eq!(with_name.hash_without(&[]), without_name.hash_without(&[]));
        assert_ne!(with_name.hash(), with_name.hash_without(&[]));
    }

    #[test]
    fn test_hash_for_subset() {
        let a = labels! {"job" => "api", "instance" => "a", "cpu" => "0"};
        let b = labels! {"job" => "api", "instance" => "a", "cpu" => "1"};
        let on = vec!["job".to_string(), "instance".to_string()];
        assert_eq!(a.hash_for(&on), b.hash_for(&on));
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_for_empty_set() {
        let a = labels! {"job" => "api"};
        let b = labels! {"job" => "web"};
        // An empty restriction hashes no labels on either side.
        assert_eq!(a.hash_for(&[]), b.hash_for(&[]));
    }

    #[test]
    fn test_builder_del_keep() {
        let base = labels! {"__name__" => "up", "job" => "api", "instance" => "a"};
        let kept = LabelsBuilder::new(base.clone())
            .keep(["job", "instance"])
            .labels();
        assert_eq!(kept, labels! {"job" => "api", "instance" => "a"});

        let dropped = LabelsBuilder::new(base)
            .del([METRIC_NAME, "instance"])
            .labels();
        assert_eq!(dropped, labels! {"job" => "api"});
    }

    #[test]
    fn test_display() {
        let lbls = labels! {"a" => "1", "b" => "2"};
        assert_eq!(lbls.to_string(), r#"{a="1", b="2"}"#);
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        fn arb_labels() -> impl Strategy<Value = Labels> {
            proptest::collection::btree_map("[a-z]{1,6}", "[a-z0-9]{0,6}", 0..6)
                .prop_map(Labels::from_pairs)
        }

        proptest! {
            #[test]
            fn hash_for_all_names_equals_hash(lbls in arb_labels()) {
                let names: Vec<String> = lbls.iter().map(|l| l.name.clone()).collect();
                prop_assert_eq!(lbls.hash_for(&names), lbls.hash());
            }

            #[test]
            fn hash_without_ignores_listed_names(lbls in arb_labels()) {
                let names: Vec<String> = lbls.iter().map(|l| l.name.clone()).collect();
                prop_assert_eq!(lbls.hash_without(&names), Labels::empty().hash());
            }
        }
    }
}

//! Checksum diff between two registry snapshots.
//!
//! Comparing checksums before and after a reload tells the weaver
//! exactly which targets to revisit, avoiding full reapplication cost
//! in systems with many intercepted call sites.

use std::collections::{HashMap, HashSet};
use std::fmt;

use dynaprobe_core::type_of_key;

/// Difference between two `"Type#method"` → checksum snapshots.
/// Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleDiff {
    added_or_changed: HashSet<String>,
    removed: HashSet<String>,
    unchanged: HashSet<String>,
}

impl RuleDiff {
    /// Compute the diff between old and new checksum snapshots.
    pub fn compute(old: &HashMap<String, String>, new: &HashMap<String, String>) -> Self {
        let mut added_or_changed = HashSet::new();
        let mut removed = HashSet::new();
        let mut unchanged = HashSet::new();

        for key in old.keys() {
            if !new.contains_key(key) {
                removed.insert(key.clone());
            }
        }

        for (key, new_checksum) in new {
            match old.get(key) {
                Some(old_checksum) if old_checksum == new_checksum => {
                    unchanged.insert(key.clone());
                }
                _ => {
                    added_or_changed.insert(key.clone());
                }
            }
        }

        Self { added_or_changed, removed, unchanged }
    }

    /// Keys that are new or whose checksum changed.
    pub fn added_or_changed(&self) -> &HashSet<String> {
        &self.added_or_changed
    }

    /// Keys present before the reload but absent after it.
    pub fn removed(&self) -> &HashSet<String> {
        &self.removed
    }

    /// Keys with identical checksums on both sides.
    pub fn unchanged(&self) -> &HashSet<String> {
        &self.unchanged
    }

    /// Every key the weaver must revisit: added, changed, or removed.
    pub fn affected(&self) -> HashSet<String> {
        self.added_or_changed.union(&self.removed).cloned().collect()
    }

    /// Distinct type names among the affected keys (operation suffix
    /// stripped), sorted for deterministic hand-off to the weaver.
    /// Keys without a type portion are skipped.
    pub fn affected_types(&self) -> std::collections::BTreeSet<String> {
        self.affected()
            .iter()
            .filter_map(|key| type_of_key(key).map(str::to_string))
            .collect()
    }

    /// True when any key was added, changed, or removed.
    pub fn has_changes(&self) -> bool {
        !self.added_or_changed.is_empty() || !self.removed.is_empty()
    }

    /// Total number of keys across all categories.
    pub fn total_count(&self) -> usize {
        self.added_or_changed.len() + self.removed.len() + self.unchanged.len()
    }
}

impl fmt::Display for RuleDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RuleDiff[added/changed={}, removed={}, unchanged={}]",
            self.added_or_changed.len(),
            self.removed.len(),
            self.unchanged.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(&str, &str)]) -> HashMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn disjoint_key_sets() {
        let old = snapshot(&[("A#m", "1"), ("B#m", "2")]);
        let new = snapshot(&[("C#m", "3"), ("D#m", "4")]);

        let diff = RuleDiff::compute(&old, &new);
        assert_eq!(diff.added_or_changed(), &new.keys().cloned().collect());
        assert_eq!(diff.removed(), &old.keys().cloned().collect());
        assert!(diff.unchanged().is_empty());
        assert!(diff.has_changes());
        assert_eq!(diff.affected().len(), 4);
    }

    #[test]
    fn identical_maps_have_no_changes() {
        let old = snapshot(&[("A#m", "1"), ("B#m", "2")]);
        let diff = RuleDiff::compute(&old, &old.clone());

        assert!(!diff.has_changes());
        assert!(diff.affected().is_empty());
        assert_eq!(diff.unchanged().len(), 2);
        assert_eq!(diff.total_count(), 2);
    }

    #[test]
    fn changed_checksum_is_added_or_changed() {
        let old = snapshot(&[("A#m", "1"), ("B#m", "2")]);
        let new = snapshot(&[("A#m", "9"), ("B#m", "2")]);

        let diff = RuleDiff::compute(&old, &new);
        assert!(diff.added_or_changed().contains("A#m"));
        assert!(diff.unchanged().contains("B#m"));
        assert!(diff.removed().is_empty());
        assert!(diff.has_changes());
    }

    #[test]
    fn empty_snapshots_are_empty_diff() {
        let diff = RuleDiff::compute(&HashMap::new(), &HashMap::new());
        assert!(!diff.has_changes());
        assert_eq!(diff.total_count(), 0);
    }

    #[test]
    fn affected_types_strip_method_suffix() {
        let old = snapshot(&[("A#m1", "1"), ("A#m2", "2"), ("B#m", "3")]);
        let new = snapshot(&[("A#m1", "9"), ("A#m2", "8")]);

        let types = RuleDiff::compute(&old, &new).affected_types();
        assert_eq!(
            types.into_iter().collect::<Vec<_>>(),
            vec!["A".to_string(), "B".to_string()]
        );
    }

    #[test]
    fn keys_without_type_portion_are_skipped() {
        let old = snapshot(&[("A#m", "1"), ("bare", "2"), ("#m", "3")]);
        let new = HashMap::new();

        let diff = RuleDiff::compute(&old, &new);
        assert_eq!(diff.affected().len(), 3);
        assert_eq!(
            diff.affected_types().into_iter().collect::<Vec<_>>(),
            vec!["A".to_string()]
        );
    }

    #[test]
    fn display_summarizes_counts() {
        let old = snapshot(&[("A#m", "1")]);
        let new = snapshot(&[("A#m", "2"), ("B#m", "3")]);
        let diff = RuleDiff::compute(&old, &new);
        assert_eq!(diff.to_string(), "RuleDiff[added/changed=2, removed=0, unchanged=0]");
    }
}

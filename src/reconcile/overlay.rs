//! Ownership-scoped merging of shared attribute maps.
//!
//! A map such as `other_config` is written by several parties. The tracker
//! only ever removes keys it previously wrote, as recorded by the sentinel
//! entry, and leaves every other key untouched.

use std::collections::{BTreeMap, BTreeSet};

use crate::model::{MapPatch, OWNED_KEYS_SENTINEL, decode_owned_keys, encode_owned_keys};

/// Three-way merge of a shared key/value map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeOverlayTracker {
    sentinel: String,
}

impl Default for AttributeOverlayTracker {
    fn default() -> Self {
        Self::new(OWNED_KEYS_SENTINEL)
    }
}

impl AttributeOverlayTracker {
    /// Creates a tracker that records ownership under `sentinel`.
    #[must_use]
    pub fn new(sentinel: impl Into<String>) -> Self {
        Self {
            sentinel: sentinel.into(),
        }
    }

    /// The sentinel key.
    #[must_use]
    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    /// Keys the sentinel in `raw` claims.
    #[must_use]
    pub fn owned_keys(&self, raw: &BTreeMap<String, String>) -> BTreeSet<String> {
        raw.get(&self.sentinel)
            .map(|value| decode_owned_keys(value))
            .unwrap_or_default()
    }

    /// Entries in `raw` that are present and owned.
    #[must_use]
    pub fn managed_view(&self, raw: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let owned = self.owned_keys(raw);
        raw.iter()
            .filter(|(key, _)| owned.contains(*key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Merges the desired managed entries into the observed map.
    ///
    /// Returns the new raw map (sentinel included) and the new owned set.
    #[must_use]
    pub fn merge(
        &self,
        desired_managed: &BTreeMap<String, String>,
        observed_raw: &BTreeMap<String, String>,
        prior_owned: &BTreeSet<String>,
    ) -> (BTreeMap<String, String>, BTreeSet<String>) {
        let mut merged = observed_raw.clone();
        merged.remove(&self.sentinel);

        for key in prior_owned {
            if !desired_managed.contains_key(key) {
                merged.remove(key);
            }
        }

        let mut owned = BTreeSet::new();
        for (key, value) in desired_managed {
            if *key == self.sentinel {
                continue;
            }
            merged.insert(key.clone(), value.clone());
            owned.insert(key.clone());
        }

        merged.insert(self.sentinel.clone(), encode_owned_keys(&owned));
        (merged, owned)
    }

    /// Returns the patch that converges `observed_raw`, or `None` if the merge
    /// would not change the map.
    ///
    /// A missing sentinel is equivalent to an empty one.
    #[must_use]
    pub fn changes(
        &self,
        desired_managed: &BTreeMap<String, String>,
        observed_raw: &BTreeMap<String, String>,
    ) -> Option<MapPatch> {
        let prior_owned = self.owned_keys(observed_raw);
        let (merged, _) = self.merge(desired_managed, observed_raw, &prior_owned);

        // Owned keys another writer already removed do not need a write.
        let present: BTreeSet<String> = prior_owned
            .into_iter()
            .filter(|key| observed_raw.contains_key(key))
            .collect();
        let mut baseline = observed_raw.clone();
        baseline.insert(self.sentinel.clone(), encode_owned_keys(&present));
        if merged == baseline {
            return None;
        }

        Some(MapPatch::Overlay {
            managed: desired_managed
                .iter()
                .filter(|(key, _)| **key != self.sentinel)
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
            sentinel: self.sentinel.clone(),
        })
    }
}

/// Applies a map patch to the current remote value.
#[must_use]
pub fn apply_patch(
    patch: &MapPatch,
    current: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    match patch {
        MapPatch::Upsert { entries } => {
            let mut value = current.clone();
            value.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
            value
        }
        MapPatch::Overlay { managed, sentinel } => {
            let tracker = AttributeOverlayTracker::new(sentinel.clone());
            let prior_owned = tracker.owned_keys(current);
            tracker.merge(managed, current, &prior_owned).0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_merge_removes_only_owned_keys() {
        let tracker = AttributeOverlayTracker::default();
        let observed = map(&[("a", "1"), ("external", "z"), (OWNED_KEYS_SENTINEL, "a,")]);
        let prior = tracker.owned_keys(&observed);

        let (merged, owned) = tracker.merge(&BTreeMap::new(), &observed, &prior);

        assert_eq!(merged, map(&[("external", "z"), (OWNED_KEYS_SENTINEL, "")]));
        assert!(owned.is_empty());
    }

    #[test]
    fn test_merge_takes_over_existing_key() {
        let tracker = AttributeOverlayTracker::default();
        let observed = map(&[("a", "old"), ("b", "2")]);

        let (merged, owned) = tracker.merge(&map(&[("a", "new")]), &observed, &BTreeSet::new());

        assert_eq!(
            merged,
            map(&[("a", "new"), ("b", "2"), (OWNED_KEYS_SENTINEL, "a,")])
        );
        assert_eq!(owned.into_iter().collect::<Vec<_>>(), vec![String::from("a")]);
    }

    #[test]
    fn test_no_change_when_converged() {
        let tracker = AttributeOverlayTracker::default();
        let observed = map(&[("a", "1"), ("x", "9"), (OWNED_KEYS_SENTINEL, "a,")]);
        assert!(tracker.changes(&map(&[("a", "1")]), &observed).is_none());
    }

    #[test]
    fn test_absent_sentinel_equals_empty() {
        let tracker = AttributeOverlayTracker::default();
        let observed = map(&[("x", "9")]);
        assert!(tracker.changes(&BTreeMap::new(), &observed).is_none());
    }

    #[test]
    fn test_stale_owned_key_is_not_a_change() {
        let tracker = AttributeOverlayTracker::default();
        // "a" is still listed but was deleted by someone else.
        let observed = map(&[("x", "1"), (OWNED_KEYS_SENTINEL, "a,x,")]);
        assert!(tracker.changes(&map(&[("x", "1")]), &observed).is_none());
        assert!(tracker.changes(&tracker.managed_view(&observed), &observed).is_none());

        // A real change still rewrites the sentinel without the stale key.
        let patch = tracker.changes(&map(&[("x", "2")]), &observed).unwrap();
        let value = apply_patch(&patch, &observed);
        assert_eq!(value, map(&[("x", "2"), (OWNED_KEYS_SENTINEL, "x,")]));
    }

    #[test]
    fn test_changes_detects_value_drift() {
        let tracker = AttributeOverlayTracker::default();
        let observed = map(&[("a", "2"), (OWNED_KEYS_SENTINEL, "a,")]);
        let patch = tracker.changes(&map(&[("a", "1")]), &observed);
        assert_eq!(
            patch,
            Some(MapPatch::Overlay {
                managed: map(&[("a", "1")]),
                sentinel: OWNED_KEYS_SENTINEL.to_string(),
            })
        );
    }

    #[test]
    fn test_apply_patch_remerges_against_current() {
        let patch = MapPatch::Overlay {
            managed: map(&[("a", "1")]),
            sentinel: OWNED_KEYS_SENTINEL.to_string(),
        };
        // Another writer added "late" after planning.
        let current = map(&[("b", "0"), ("late", "y"), (OWNED_KEYS_SENTINEL, "b,")]);

        let value = apply_patch(&patch, &current);

        assert_eq!(value, map(&[("a", "1"), ("late", "y"), (OWNED_KEYS_SENTINEL, "a,")]));
    }

    #[test]
    fn test_apply_upsert_keeps_other_entries() {
        let patch = MapPatch::Upsert {
            entries: map(&[("secureboot", "true")]),
        };
        let value = apply_patch(&patch, &map(&[("secureboot", "false"), ("viridian", "true")]));
        assert_eq!(value, map(&[("secureboot", "true"), ("viridian", "true")]));
    }
}

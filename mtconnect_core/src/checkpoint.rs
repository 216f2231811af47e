// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Snapshots of the latest observation per data item.
//!
//! Non-condition entries simply replace each other. Condition entries form a
//! chain of currently-active faults and warnings keyed by native code; the
//! rules in [`Checkpoint::add`] are the active-condition state machine.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::observation::{Level, Observation};

/// A map of data-item id to its most recent observation, optionally filtered
/// to a subset of ids.
#[derive(Debug, Default, Clone)]
pub struct Checkpoint {
    events: BTreeMap<String, Arc<Observation>>,
    filter: Option<HashSet<String>>,
}

impl Checkpoint {
    /// An empty, unfiltered checkpoint.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty checkpoint that only retains the given data-item ids.
    #[must_use]
    pub fn with_filter(filter: HashSet<String>) -> Self {
        Self {
            events: BTreeMap::new(),
            filter: Some(filter),
        }
    }

    /// A copy of `self`, restricted to `filter` when given (otherwise keeping
    /// `self`'s own filter).
    #[must_use]
    pub fn filtered_copy(&self, filter: Option<&HashSet<String>>) -> Self {
        let filter = filter.or(self.filter.as_ref());
        let events = self
            .events
            .iter()
            .filter(|(id, _)| filter.is_none_or(|f| f.contains(*id)))
            .map(|(id, obs)| (id.clone(), obs.clone()))
            .collect();
        Self {
            events,
            filter: filter.cloned(),
        }
    }

    /// Replace this checkpoint's contents with a copy of `other`, keeping
    /// this checkpoint's filter.
    pub fn copy_from(&mut self, other: &Checkpoint) {
        self.events = other
            .events
            .iter()
            .filter(|(id, _)| self.filter.as_ref().is_none_or(|f| f.contains(*id)))
            .map(|(id, obs)| (id.clone(), obs.clone()))
            .collect();
    }

    /// Fold an observation into the checkpoint.
    ///
    /// Non-condition observations replace the entry for their data item.
    /// Condition observations follow the chain rules:
    ///
    /// 1. NORMAL with no native code replaces the whole chain.
    /// 2. NORMAL with code `C` removes the active entry with code `C`; the
    ///    chain collapses to a synthetic NORMAL when that was the last entry,
    ///    and is left untouched when no entry matched.
    /// 3. UNAVAILABLE replaces the chain.
    /// 4. WARNING/FAULT replaces any active entry with the same code and
    ///    becomes the new chain head.
    pub fn add(&mut self, observation: &Arc<Observation>) {
        let id = observation.data_item().id();
        if let Some(filter) = &self.filter {
            if !filter.contains(id) {
                return;
            }
        }

        let Some(prev) = self.events.get(id) else {
            self.events.insert(id.to_string(), observation.clone());
            return;
        };

        if !observation.data_item().is_condition() {
            self.events.insert(id.to_string(), observation.clone());
            return;
        }

        let prev = prev.clone();
        let head = Self::merge_condition(&prev, observation);
        if let Some(head) = head {
            self.events.insert(id.to_string(), head);
        }
    }

    /// Apply the chain rules; `None` means the checkpoint entry is unchanged.
    fn merge_condition(
        prev: &Arc<Observation>,
        incoming: &Arc<Observation>,
    ) -> Option<Arc<Observation>> {
        let active =
            |level: Option<Level>| !matches!(level, Some(Level::Normal | Level::Unavailable));

        if active(prev.level()) && active(incoming.level()) {
            // Replace any active entry with the same native code, then chain.
            let code = incoming.native_code().to_string();
            let base = if prev.find_code(&code).is_some() {
                prev.without_code(&code)
            } else {
                Some(prev.clone())
            };
            return Some(match base {
                Some(base) => incoming.chained_to(Some(base)),
                None => incoming.clone(),
            });
        }

        if incoming.level() == Some(Level::Normal) {
            let code = incoming.native_code();
            if code.is_empty() {
                // Global clear.
                return Some(incoming.clone());
            }
            if prev.find_code(code).is_some() {
                return Some(match prev.without_code(code) {
                    Some(remaining) => remaining,
                    // Last active entry cleared: record a code-less NORMAL.
                    None => incoming.to_normal(),
                });
            }
            // A coded NORMAL with no matching active entry does not change
            // the active set.
            return None;
        }

        // UNAVAILABLE, or a new fault/warning over an inactive chain.
        Some(incoming.clone())
    }

    /// Look up the latest observation for a data item.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Arc<Observation>> {
        self.events.get(id)
    }

    /// Flatten the checkpoint into a list of observations, chains emitted
    /// head first, ordered by data-item id.
    #[must_use]
    pub fn observations(&self, filter: Option<&HashSet<String>>) -> Vec<Arc<Observation>> {
        let mut list = Vec::with_capacity(self.events.len());
        for (id, head) in &self.events {
            if filter.is_some_and(|f| !f.contains(id)) {
                continue;
            }
            list.extend(head.chain());
        }
        list
    }

    /// Number of data items with an entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True when no data item has an entry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::Checkpoint;
    use crate::device_model::data_item::DataItem;
    use crate::device_model::data_item::test_support::{condition, event, sample};
    use crate::observation::{Level, Observation};

    fn obs(di: &Arc<DataItem>, seq: u64, value: &str) -> Arc<Observation> {
        Arc::new(Observation::new(di.clone(), seq, "T", value))
    }

    #[test]
    fn non_condition_entries_replace() {
        let di = Arc::new(event("e1"));
        let mut cp = Checkpoint::new();
        cp.add(&obs(&di, 1, "ACTIVE"));
        cp.add(&obs(&di, 2, "READY"));
        assert_eq!(cp.len(), 1);
        assert_eq!(cp.get("e1").unwrap().sequence(), 2);
    }

    #[test]
    fn condition_chain_accumulates_and_clears_by_code() {
        let di = Arc::new(condition("c1"));
        let mut cp = Checkpoint::new();
        cp.add(&obs(&di, 1, "fault|100|1||Over"));
        cp.add(&obs(&di, 2, "warning|200|2||Soft"));

        let head = cp.get("c1").unwrap();
        assert_eq!(head.native_code(), "200");
        assert_eq!(head.level(), Some(Level::Warning));
        assert_eq!(head.previous().unwrap().native_code(), "100");
        assert!(head.previous().unwrap().previous().is_none());

        // Clear the fault by code; the warning remains alone.
        cp.add(&obs(&di, 3, "normal|100||"));
        let head = cp.get("c1").unwrap();
        assert_eq!(head.native_code(), "200");
        assert!(head.previous().is_none());

        // Global clear.
        cp.add(&obs(&di, 4, "normal||"));
        let head = cp.get("c1").unwrap();
        assert_eq!(head.level(), Some(Level::Normal));
        assert_eq!(head.native_code(), "");
        assert!(head.previous().is_none());
    }

    #[test]
    fn same_code_is_replaced_not_duplicated() {
        let di = Arc::new(condition("c1"));
        let mut cp = Checkpoint::new();
        cp.add(&obs(&di, 1, "fault|100|1||Over"));
        cp.add(&obs(&di, 2, "fault|200|1||Hard"));
        cp.add(&obs(&di, 3, "fault|100|2||Worse"));

        let head = cp.get("c1").unwrap();
        let codes: Vec<String> = head
            .chain()
            .map(|entry| entry.native_code().to_string())
            .collect();
        assert_eq!(codes, vec!["100", "200"]);
        assert_eq!(head.sequence(), 3);
    }

    #[test]
    fn clearing_last_code_leaves_a_synthetic_normal() {
        let di = Arc::new(condition("c1"));
        let mut cp = Checkpoint::new();
        cp.add(&obs(&di, 1, "fault|100|1||Over"));
        cp.add(&obs(&di, 2, "normal|100||"));

        let head = cp.get("c1").unwrap();
        assert_eq!(head.level(), Some(Level::Normal));
        assert_eq!(head.native_code(), "");
        assert!(head.previous().is_none());
    }

    #[test]
    fn coded_normal_without_match_is_ignored() {
        let di = Arc::new(condition("c1"));
        let mut cp = Checkpoint::new();
        cp.add(&obs(&di, 1, "fault|100|1||Over"));
        cp.add(&obs(&di, 2, "normal|999||"));

        let head = cp.get("c1").unwrap();
        assert_eq!(head.sequence(), 1);
        assert_eq!(head.native_code(), "100");
    }

    #[test]
    fn unavailable_replaces_the_chain() {
        let di = Arc::new(condition("c1"));
        let mut cp = Checkpoint::new();
        cp.add(&obs(&di, 1, "fault|100|1||Over"));
        cp.add(&obs(&di, 2, "warning|200|2||Soft"));
        cp.add(&obs(&di, 3, crate::CONDITION_UNAVAILABLE));

        let head = cp.get("c1").unwrap();
        assert_eq!(head.level(), Some(Level::Unavailable));
        assert!(head.previous().is_none());
    }

    #[test]
    fn at_most_one_entry_per_native_code() {
        let di = Arc::new(condition("c1"));
        let mut cp = Checkpoint::new();
        for (seq, value) in [
            (1, "fault|100|1||a"),
            (2, "warning|100|1||b"),
            (3, "fault|200|1||c"),
            (4, "fault|100|1||d"),
        ] {
            cp.add(&obs(&di, seq, value));
        }
        let mut codes: Vec<String> = cp
            .get("c1")
            .unwrap()
            .chain()
            .map(|entry| entry.native_code().to_string())
            .collect();
        codes.sort();
        assert_eq!(codes, vec!["100", "200"]);
    }

    #[test]
    fn filter_restricts_adds_and_snapshots() {
        let a = Arc::new(sample("a"));
        let b = Arc::new(sample("b"));
        let mut cp = Checkpoint::with_filter(HashSet::from(["a".to_string()]));
        cp.add(&obs(&a, 1, "1"));
        cp.add(&obs(&b, 2, "2"));
        assert_eq!(cp.len(), 1);

        let snapshot = cp.observations(None);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].data_item().id(), "a");
    }

    #[test]
    fn snapshot_flattens_chains_head_first() {
        let c = Arc::new(condition("c1"));
        let mut cp = Checkpoint::new();
        cp.add(&obs(&c, 1, "fault|100|1||a"));
        cp.add(&obs(&c, 2, "warning|200|1||b"));

        let snapshot = cp.observations(None);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].native_code(), "200");
        assert_eq!(snapshot[1].native_code(), "100");
    }
}

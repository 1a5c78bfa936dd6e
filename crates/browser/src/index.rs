//! Admission and recency bookkeeping for the pool.
//!
//! Kept separate from the CDP plumbing so capacity and LRU-eviction policy
//! are testable without launching a browser.

use std::{collections::HashMap, time::Instant};

/// Tracks which instances exist and when they were last active.
#[derive(Debug, Default)]
pub struct PoolIndex {
    entries: HashMap<String, Instant>,
}

impl PoolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, now: Instant) {
        self.entries.insert(id.into(), now);
    }

    /// Record activity. Unknown ids are ignored (the instance may already be
    /// gone; touch must not resurrect it).
    pub fn touch(&mut self, id: &str, now: Instant) {
        if let Some(at) = self.entries.get_mut(id) {
            *at = now;
        }
    }

    /// Remove an entry. Idempotent.
    pub fn remove(&mut self, id: &str) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// The least-recently-active instance; ties broken by id order so
    /// eviction is deterministic.
    pub fn victim(&self) -> Option<String> {
        self.entries
            .iter()
            .min_by(|(id_a, at_a), (id_b, at_b)| at_a.cmp(at_b).then_with(|| id_a.cmp(id_b)))
            .map(|(id, _)| id.clone())
    }

    /// Ids whose last activity is older than `cutoff`.
    pub fn idle_ids(&self, cutoff: Instant) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(_, at)| **at < cutoff)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    #[test]
    fn lru_victim_after_touch() {
        // Create A (t=0), B (t=1). Touch A (t=2). The victim is B.
        let t0 = Instant::now();
        let mut index = PoolIndex::new();
        index.insert("a", t0);
        index.insert("b", t0 + Duration::from_secs(1));
        index.touch("a", t0 + Duration::from_secs(2));

        assert_eq!(index.victim().as_deref(), Some("b"));

        // After evicting B and adding C, the live set is {A, C}.
        assert!(index.remove("b"));
        index.insert("c", t0 + Duration::from_secs(3));
        assert_eq!(index.ids(), vec!["a".to_string(), "c".to_string()]);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn victim_tie_breaks_on_id() {
        let t0 = Instant::now();
        let mut index = PoolIndex::new();
        index.insert("zeta", t0);
        index.insert("alpha", t0);
        assert_eq!(index.victim().as_deref(), Some("alpha"));
    }

    #[test]
    fn touch_does_not_resurrect() {
        let t0 = Instant::now();
        let mut index = PoolIndex::new();
        index.insert("a", t0);
        index.remove("a");
        index.touch("a", t0 + Duration::from_secs(1));
        assert!(!index.contains("a"));
        assert!(index.is_empty());
    }

    #[test]
    fn remove_is_idempotent() {
        let mut index = PoolIndex::new();
        index.insert("a", Instant::now());
        assert!(index.remove("a"));
        assert!(!index.remove("a"));
    }

    #[test]
    fn idle_ids_by_cutoff() {
        let t0 = Instant::now();
        let mut index = PoolIndex::new();
        index.insert("old", t0);
        index.insert("fresh", t0 + Duration::from_secs(60));

        let mut idle = index.idle_ids(t0 + Duration::from_secs(30));
        idle.sort();
        assert_eq!(idle, vec!["old".to_string()]);
    }
}

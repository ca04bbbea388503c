//! Append-only registries
//!
//! Growable arrays shared between loader tasks:
//! - Appends take a single lock and hand back a stable index
//! - Entries are never removed, so an index stays valid for the arena's lifetime
//! - Slots can be reserved up front and filled in later by the owning task
//! - Statistics track append calls and the peak length

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

/// Usage statistics for an arena
#[derive(Debug, Default)]
pub struct ArenaStats {
    /// Number of append calls (single or batched)
    pub append_count: AtomicUsize,
    /// Highest entry count observed
    pub peak_len: AtomicUsize,
}

impl ArenaStats {
    fn record_append(&self, new_len: usize) {
        self.append_count.fetch_add(1, Ordering::Relaxed);
        self.peak_len.fetch_max(new_len, Ordering::Relaxed);
    }

    /// Number of append operations so far
    pub fn appends(&self) -> usize {
        self.append_count.load(Ordering::Relaxed)
    }

    /// Peak number of entries
    pub fn peak(&self) -> usize {
        self.peak_len.load(Ordering::Relaxed)
    }
}

/// Append-only array with stable indices
#[derive(Debug)]
pub struct AppendArena<T> {
    entries: RwLock<Vec<T>>,
    stats: ArenaStats,
}

impl<T> AppendArena<T> {
    /// Create an empty arena
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            stats: ArenaStats::default(),
        }
    }

    /// Append one entry and return its index
    pub fn push(&self, value: T) -> usize {
        let mut entries = self.entries.write();
        let index = entries.len();
        entries.push(value);
        self.stats.record_append(entries.len());
        index
    }

    /// Append a batch of entries contiguously and return their index range
    pub fn extend(&self, values: impl IntoIterator<Item = T>) -> Range<usize> {
        let mut entries = self.entries.write();
        let start = entries.len();
        entries.extend(values);
        self.stats.record_append(entries.len());
        start..entries.len()
    }

    /// Reserve `count` default-initialised slots to be filled later
    pub fn reserve_slots(&self, count: usize) -> Range<usize>
    where
        T: Default,
    {
        self.extend(std::iter::repeat_with(T::default).take(count))
    }

    /// Replace the entry at `index` in place.
    ///
    /// Returns false if the index was never assigned.
    pub fn update(&self, index: usize, f: impl FnOnce(&mut T)) -> bool {
        match self.entries.write().get_mut(index) {
            Some(entry) => {
                f(entry);
                true
            }
            None => false,
        }
    }

    /// Read the entry at `index` through a closure
    pub fn with<R>(&self, index: usize, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.entries.read().get(index).map(f)
    }

    /// Clone the entry at `index`
    pub fn get(&self, index: usize) -> Option<T>
    where
        T: Clone,
    {
        self.entries.read().get(index).cloned()
    }

    /// Clone every entry in `range`, clamped to the current length
    pub fn snapshot(&self, range: Range<usize>) -> Vec<T>
    where
        T: Clone,
    {
        let entries = self.entries.read();
        let end = range.end.min(entries.len());
        let start = range.start.min(end);
        entries[start..end].to_vec()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if the arena is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Get usage statistics
    pub fn stats(&self) -> &ArenaStats {
        &self.stats
    }
}

impl<T> Default for AppendArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_returns_stable_indices() {
        let arena = AppendArena::new();
        assert_eq!(arena.push("a"), 0);
        assert_eq!(arena.push("b"), 1);
        assert_eq!(arena.extend(["c", "d"]), 2..4);
        assert_eq!(arena.get(0), Some("a"));
        assert_eq!(arena.get(3), Some("d"));
        assert_eq!(arena.get(4), None);
        assert_eq!(arena.stats().appends(), 3);
        assert_eq!(arena.stats().peak(), 4);
    }

    #[test]
    fn test_reserve_and_update() {
        let arena: AppendArena<u32> = AppendArena::new();
        let slots = arena.reserve_slots(3);
        assert_eq!(slots, 0..3);
        assert!(arena.update(1, |value| *value = 42));
        assert!(!arena.update(7, |value| *value = 1));
        assert_eq!(arena.snapshot(0..10), vec![0, 42, 0]);
    }

    #[test]
    fn test_concurrent_appends() {
        let arena = Arc::new(AppendArena::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let arena = arena.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        arena.push(t * 1000 + i);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(arena.len(), 400);
        let mut values = arena.snapshot(0..400);
        values.sort_unstable();
        values.dedup();
        assert_eq!(values.len(), 400);
    }
}

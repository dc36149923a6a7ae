use std::collections::HashMap;
use std::hash::Hash;

/// Per-target request counters. A result is applied only if no newer request
/// for the same target started while it was in flight.
#[derive(Debug)]
pub(crate) struct RequestGenerations<K> {
    counters: HashMap<K, u64>,
}

impl<K> Default for RequestGenerations<K> {
    fn default() -> Self {
        Self {
            counters: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash + Clone> RequestGenerations<K> {
    pub(crate) fn begin(&mut self, target: &K) -> u64 {
        let counter = self.counters.entry(target.clone()).or_insert(0);
        *counter = counter.saturating_add(1);
        *counter
    }

    pub(crate) fn is_current(&self, target: &K, generation: u64) -> bool {
        self.counters.get(target).copied() == Some(generation)
    }

    /// In-flight requests started under `from` stay current under `to`.
    pub(crate) fn rename(&mut self, from: &K, to: &K) {
        if let Some(counter) = self.counters.remove(from) {
            let slot = self.counters.entry(to.clone()).or_insert(counter);
            *slot = (*slot).max(counter);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_request_supersedes_older() {
        let mut generations = RequestGenerations::default();
        let first = generations.begin(&"ws");
        let second = generations.begin(&"ws");
        assert!(!generations.is_current(&"ws", first));
        assert!(generations.is_current(&"ws", second));
        assert!(!generations.is_current(&"other", second));
    }

    #[test]
    fn rename_keeps_in_flight_generation_current() {
        let mut generations = RequestGenerations::default();
        let generation = generations.begin(&"pending");
        generations.rename(&"pending", &"durable");
        assert!(generations.is_current(&"durable", generation));
        assert!(!generations.is_current(&"pending", generation));
    }
}

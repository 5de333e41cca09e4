//! SignalBoard - per-process inbox of raised events and signals

use std::collections::BTreeSet;

use dashmap::DashMap;
use tracing::debug;

use crate::domain::ProcessKey;

/// Events and signals raised for suspended processes by external callers
///
/// Handlers only read the board. The watchdog clears a process's entries once
/// that process has been resumed, so later waits start from a clean inbox.
#[derive(Debug, Default)]
pub struct SignalBoard {
    raised: DashMap<ProcessKey, BTreeSet<String>>,
}

impl SignalBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `name` for `key`; returns false if it was already raised
    pub fn raise(&self, key: &ProcessKey, name: impl Into<String>) -> bool {
        let name = name.into();
        debug!(%key, %name, "SignalBoard::raise: called");
        self.raised.entry(*key).or_default().insert(name)
    }

    pub fn is_raised(&self, key: &ProcessKey, name: &str) -> bool {
        self.raised.get(key).is_some_and(|names| names.contains(name))
    }

    /// Which of `names` have been raised for `key`
    pub fn raised_among(&self, key: &ProcessKey, names: &BTreeSet<String>) -> BTreeSet<String> {
        match self.raised.get(key) {
            Some(raised) => names.intersection(raised.value()).cloned().collect(),
            None => BTreeSet::new(),
        }
    }

    /// Drop everything raised for `key`
    pub fn clear(&self, key: &ProcessKey) -> usize {
        self.raised.remove(key).map(|(_, names)| names.len()).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.raised.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raised.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raise_and_clear() {
        let board = SignalBoard::new();
        let key = ProcessKey::new();
        assert!(board.raise(&key, "a"));
        assert!(!board.raise(&key, "a"));
        assert!(board.raise(&key, "b"));
        assert!(board.is_raised(&key, "a"));
        assert!(!board.is_raised(&ProcessKey::new(), "a"));

        let wanted: BTreeSet<String> = ["b", "c"].into_iter().map(String::from).collect();
        assert_eq!(board.raised_among(&key, &wanted), BTreeSet::from(["b".to_string()]));

        assert_eq!(board.clear(&key), 2);
        assert!(board.is_empty());
    }
}

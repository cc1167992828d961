//! Grouping of fetched children by correlation key.

use core::hash::Hash;
use hashbrown::HashMap;

/// Children grouped by the key of the parent they belong to.
///
/// Populated once while a preamble streams its rows, read-only afterwards.
/// Child rows usually arrive clustered by parent, so the list touched by the
/// previous `add` is remembered and reused without hashing while the key
/// repeats.
#[derive(Debug, Clone)]
pub struct EagerLoadingContext<T, K> {
    index: HashMap<K, usize>,
    lists: Vec<Vec<T>>,
    last: Option<(K, usize)>,
}

impl<T, K> Default for EagerLoadingContext<T, K> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            lists: Vec::new(),
            last: None,
        }
    }
}

impl<T, K: Eq + Hash + Clone> EagerLoadingContext<T, K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `item` to the list for `key`, keeping arrival order.
    pub fn add(&mut self, key: K, item: T) {
        if let Some((last_key, slot)) = &self.last
            && *last_key == key
        {
            self.lists[*slot].push(item);
            return;
        }

        let slot = match self.index.get(&key) {
            Some(slot) => *slot,
            None => {
                self.lists.push(Vec::new());
                let slot = self.lists.len() - 1;
                self.index.insert(key.clone(), slot);
                slot
            }
        };
        self.lists[slot].push(item);
        self.last = Some((key, slot));
    }

    /// Items added under `key`, empty when the key was never seen.
    pub fn get_list(&self, key: &K) -> &[T] {
        self.index
            .get(key)
            .map(|slot| self.lists[*slot].as_slice())
            .unwrap_or(&[])
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    /// Total number of items across all keys.
    pub fn item_count(&self) -> usize {
        self.lists.iter().map(Vec::len).sum()
    }
}

impl<T, K: Eq + Hash + Clone> FromIterator<(K, T)> for EagerLoadingContext<T, K> {
    fn from_iter<I: IntoIterator<Item = (K, T)>>(iter: I) -> Self {
        let mut context = Self::new();
        for (key, item) in iter {
            context.add(key, item);
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_yields_empty_list() {
        let context: EagerLoadingContext<&str, i64> = EagerLoadingContext::new();
        assert!(context.get_list(&7).is_empty());
        assert!(context.is_empty());
    }

    #[test]
    fn preserves_arrival_order_per_key() {
        let context: EagerLoadingContext<&str, i64> = [
            (1, "a"),
            (1, "b"),
            (2, "x"),
            (1, "c"),
            (2, "y"),
            (3, "z"),
        ]
        .into_iter()
        .collect();

        assert_eq!(context.get_list(&1), &["a", "b", "c"]);
        assert_eq!(context.get_list(&2), &["x", "y"]);
        assert_eq!(context.get_list(&3), &["z"]);
        assert_eq!(context.len(), 3);
        assert_eq!(context.item_count(), 6);
    }

    #[test]
    fn repeated_key_reuses_cached_list() {
        let mut context = EagerLoadingContext::new();
        for i in 0..100 {
            context.add("parent", i);
        }
        context.add("other", -1);
        context.add("parent", 100);
        assert_eq!(context.get_list(&"parent").len(), 101);
        assert_eq!(context.get_list(&"parent").last(), Some(&100));
        assert_eq!(context.get_list(&"other"), &[-1]);
    }
}

use std::fmt;

use dashmap::{mapref::entry::Entry, DashMap};

/// A two-level map of partition key to item key to item
///
/// Each level shards its locks, so writers to different partitions rarely
/// contend, and lookups only ever walk a single partition.
pub(crate) struct PartitionedMap<T> {
    partitions: DashMap<String, DashMap<String, T>>,
}

impl<T> Default for PartitionedMap<T> {
    fn default() -> Self {
        Self {
            partitions: DashMap::new(),
        }
    }
}

impl<T> fmt::Debug for PartitionedMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PartitionedMap")
            .field("partitions", &self.partitions.len())
            .field("items", &self.len())
            .finish()
    }
}

impl<T> PartitionedMap<T> {
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|items| items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.iter().all(|items| items.is_empty())
    }

    /// Removes everything, returning whether anything was present
    pub fn clear(&self) -> bool {
        let had_items = !self.is_empty();
        self.partitions.clear();
        had_items
    }
}

impl<T> PartitionedMap<T>
where
    T: Clone + PartialEq,
{
    /// Inserts or overwrites an item, returning whether the contents changed
    pub fn insert(&self, partition: &str, key: String, item: T) -> bool {
        let partition = self
            .partitions
            .entry(partition.to_owned())
            .or_default()
            .downgrade();

        let changed = match partition.entry(key) {
            Entry::Occupied(mut existing) => {
                if *existing.get() == item {
                    false
                } else {
                    existing.insert(item);
                    true
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(item);
                true
            }
        };
        changed
    }

    /// Removes an item, dropping its partition once empty
    pub fn remove(&self, partition: &str, key: &str) -> Option<T> {
        let removed = self
            .partitions
            .get(partition)
            .and_then(|items| items.remove(key))
            .map(|(_, item)| item);

        if removed.is_some() {
            self.partitions
                .remove_if(partition, |_, items| items.is_empty());
        }

        removed
    }

    pub fn get(&self, partition: &str, key: &str) -> Option<T> {
        self.partitions
            .get(partition)
            .and_then(|items| items.get(key).map(|item| item.value().clone()))
    }

    /// Clones the items of one partition, or of all partitions
    pub fn values(&self, partition: Option<&str>) -> Vec<T> {
        match partition {
            Some(partition) => self
                .partitions
                .get(partition)
                .map(|items| items.iter().map(|item| item.value().clone()).collect())
                .unwrap_or_default(),
            None => self
                .partitions
                .iter()
                .flat_map(|items| {
                    items
                        .iter()
                        .map(|item| item.value().clone())
                        .collect::<Vec<_>>()
                })
                .collect(),
        }
    }

    /// Whether any item, in any partition, satisfies the predicate
    pub fn any(&self, mut predicate: impl FnMut(&T) -> bool) -> bool {
        self.partitions
            .iter()
            .any(|items| items.iter().any(|item| predicate(item.value())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_reports_changes() {
        let map = PartitionedMap::default();

        assert!(map.insert("p", "k".into(), 1));
        assert!(!map.insert("p", "k".into(), 1));
        assert!(map.insert("p", "k".into(), 2));
        assert_eq!(map.get("p", "k"), Some(2));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn partitions_are_isolated() {
        let map = PartitionedMap::default();
        map.insert("a", "k".into(), 1);
        map.insert("b", "k".into(), 2);

        assert_eq!(map.values(Some("a")), vec![1]);
        assert_eq!(map.values(Some("missing")), Vec::<i32>::new());

        let mut all = map.values(None);
        all.sort_unstable();
        assert_eq!(all, vec![1, 2]);
    }

    #[test]
    fn removing_the_last_item_drops_the_partition() {
        let map = PartitionedMap::default();
        map.insert("a", "k".into(), 1);

        assert_eq!(map.remove("a", "k"), Some(1));
        assert_eq!(map.remove("a", "k"), None);
        assert!(map.is_empty());
        assert_eq!(map.partitions.len(), 0);
    }

    #[test]
    fn clear_reports_prior_contents() {
        let map = PartitionedMap::default();
        assert!(!map.clear());
        map.insert("a", "k".into(), 1);
        assert!(map.clear());
        assert!(map.is_empty());
    }
}

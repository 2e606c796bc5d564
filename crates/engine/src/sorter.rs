//! The external-sorter contract used by bulk index builds.

use quill_types::{DiskLoc, IndexKey};

/// Sink and source for the (key, locator) pairs of a bulk build.
///
/// Production builds hand this to a spilling sorter owned by the database
/// layer; it only needs to accept pairs, sort them, and play them back in
/// (key, locator) order.
pub trait ExternalSorter {
    /// Accepts one pair.
    fn add(&mut self, key: IndexKey, loc: DiskLoc);

    /// Sorts everything accepted so far. Called once, before iteration.
    fn sort(&mut self);

    /// Plays back the sorted pairs.
    fn iter<'a>(&'a self) -> Box<dyn Iterator<Item = (&'a IndexKey, DiskLoc)> + 'a>;

    /// Number of pairs accepted.
    fn len(&self) -> usize;

    /// Whether no pairs were accepted.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory sorter, sufficient below spill scale.
#[derive(Debug, Default)]
pub struct MemSorter {
    entries: Vec<(IndexKey, DiskLoc)>,
}

impl MemSorter {
    /// Creates an empty sorter.
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExternalSorter for MemSorter {
    fn add(&mut self, key: IndexKey, loc: DiskLoc) {
        self.entries.push((key, loc));
    }

    fn sort(&mut self) {
        self.entries.sort_unstable();
    }

    fn iter<'a>(&'a self) -> Box<dyn Iterator<Item = (&'a IndexKey, DiskLoc)> + 'a> {
        Box::new(self.entries.iter().map(|(key, loc)| (key, *loc)))
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_types::single_i64;

    #[test]
    fn sorts_by_key_then_locator() {
        let mut sorter = MemSorter::new();
        sorter.add(single_i64(7), DiskLoc::new(1, 30));
        sorter.add(single_i64(3), DiskLoc::new(1, 20));
        sorter.add(single_i64(7), DiskLoc::new(1, 10));
        sorter.sort();

        let order: Vec<_> = sorter.iter().map(|(k, l)| (k.clone(), l)).collect();
        assert_eq!(
            order,
            vec![
                (single_i64(3), DiskLoc::new(1, 20)),
                (single_i64(7), DiskLoc::new(1, 10)),
                (single_i64(7), DiskLoc::new(1, 30)),
            ]
        );
    }
}

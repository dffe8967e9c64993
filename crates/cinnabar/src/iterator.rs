//! User-facing ordered iteration over the store.
//!
//! A [`StoreIterator`] walks an index iterator and lazily materializes
//! values from the segment files, with an optional byte-prefix filter and
//! reverse traversal. Keys come straight from the index snapshot or
//! cursor; `value()` costs one positional read.

use bytes::Bytes;

use crate::index::IndexIterator;
use crate::options::IteratorOptions;
use crate::store::Store;
use crate::Result;

/// Ordered iterator over live keys, optionally filtered by prefix.
pub struct StoreIterator<'a> {
    store: &'a Store,
    index_iter: Box<dyn IndexIterator>,
    options: IteratorOptions,
}

impl Store {
    /// Opens an iterator positioned at the first matching key.
    pub fn iter(&self, options: IteratorOptions) -> StoreIterator<'_> {
        let index_iter = self.index.iterator(options.reverse);
        let mut it = StoreIterator {
            store: self,
            index_iter,
            options,
        };
        it.skip_to_next();
        it
    }
}

impl StoreIterator<'_> {
    /// Repositions at the first matching key of the traversal order.
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_next();
    }

    /// Positions at the first matching key ≥ `key` (forward) or ≤ `key`
    /// (reverse).
    pub fn seek(&mut self, key: &[u8]) {
        self.index_iter.seek(key);
        self.skip_to_next();
    }

    /// Advances to the next matching key.
    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_next();
    }

    /// Whether the iterator points at an entry.
    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// Key of the current entry.
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Reads the current entry's value from its segment.
    pub fn value(&self) -> Result<Bytes> {
        self.store.value_at_position(self.index_iter.value())
    }

    /// Releases the underlying index iterator.
    pub fn close(&mut self) {
        self.index_iter.close();
    }

    fn skip_to_next(&mut self) {
        if self.options.prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() && !self.index_iter.key().starts_with(&self.options.prefix) {
            self.index_iter.next();
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::options::{IndexBackend, Options};

    fn seeded_store(dir: &std::path::Path, backend: IndexBackend) -> Store {
        let store = Store::open(Options {
            dir_path: dir.to_path_buf(),
            index_backend: backend,
            ..Options::default()
        })
        .unwrap();
        for key in ["apple", "apricot", "banana", "cherry", "citrus", "date"] {
            store
                .put(Bytes::from(key), Bytes::from(format!("v-{key}")))
                .unwrap();
        }
        store
    }

    #[test_case(IndexBackend::BalancedTree; "btree")]
    #[test_case(IndexBackend::AdaptiveRadixTree; "art")]
    #[test_case(IndexBackend::PersistentBPlusTree; "bptree")]
    fn forward_iteration_is_strictly_ascending(backend: IndexBackend) {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), backend);

        let mut it = store.iter(IteratorOptions::default());
        let mut seen = Vec::new();
        while it.valid() {
            seen.push(String::from_utf8(it.key().to_vec()).unwrap());
            assert_eq!(it.value().unwrap(), Bytes::from(format!("v-{}", seen.last().unwrap())));
            it.next();
        }
        it.close();

        assert_eq!(
            seen,
            vec!["apple", "apricot", "banana", "cherry", "citrus", "date"]
        );
        store.close().unwrap();
    }

    #[test_case(IndexBackend::BalancedTree; "btree")]
    #[test_case(IndexBackend::AdaptiveRadixTree; "art")]
    #[test_case(IndexBackend::PersistentBPlusTree; "bptree")]
    fn reverse_iteration_is_strictly_descending(backend: IndexBackend) {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), backend);

        let mut it = store.iter(IteratorOptions {
            reverse: true,
            ..IteratorOptions::default()
        });
        let mut seen = Vec::new();
        while it.valid() {
            seen.push(String::from_utf8(it.key().to_vec()).unwrap());
            it.next();
        }
        it.close();

        assert_eq!(
            seen,
            vec!["date", "citrus", "cherry", "banana", "apricot", "apple"]
        );
        store.close().unwrap();
    }

    #[test]
    fn prefix_filter_visits_exactly_the_matching_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), IndexBackend::BalancedTree);

        let mut it = store.iter(IteratorOptions {
            prefix: b"ap".to_vec(),
            reverse: false,
        });
        let mut seen = Vec::new();
        while it.valid() {
            seen.push(it.key().to_vec());
            it.next();
        }
        it.close();
        assert_eq!(seen, vec![b"apple".to_vec(), b"apricot".to_vec()]);

        // A prefix matching nothing yields an empty iteration.
        let it = store.iter(IteratorOptions {
            prefix: b"zzz".to_vec(),
            reverse: false,
        });
        assert!(!it.valid());
        store.close().unwrap();
    }

    #[test]
    fn seek_then_rewind() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), IndexBackend::BalancedTree);

        let mut it = store.iter(IteratorOptions::default());
        it.seek(b"bz");
        assert!(it.valid());
        assert_eq!(it.key(), b"cherry");

        it.rewind();
        assert_eq!(it.key(), b"apple");
        it.close();
        store.close().unwrap();
    }

    #[test]
    fn reverse_seek_lands_at_or_before_target() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), IndexBackend::BalancedTree);

        let mut it = store.iter(IteratorOptions {
            reverse: true,
            ..IteratorOptions::default()
        });
        it.seek(b"bz");
        assert!(it.valid());
        assert_eq!(it.key(), b"banana");
        it.close();
        store.close().unwrap();
    }

    #[test]
    fn iterator_reflects_overwrites_not_tombstones() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded_store(dir.path(), IndexBackend::BalancedTree);
        store
            .put(Bytes::from("banana"), Bytes::from("ripe"))
            .unwrap();
        store.delete(b"cherry").unwrap();

        let mut it = store.iter(IteratorOptions::default());
        let mut seen = Vec::new();
        while it.valid() {
            seen.push((it.key().to_vec(), it.value().unwrap()));
            it.next();
        }
        it.close();

        let keys: Vec<&[u8]> = seen.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(
            keys,
            vec![
                b"apple".as_slice(),
                b"apricot".as_slice(),
                b"banana".as_slice(),
                b"citrus".as_slice(),
                b"date".as_slice(),
            ]
        );
        assert_eq!(seen[2].1, Bytes::from("ripe"));
        store.close().unwrap();
    }
}

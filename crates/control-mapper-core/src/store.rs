//! Position-keyed metadata store and the index/store pair.
//!
//! The `i`-th vector of a [`VectorIndex`] describes the `i`-th item of its
//! [`MetadataStore`]. [`IndexedCollection`] is the only way to build the two
//! together, which keeps their lengths equal.

use serde::{Deserialize, Serialize};

use crate::index::{IndexError, Neighbor, VectorIndex};

/// Ordered items addressed by vector position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataStore<T> {
    items: Vec<T>,
}

impl<T> MetadataStore<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items }
    }

    pub fn get(&self, position: usize) -> Option<&T> {
        self.items.get(position)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }
}

/// A vector index and its metadata, built and persisted together.
#[derive(Debug, Clone)]
pub struct IndexedCollection<T> {
    index: VectorIndex,
    store: MetadataStore<T>,
}

impl<T> IndexedCollection<T> {
    /// Build from `(item, vector)` pairs in position order.
    pub fn build(entries: Vec<(T, Vec<f32>)>) -> Result<Self, IndexError> {
        let (items, vectors): (Vec<T>, Vec<Vec<f32>>) = entries.into_iter().unzip();
        let index = VectorIndex::build(&vectors)?;
        Ok(Self {
            index,
            store: MetadataStore::new(items),
        })
    }

    /// Reassemble a loaded index and store, checking that they line up.
    pub fn from_parts(index: VectorIndex, store: MetadataStore<T>) -> Result<Self, IndexError> {
        if index.len() != store.len() {
            return Err(IndexError::Corrupt(format!(
                "index has {} vectors but store has {} items",
                index.len(),
                store.len()
            )));
        }
        Ok(Self { index, store })
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    pub fn store(&self) -> &MetadataStore<T> {
        &self.store
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Raw neighbors, sentinels included.
    pub fn neighbors(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.index.search(query, k)
    }

    /// Real matches only, closest first, as `(item, distance)`.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(&T, f32)>, IndexError> {
        Ok(self
            .neighbors(query, k)?
            .into_iter()
            .filter_map(|n| {
                let item = self.store.get(n.index()?)?;
                Some((item, n.distance))
            })
            .collect())
    }
}

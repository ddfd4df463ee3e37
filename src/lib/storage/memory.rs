use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::document::Document;
use crate::query::SortBy;

use super::{DocumentFilter, DocumentStore, GroupedRow, StoreResult, ensure_id, find_in, group_in};

/// Process-local store keeping every bucket in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    buckets: RwLock<BTreeMap<String, BTreeMap<String, Document>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents held for `bucket`.
    pub fn len(&self, bucket: &str) -> usize {
        self.buckets
            .read()
            .get(bucket)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, bucket: &str) -> bool {
        self.len(bucket) == 0
    }
}

impl DocumentStore for MemoryStore {
    fn find(
        &self,
        bucket: &str,
        filter: &DocumentFilter,
        sort: &SortBy,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Document>> {
        let buckets = self.buckets.read();
        Ok(match buckets.get(bucket) {
            Some(documents) => find_in(documents.values(), filter, sort, limit),
            None => Vec::new(),
        })
    }

    fn group(
        &self,
        bucket: &str,
        keys: &[String],
        filter: &DocumentFilter,
        collect: &[String],
    ) -> StoreResult<Vec<GroupedRow>> {
        let buckets = self.buckets.read();
        Ok(match buckets.get(bucket) {
            Some(documents) => group_in(documents.values(), keys, filter, collect),
            None => Vec::new(),
        })
    }

    fn save(&self, bucket: &str, mut document: Document) -> StoreResult<()> {
        let id = ensure_id(&mut document);
        self.buckets
            .write()
            .entry(bucket.to_string())
            .or_default()
            .insert(id, document);
        Ok(())
    }
}

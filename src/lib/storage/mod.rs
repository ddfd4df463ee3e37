//! Store collaborators consumed by buckets and the aggregation engine.
//!
//! A [`DocumentStore`] persists flat documents per bucket and exposes the two
//! read primitives the engine needs: a filtered, sorted `find` and a flat
//! `group` that counts documents per distinct key combination.

mod memory;
mod sqlite;

use std::{
    cmp::Ordering,
    collections::{BTreeMap, btree_map::Entry},
};

use chrono::{DateTime, Utc};
use tracing::warn;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::{
    document::{Document, FieldValue},
    error::StoreError,
    observability,
    query::{Query, SortBy, SortDirection},
    validation::{ID_FIELD, TIMESTAMP_FIELD},
};

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Attempts made for one document write before the failure is surfaced.
pub const DEFAULT_WRITE_ATTEMPTS: usize = 3;

pub trait DocumentStore: Send + Sync {
    /// Documents in `bucket` matching `filter`, ordered by `sort`.
    fn find(
        &self,
        bucket: &str,
        filter: &DocumentFilter,
        sort: &SortBy,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Document>>;

    /// One row per distinct combination of `keys`. Documents missing any key
    /// are skipped.
    fn group(
        &self,
        bucket: &str,
        keys: &[String],
        filter: &DocumentFilter,
        collect: &[String],
    ) -> StoreResult<Vec<GroupedRow>>;

    /// Upserts `document` by its `_id`, assigning one when absent.
    fn save(&self, bucket: &str, document: Document) -> StoreResult<()>;
}

/// Half-open `_timestamp` range plus equality constraints.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentFilter {
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub equals: Vec<(String, FieldValue)>,
}

impl DocumentFilter {
    pub fn from_query(query: &Query) -> Self {
        Self {
            start_at: query.start_at,
            end_at: query.end_at,
            equals: query.filter_by.clone(),
        }
    }

    pub fn matches(&self, document: &Document) -> bool {
        if self.start_at.is_some() || self.end_at.is_some() {
            let Some(timestamp) = document
                .get(TIMESTAMP_FIELD)
                .and_then(FieldValue::as_timestamp)
            else {
                return false;
            };
            if self.start_at.is_some_and(|start| timestamp < start) {
                return false;
            }
            if self.end_at.is_some_and(|end| timestamp >= end) {
                return false;
            }
        }
        self.equals
            .iter()
            .all(|(field, value)| document.get(field) == Some(value))
    }
}

/// One flat group produced by [`DocumentStore::group`].
#[derive(Debug, Clone, PartialEq)]
pub struct GroupedRow {
    pub keys: Vec<(String, FieldValue)>,
    pub count: u64,
    /// Every value seen per collected field, duplicates included.
    pub collected: BTreeMap<String, Vec<FieldValue>>,
}

impl GroupedRow {
    pub fn key_value(&self, key: &str) -> Option<&FieldValue> {
        self.keys
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value)
    }
}

/// Sorts as a document store does: documents lacking `sort.field` come first.
pub fn sort_documents(documents: &mut [Document], sort: &SortBy) {
    documents.sort_by(|lhs, rhs| {
        let ordering = match (lhs.get(&sort.field), rhs.get(&sort.field)) {
            (Some(lhs), Some(rhs)) => lhs.cmp(rhs),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        match sort.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
}

pub(crate) fn find_in<'a, I>(
    documents: I,
    filter: &DocumentFilter,
    sort: &SortBy,
    limit: Option<usize>,
) -> Vec<Document>
where
    I: IntoIterator<Item = &'a Document>,
{
    let mut matched: Vec<Document> = documents
        .into_iter()
        .filter(|document| filter.matches(document))
        .cloned()
        .collect();
    sort_documents(&mut matched, sort);
    if let Some(limit) = limit {
        matched.truncate(limit);
    }
    matched
}

pub(crate) fn group_in<'a, I>(
    documents: I,
    keys: &[String],
    filter: &DocumentFilter,
    collect: &[String],
) -> Vec<GroupedRow>
where
    I: IntoIterator<Item = &'a Document>,
{
    let mut groups: BTreeMap<Vec<FieldValue>, GroupedRow> = BTreeMap::new();
    for document in documents {
        if !filter.matches(document) {
            continue;
        }
        let Some(values) = keys
            .iter()
            .map(|key| document.get(key).cloned())
            .collect::<Option<Vec<_>>>()
        else {
            continue;
        };

        let row = match groups.entry(values) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let keys = keys.iter().cloned().zip(entry.key().iter().cloned()).collect();
                entry.insert(GroupedRow {
                    keys,
                    count: 0,
                    collected: collect
                        .iter()
                        .map(|field| (field.clone(), Vec::new()))
                        .collect(),
                })
            }
        };
        row.count += 1;
        for field in collect {
            if let Some(value) = document.get(field) {
                row.collected
                    .entry(field.clone())
                    .or_default()
                    .push(value.clone());
            }
        }
    }
    groups.into_values().collect()
}

/// Returns the document's identity, minting and recording one if absent.
pub(crate) fn ensure_id(document: &mut Document) -> String {
    if let Some(id) = document.get(ID_FIELD).and_then(FieldValue::as_str) {
        return id.to_string();
    }
    let id = uuid::Uuid::new_v4().simple().to_string();
    document.insert(ID_FIELD.to_string(), FieldValue::String(id.clone()));
    id
}

/// Writes one document, retrying transient failures without backoff.
pub fn save_with_retry(
    store: &dyn DocumentStore,
    bucket: &str,
    document: Document,
    attempts: usize,
) -> StoreResult<()> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        match store.save(bucket, document.clone()) {
            Ok(()) => return Ok(()),
            Err(err) if err.is_transient() && attempt < attempts => {
                warn!(bucket, attempt, error = %err, "transient failure on save, retrying");
                observability::record_save_retry(bucket);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

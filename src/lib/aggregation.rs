//! Query execution against a [`DocumentStore`].
//!
//! Grouped queries ask the store for flat rows, one per distinct key
//! combination, and [`nested_merge`] folds those rows into a tree: one level
//! per grouping key, each level ordered by key value, branch counts summed from
//! their children. The shape of the result does not depend on the order in
//! which the store returned its rows.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
};

use serde_json::{Map, Value};
use tracing::debug;

use crate::{
    document::{Document, FieldValue},
    error::{BucketError, Result},
    query::{Query, QueryKind, SortBy, SortDirection},
    storage::{DocumentFilter, DocumentStore, GroupedRow},
    validation::TIMESTAMP_FIELD,
};

pub const COUNT_FIELD: &str = "_count";
pub const GROUP_COUNT_FIELD: &str = "_group_count";
pub const SUBGROUP_FIELD: &str = "_subgroup";

/// One distinct value of a grouping key.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupNode {
    pub key: String,
    pub value: FieldValue,
    pub count: u64,
    /// Child nodes for the next key, ordered by their value. `None` on leaves.
    pub subgroup: Option<Vec<GroupNode>>,
    /// Sorted, deduplicated values per collected field.
    pub collected: BTreeMap<String, Vec<FieldValue>>,
}

impl GroupNode {
    pub fn is_leaf(&self) -> bool {
        self.subgroup.is_none()
    }

    pub fn group_count(&self) -> Option<usize> {
        self.subgroup.as_ref().map(Vec::len)
    }

    /// Scalar value of `field` on this node, if it has one.
    pub fn field(&self, field: &str) -> Option<FieldValue> {
        if field == self.key {
            return Some(self.value.clone());
        }
        match field {
            COUNT_FIELD => i64::try_from(self.count).ok().map(FieldValue::Integer),
            GROUP_COUNT_FIELD => self
                .group_count()
                .and_then(|count| i64::try_from(count).ok())
                .map(FieldValue::Integer),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut object = Map::new();
        object.insert(self.key.clone(), self.value.to_json());
        object.insert(COUNT_FIELD.to_string(), Value::from(self.count));
        if let Some(children) = &self.subgroup {
            object.insert(GROUP_COUNT_FIELD.to_string(), Value::from(children.len()));
            object.insert(
                SUBGROUP_FIELD.to_string(),
                Value::Array(children.iter().map(GroupNode::to_json).collect()),
            );
        }
        for (field, values) in &self.collected {
            object.insert(
                field.clone(),
                Value::Array(values.iter().map(FieldValue::to_json).collect()),
            );
        }
        Value::Object(object)
    }
}

/// Result of executing a query, before response shaping.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Documents(Vec<Document>),
    Groups(Vec<GroupNode>),
}

pub fn execute(store: &dyn DocumentStore, bucket: &str, query: &Query) -> Result<QueryOutput> {
    let filter = DocumentFilter::from_query(query);
    let kind = query.kind();
    debug!(bucket, kind = kind.as_str(), "executing query");

    match (kind, query.group_by.as_deref(), query.period) {
        (QueryKind::PeriodGrouped, Some(group_by), Some(period)) => {
            let keys = [group_by.to_string(), period.start_field().to_string()];
            if keys[0] == keys[1] {
                return Err(BucketError::Grouping(
                    "Cannot group on two equal keys".into(),
                ));
            }
            let groups = group(store, bucket, &keys, &filter, &query.collect)?;
            Ok(QueryOutput::Groups(sort_and_limit(
                groups,
                query.sort_by.as_ref(),
                query.limit,
            )?))
        }
        (QueryKind::Grouped, Some(group_by), _) => {
            let keys = [group_by.to_string()];
            let groups = group(store, bucket, &keys, &filter, &query.collect)?;
            Ok(QueryOutput::Groups(sort_and_limit(
                groups,
                query.sort_by.as_ref(),
                query.limit,
            )?))
        }
        (QueryKind::Period, _, Some(period)) => {
            let key = period.start_field();
            let groups = group(store, bucket, &[key.to_string()], &filter, &[])?;
            Ok(QueryOutput::Groups(sort_and_limit(
                groups,
                Some(&SortBy::ascending(key)),
                query.limit,
            )?))
        }
        _ => {
            let sort = query
                .sort_by
                .clone()
                .unwrap_or_else(|| SortBy::ascending(TIMESTAMP_FIELD));
            let documents = store.find(bucket, &filter, &sort, query.limit)?;
            Ok(QueryOutput::Documents(documents))
        }
    }
}

fn group(
    store: &dyn DocumentStore,
    bucket: &str,
    keys: &[String],
    filter: &DocumentFilter,
    collect: &[String],
) -> Result<Vec<GroupNode>> {
    let rows = store.group(bucket, keys, filter, collect)?;
    nested_merge(keys, collect, rows)
}

#[derive(Default)]
struct NodeBuilder {
    count: u64,
    children: BTreeMap<FieldValue, NodeBuilder>,
    collected: BTreeMap<String, BTreeSet<FieldValue>>,
}

impl NodeBuilder {
    fn collect(&mut self, collected: &BTreeMap<String, Vec<FieldValue>>) {
        for (field, values) in collected {
            self.collected
                .entry(field.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }

    fn finish(self, keys: &[String], value: FieldValue) -> GroupNode {
        let collected = self
            .collected
            .into_iter()
            .map(|(field, values)| (field, values.into_iter().collect()))
            .collect();

        if keys.len() == 1 {
            return GroupNode {
                key: keys[0].clone(),
                value,
                count: self.count,
                subgroup: None,
                collected,
            };
        }

        let subgroup: Vec<GroupNode> = finish_level(self.children, &keys[1..]);
        GroupNode {
            key: keys[0].clone(),
            value,
            count: subgroup.iter().map(|child| child.count).sum(),
            subgroup: Some(subgroup),
            collected,
        }
    }
}

fn finish_level(level: BTreeMap<FieldValue, NodeBuilder>, keys: &[String]) -> Vec<GroupNode> {
    level
        .into_iter()
        .map(|(value, builder)| builder.finish(keys, value))
        .collect()
}

/// Folds flat grouped rows into a tree with one level per entry of `keys`,
/// outer key first.
pub fn nested_merge(
    keys: &[String],
    collect: &[String],
    rows: Vec<GroupedRow>,
) -> Result<Vec<GroupNode>> {
    if keys.is_empty() {
        return Err(BucketError::Grouping(
            "at least one grouping key is required".into(),
        ));
    }

    let mut root: BTreeMap<FieldValue, NodeBuilder> = BTreeMap::new();
    for row in rows {
        let values = keys
            .iter()
            .map(|key| {
                row.key_value(key).cloned().ok_or_else(|| {
                    BucketError::Grouping(format!("grouped row is missing key {key}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let mut collected = row.collected;
        collected.retain(|field, _| collect.contains(field));

        let mut level = &mut root;
        for (depth, value) in values.into_iter().enumerate() {
            let node = level.entry(value).or_default();
            node.collect(&collected);
            if depth + 1 == keys.len() {
                node.count += row.count;
            }
            level = &mut node.children;
        }
    }

    Ok(finish_level(root, keys))
}

/// Orders top-level groups by `sort` and truncates them to `limit`.
pub fn sort_and_limit(
    mut groups: Vec<GroupNode>,
    sort: Option<&SortBy>,
    limit: Option<usize>,
) -> Result<Vec<GroupNode>> {
    if let Some(sort) = sort {
        sort_groups(&mut groups, sort)?;
    }
    if let Some(limit) = limit {
        groups.truncate(limit);
    }
    Ok(groups)
}

/// Stable sort of top-level groups. Every group must carry `sort.field`.
pub fn sort_groups(groups: &mut Vec<GroupNode>, sort: &SortBy) -> Result<()> {
    let mut keyed = std::mem::take(groups)
        .into_iter()
        .map(|group| match group.field(&sort.field) {
            Some(value) => Ok((value, group)),
            None => Err(BucketError::InvalidSort(format!(
                "Invalid sort key {}",
                sort.field
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    keyed.sort_by(|(lhs, _), (rhs, _)| {
        let ordering: Ordering = lhs.cmp(rhs);
        match sort.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
    groups.extend(keyed.into_iter().map(|(_, group)| group));
    Ok(())
}

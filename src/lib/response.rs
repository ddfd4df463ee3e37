//! JSON shaping of query results, one builder per query classification.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{
    aggregation::{COUNT_FIELD, GROUP_COUNT_FIELD, GroupNode, QueryOutput},
    document::{Document, FieldValue, document_to_json},
    query::{Period, Query, QueryKind},
};

pub const START_AT_FIELD: &str = "_start_at";
pub const END_AT_FIELD: &str = "_end_at";
pub const VALUES_FIELD: &str = "values";

/// Envelope returned by `GET /{bucket}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub data: Vec<Value>,
}

impl QueryResponse {
    pub fn build(query: &Query, output: QueryOutput) -> Self {
        let data = match output {
            QueryOutput::Documents(documents) => build_simple(&documents),
            QueryOutput::Groups(groups) => match (query.kind(), query.period) {
                (QueryKind::PeriodGrouped, Some(period)) => build_period_group(&groups, period),
                (QueryKind::Period, Some(period)) => build_period(&groups, period),
                _ => build_grouped(&groups),
            },
        };
        Self { data }
    }
}

pub fn build_simple(documents: &[Document]) -> Vec<Value> {
    documents.iter().map(document_to_json).collect()
}

pub fn build_grouped(groups: &[GroupNode]) -> Vec<Value> {
    groups.iter().map(GroupNode::to_json).collect()
}

pub fn build_period(groups: &[GroupNode], period: Period) -> Vec<Value> {
    groups
        .iter()
        .filter_map(|group| period_entry(group, period))
        .collect()
}

pub fn build_period_group(groups: &[GroupNode], period: Period) -> Vec<Value> {
    groups
        .iter()
        .map(|group| {
            let mut object = Map::new();
            object.insert(group.key.clone(), group.value.to_json());
            object.insert(COUNT_FIELD.into(), Value::from(group.count));
            let values: Vec<Value> = group
                .subgroup
                .iter()
                .flatten()
                .filter_map(|child| period_entry(child, period))
                .collect();
            object.insert(GROUP_COUNT_FIELD.into(), Value::from(values.len()));
            object.insert(VALUES_FIELD.into(), Value::Array(values));
            for (field, collected) in &group.collected {
                object.insert(
                    field.clone(),
                    Value::Array(collected.iter().map(FieldValue::to_json).collect()),
                );
            }
            Value::Object(object)
        })
        .collect()
}

// Period starts are always instants; anything else cannot be bounded.
fn period_entry(node: &GroupNode, period: Period) -> Option<Value> {
    let start = node.value.as_timestamp()?;
    let mut object = Map::new();
    object.insert(START_AT_FIELD.into(), Value::from(start.to_rfc3339()));
    object.insert(
        END_AT_FIELD.into(),
        Value::from(period.end_of(start).to_rfc3339()),
    );
    object.insert(COUNT_FIELD.into(), Value::from(node.count));
    Some(Value::Object(object))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{TimeZone, Utc};

    use serde_json::json;

    use super::*;

    fn leaf(key: &str, value: FieldValue, count: u64) -> GroupNode {
        GroupNode {
            key: key.into(),
            value,
            count,
            subgroup: None,
            collected: BTreeMap::new(),
        }
    }

    #[test]
    fn period_entries_carry_both_bounds() {
        let start = Utc.with_ymd_and_hms(2013, 1, 28, 0, 0, 0).unwrap();
        let weeks = build_period(&[leaf("_week_start_at", start.into(), 4)], Period::Week);
        assert_eq!(
            weeks,
            vec![json!({
                "_start_at": "2013-01-28T00:00:00+00:00",
                "_end_at": "2013-02-04T00:00:00+00:00",
                "_count": 4
            })]
        );

        let month_start = Utc.with_ymd_and_hms(2013, 1, 1, 0, 0, 0).unwrap();
        let months = build_period(&[leaf("_month_start_at", month_start.into(), 1)], Period::Month);
        assert_eq!(months[0]["_end_at"], json!("2013-02-01T00:00:00+00:00"));
    }

    #[test]
    fn period_grouped_nodes_list_their_periods_as_values() {
        let start = Utc.with_ymd_and_hms(2013, 4, 1, 0, 0, 0).unwrap();
        let mut collected = BTreeMap::new();
        collected.insert("name".to_string(), vec![FieldValue::from("amy")]);
        let node = GroupNode {
            key: "kind".into(),
            value: "a".into(),
            count: 3,
            subgroup: Some(vec![leaf("_week_start_at", start.into(), 3)]),
            collected,
        };
        assert_eq!(
            build_period_group(&[node], Period::Week),
            vec![json!({
                "kind": "a",
                "_count": 3,
                "_group_count": 1,
                "name": ["amy"],
                "values": [{
                    "_start_at": "2013-04-01T00:00:00+00:00",
                    "_end_at": "2013-04-08T00:00:00+00:00",
                    "_count": 3
                }]
            })]
        );
    }

    #[test]
    fn envelope_serialises_under_data() {
        let response = QueryResponse::build(
            &Query::default(),
            QueryOutput::Documents(vec![Document::new()]),
        );
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"data": [{}]})
        );
    }
}

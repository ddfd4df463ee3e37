//! Ordered validation rules for read requests.
//!
//! Each rule inspects the raw request parameters and reports zero or more
//! messages. Rules run in a fixed order and the first rule reporting anything
//! decides the outcome: callers see exactly one message, the first one that
//! rule produced.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::{
    error::{BucketError, Result},
    query::RequestParams,
    timeutils,
    validation::{key_is_internal, key_is_valid, value_is_valid_datetime_string},
};

pub const RECOGNISED_PARAMETERS: &[&str] = &[
    "start_at",
    "end_at",
    "filter_by",
    "period",
    "group_by",
    "sort_by",
    "limit",
    "collect",
];

pub const MINIMUM_SPAN_DAYS: i64 = 7;

/// Per-bucket policy the restricted rules depend on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationContext {
    pub allow_raw_queries: bool,
}

impl ValidationContext {
    pub fn new(allow_raw_queries: bool) -> Self {
        Self { allow_raw_queries }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub message: String,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            message: String::new(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            message: message.into(),
        }
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(BucketError::Validation(self.message))
        }
    }
}

/// A single named validation rule.
#[derive(Clone, Copy)]
pub struct Rule {
    pub name: &'static str,
    pub check: fn(&RequestParams, &ValidationContext) -> Vec<String>,
}

impl Rule {
    const fn new(
        name: &'static str,
        check: fn(&RequestParams, &ValidationContext) -> Vec<String>,
    ) -> Self {
        Self { name, check }
    }

    pub fn run(&self, params: &RequestParams, context: &ValidationContext) -> Vec<String> {
        (self.check)(params, context)
    }
}

pub const ALWAYS: &[Rule] = &[
    Rule::new("unrecognised_parameter", unrecognised_parameter),
    Rule::new("period_pairing", period_pairing),
    Rule::new("start_at_syntax", start_at_syntax),
    Rule::new("end_at_syntax", end_at_syntax),
    Rule::new("filter_by_syntax", filter_by_syntax),
    Rule::new("period_value", period_value),
    Rule::new("sort_by_syntax", sort_by_syntax),
    Rule::new("group_by_syntax", group_by_syntax),
    Rule::new("limit", limit),
    Rule::new("collect_requires_group_by", collect_requires_group_by),
    Rule::new("collect_syntax", collect_syntax),
];

pub const RESTRICTED: &[Rule] = &[
    Rule::new("no_raw_query", no_raw_query),
    Rule::new("minimum_span", minimum_span),
    Rule::new("midnight_alignment", midnight_alignment),
    Rule::new("monday_alignment", monday_alignment),
    Rule::new("first_of_month_alignment", first_of_month_alignment),
];

/// The rules applied for `context`, in evaluation order.
pub fn rules_for(context: &ValidationContext) -> Vec<Rule> {
    let mut rules = ALWAYS.to_vec();
    if !context.allow_raw_queries {
        rules.extend_from_slice(RESTRICTED);
    }
    rules
}

pub fn validate_query_args(params: &RequestParams, context: &ValidationContext) -> ValidationResult {
    for rule in rules_for(context) {
        let errors = rule.run(params, context);
        if let Some(message) = errors.into_iter().next() {
            debug!(rule = rule.name, %message, "query rejected");
            return ValidationResult::invalid(message);
        }
    }
    ValidationResult::valid()
}

fn unrecognised_parameter(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    params
        .keys()
        .filter(|key| !RECOGNISED_PARAMETERS.contains(key))
        .map(|key| format!("An unrecognised parameter was provided: {key}"))
        .collect()
}

fn period_pairing(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    if params.contains("start_at") != params.contains("end_at") {
        vec!["both start_at and end_at are required to define a time range".into()]
    } else {
        Vec::new()
    }
}

fn datetime_syntax(params: &RequestParams, name: &str) -> Vec<String> {
    match params.get(name) {
        Some(value) if !value_is_valid_datetime_string(value) => {
            vec![format!("{name} is not a valid datetime")]
        }
        _ => Vec::new(),
    }
}

fn start_at_syntax(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    datetime_syntax(params, "start_at")
}

fn end_at_syntax(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    datetime_syntax(params, "end_at")
}

fn filter_by_syntax(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    let mut errors = Vec::new();
    for filter in params.get_all("filter_by") {
        let Some((field, _)) = filter.split_once(':') else {
            errors.push(
                "filter_by must be a field name and value separated by a colon (:) \
                 eg. authority:Westminster"
                    .to_string(),
            );
            continue;
        };
        if filter.starts_with('$') {
            errors.push("filter_by must not start with a $".to_string());
        } else if !key_is_valid(field) {
            errors.push("Cannot filter by an invalid field name".to_string());
        }
    }
    errors
}

fn period_value(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    match params.get("period") {
        Some("week") | Some("month") | None => Vec::new(),
        Some(_) => {
            vec!["Unrecognised grouping for period. Supported periods include: week, month".into()]
        }
    }
}

fn sort_by_syntax(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    let Some(sort_by) = params.get("sort_by") else {
        return Vec::new();
    };
    if params.contains("period") && !params.contains("group_by") {
        return vec![
            "Cannot sort for period queries without group_by. \
             Period queries are always sorted by time."
                .into(),
        ];
    }
    let Some((field, direction)) = sort_by.split_once(':') else {
        return vec![
            "sort_by must be a field name and sort direction separated by a colon (:) \
             eg. authority:ascending"
                .into(),
        ];
    };
    if !matches!(direction, "ascending" | "descending") {
        return vec![
            "Unrecognised sort direction. Supported directions include: ascending, descending"
                .into(),
        ];
    }
    if !key_is_valid(field) {
        return vec!["Cannot sort by an invalid field name".into()];
    }
    Vec::new()
}

fn group_by_syntax(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    match params.get("group_by") {
        Some(field) if !key_is_valid(field) => {
            vec!["Cannot group by an invalid field name".into()]
        }
        Some(field) if key_is_internal(field) => vec![
            "Cannot group by internal fields, internal fields start with an underscore".into(),
        ],
        _ => Vec::new(),
    }
}

fn limit(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    match params.get("limit") {
        Some(value) if value.parse::<usize>().is_err() => {
            vec!["limit must be a non-negative integer".into()]
        }
        _ => Vec::new(),
    }
}

fn collect_requires_group_by(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    if params.contains("collect") && !params.contains("group_by") {
        vec!["collect is only allowed when grouping".into()]
    } else {
        Vec::new()
    }
}

fn collect_syntax(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    let group_by = params.get("group_by");
    let mut errors = Vec::new();
    for field in params.get_all("collect") {
        if !key_is_valid(field) {
            errors.push("Cannot collect an invalid field name".to_string());
        } else if key_is_internal(field) {
            errors.push(
                "Cannot collect internal fields, internal fields start with an underscore"
                    .to_string(),
            );
        } else if Some(field) == group_by {
            errors.push("Cannot collect by field that is used for group_by".to_string());
        }
    }
    errors
}

fn no_raw_query(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    if params.contains("group_by") || params.contains("period") {
        Vec::new()
    } else {
        vec!["querying for raw data is not allowed".into()]
    }
}

/// `name` parsed to UTC, only when it passes the strict syntax check.
fn valid_instant(params: &RequestParams, name: &str) -> Option<DateTime<Utc>> {
    params
        .get(name)
        .filter(|value| value_is_valid_datetime_string(value))
        .and_then(timeutils::parse_time_string)
}

fn range_bounds(params: &RequestParams) -> Vec<(&'static str, DateTime<Utc>)> {
    ["start_at", "end_at"]
        .into_iter()
        .filter_map(|name| valid_instant(params, name).map(|instant| (name, instant)))
        .collect()
}

fn minimum_span(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    match (
        valid_instant(params, "start_at"),
        valid_instant(params, "end_at"),
    ) {
        (Some(start), Some(end)) if end - start < Duration::days(MINIMUM_SPAN_DAYS) => {
            vec![format!(
                "The minimum time span for a query is {MINIMUM_SPAN_DAYS} days"
            )]
        }
        _ => Vec::new(),
    }
}

fn midnight_alignment(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    range_bounds(params)
        .into_iter()
        .filter(|(_, instant)| !timeutils::is_midnight(*instant))
        .map(|(name, _)| format!("{name} must be midnight"))
        .collect()
}

fn monday_alignment(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    if params.get("period") != Some("week") {
        return Vec::new();
    }
    range_bounds(params)
        .into_iter()
        .filter(|(_, instant)| !timeutils::is_monday(*instant))
        .map(|(name, _)| format!("{name} must be a monday"))
        .collect()
}

fn first_of_month_alignment(params: &RequestParams, _: &ValidationContext) -> Vec<String> {
    if params.get("period") != Some("month") {
        return Vec::new();
    }
    range_bounds(params)
        .into_iter()
        .filter(|(_, instant)| !timeutils::is_first_of_month(*instant))
        .map(|(name, _)| format!("{name} must be the first of the month"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPEN: ValidationContext = ValidationContext {
        allow_raw_queries: true,
    };
    const CLOSED: ValidationContext = ValidationContext {
        allow_raw_queries: false,
    };

    fn params(pairs: &[(&str, &str)]) -> RequestParams {
        pairs.iter().copied().collect()
    }

    fn message(pairs: &[(&str, &str)], context: &ValidationContext) -> Option<String> {
        let result = validate_query_args(&params(pairs), context);
        (!result.is_valid).then_some(result.message)
    }

    #[test]
    fn empty_request_is_valid_when_raw_queries_allowed() {
        assert_eq!(message(&[], &OPEN), None);
    }

    #[test]
    fn unknown_parameters_are_rejected() {
        assert_eq!(
            message(&[("foo", "bar")], &OPEN).as_deref(),
            Some("An unrecognised parameter was provided: foo")
        );
    }

    #[test]
    fn first_failing_rule_wins() {
        let reported = message(&[("foo", "bar"), ("sort_by", "nocolon")], &OPEN);
        assert_eq!(
            reported.as_deref(),
            Some("An unrecognised parameter was provided: foo")
        );

        let reported = message(&[("limit", "x"), ("group_by", "$bad")], &OPEN);
        assert_eq!(
            reported.as_deref(),
            Some("Cannot group by an invalid field name")
        );
    }

    #[test]
    fn range_needs_both_ends() {
        assert_eq!(
            message(&[("start_at", "2013-01-01T00:00:00Z")], &OPEN).as_deref(),
            Some("both start_at and end_at are required to define a time range")
        );
    }

    #[test]
    fn datetime_syntax_checks_start_before_end() {
        let reported = message(&[("start_at", "bad"), ("end_at", "worse")], &OPEN);
        assert_eq!(reported.as_deref(), Some("start_at is not a valid datetime"));

        let reported = message(
            &[("start_at", "2013-01-01T00:00:00Z"), ("end_at", "2013-02-31T00:00:00Z")],
            &OPEN,
        );
        assert_eq!(reported.as_deref(), Some("end_at is not a valid datetime"));
    }

    #[test]
    fn filter_by_requires_colon_and_valid_field() {
        assert!(message(&[("filter_by", "novalue")], &OPEN).is_some());
        assert_eq!(
            message(&[("filter_by", "$where:1")], &OPEN).as_deref(),
            Some("filter_by must not start with a $")
        );
        assert_eq!(
            message(&[("filter_by", "bad-field:1")], &OPEN).as_deref(),
            Some("Cannot filter by an invalid field name")
        );
        assert_eq!(message(&[("filter_by", "authority:West:minster")], &OPEN), None);
    }

    #[test]
    fn period_must_be_week_or_month() {
        assert!(message(&[("period", "fortnight")], &OPEN).is_some());
        assert_eq!(message(&[("period", "month")], &OPEN), None);
    }

    #[test]
    fn sort_by_rules() {
        assert_eq!(
            message(&[("period", "week"), ("sort_by", "a:ascending")], &OPEN).as_deref(),
            Some(
                "Cannot sort for period queries without group_by. \
                 Period queries are always sorted by time."
            )
        );
        assert!(message(&[("sort_by", "field")], &OPEN).is_some());
        assert_eq!(
            message(&[("sort_by", "field:upwards")], &OPEN).as_deref(),
            Some("Unrecognised sort direction. Supported directions include: ascending, descending")
        );
        assert_eq!(
            message(&[("sort_by", "b@d:ascending")], &OPEN).as_deref(),
            Some("Cannot sort by an invalid field name")
        );
        assert_eq!(
            message(
                &[("period", "week"), ("group_by", "a_field"), ("sort_by", "_count:descending")],
                &OPEN
            ),
            None
        );
    }

    #[test]
    fn group_by_must_be_public_field() {
        assert_eq!(
            message(&[("group_by", "_timestamp")], &OPEN).as_deref(),
            Some("Cannot group by internal fields, internal fields start with an underscore")
        );
    }

    #[test]
    fn limit_must_be_non_negative_integer() {
        assert!(message(&[("limit", "-3")], &OPEN).is_some());
        assert!(message(&[("limit", "three")], &OPEN).is_some());
        assert_eq!(message(&[("limit", "0")], &OPEN), None);
    }

    #[test]
    fn collect_rules() {
        assert_eq!(
            message(&[("collect", "name")], &OPEN).as_deref(),
            Some("collect is only allowed when grouping")
        );
        assert_eq!(
            message(&[("group_by", "kind"), ("collect", "kind")], &OPEN).as_deref(),
            Some("Cannot collect by field that is used for group_by")
        );
        assert_eq!(
            message(&[("group_by", "kind"), ("collect", "_id")], &OPEN).as_deref(),
            Some("Cannot collect internal fields, internal fields start with an underscore")
        );
        assert_eq!(
            message(&[("group_by", "kind"), ("collect", "name")], &OPEN),
            None
        );
    }

    #[test]
    fn restricted_buckets_reject_raw_queries() {
        assert_eq!(
            message(&[], &CLOSED).as_deref(),
            Some("querying for raw data is not allowed")
        );
        assert_eq!(message(&[("group_by", "kind")], &CLOSED), None);
    }

    #[test]
    fn restricted_buckets_need_a_week_long_span() {
        let short = [
            ("period", "week"),
            ("start_at", "2013-01-07T00:00:00Z"),
            ("end_at", "2013-01-10T00:00:00Z"),
        ];
        assert_eq!(
            message(&short, &CLOSED).as_deref(),
            Some("The minimum time span for a query is 7 days")
        );
        assert_eq!(message(&short, &OPEN), None);

        let week = [
            ("period", "week"),
            ("start_at", "2013-01-07T00:00:00Z"),
            ("end_at", "2013-01-14T00:00:00Z"),
        ];
        assert_eq!(message(&week, &CLOSED), None);
    }

    #[test]
    fn restricted_bounds_must_be_midnight() {
        let reported = message(
            &[
                ("group_by", "kind"),
                ("start_at", "2013-01-07T10:00:00Z"),
                ("end_at", "2013-01-21T00:00:00Z"),
            ],
            &CLOSED,
        );
        assert_eq!(reported.as_deref(), Some("start_at must be midnight"));
    }

    #[test]
    fn restricted_week_bounds_must_be_mondays() {
        let reported = message(
            &[
                ("period", "week"),
                ("start_at", "2013-01-07T00:00:00Z"),
                ("end_at", "2013-01-20T00:00:00Z"),
            ],
            &CLOSED,
        );
        assert_eq!(reported.as_deref(), Some("end_at must be a monday"));
    }

    #[test]
    fn restricted_month_bounds_must_be_first_of_month() {
        let reported = message(
            &[
                ("period", "month"),
                ("start_at", "2013-01-02T00:00:00Z"),
                ("end_at", "2013-03-01T00:00:00Z"),
            ],
            &CLOSED,
        );
        assert_eq!(
            reported.as_deref(),
            Some("start_at must be the first of the month")
        );
        assert_eq!(
            message(
                &[
                    ("period", "month"),
                    ("start_at", "2013-01-01T00:00:00Z"),
                    ("end_at", "2013-03-01T00:00:00Z"),
                ],
                &CLOSED,
            ),
            None
        );
    }

    #[test]
    fn offsets_are_normalised_before_alignment_checks() {
        // 01:00 at +01:00 is midnight UTC on a Monday.
        let reported = message(
            &[
                ("period", "week"),
                ("start_at", "2013-01-07T01:00:00+01:00"),
                ("end_at", "2013-01-14T00:00:00Z"),
            ],
            &CLOSED,
        );
        assert_eq!(reported, None);
    }

    #[test]
    fn restricted_rules_only_apply_to_restricted_buckets() {
        assert_eq!(rules_for(&OPEN).len(), ALWAYS.len());
        assert_eq!(rules_for(&CLOSED).len(), ALWAYS.len() + RESTRICTED.len());
        assert_eq!(rules_for(&CLOSED)[ALWAYS.len()].name, "no_raw_query");
    }
}

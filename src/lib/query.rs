use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};

use crate::{
    document::FieldValue,
    error::{BucketError, Result},
    query_validation::{self, ValidationContext},
    record::{MONTH_START_FIELD, WEEK_START_FIELD},
    timeutils,
};

/// Raw, possibly repeated, query-string parameters in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParams {
    pairs: Vec<(String, String)>,
}

impl RequestParams {
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        Self { pairs }
    }

    /// First value supplied for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
            .collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.pairs.iter().any(|(name, _)| name == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.pairs.iter().map(|(name, _)| name.as_str())
    }
}

impl<K, V> FromIterator<(K, V)> for RequestParams
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::new(
            iter.into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    Week,
    Month,
}

impl Period {
    pub fn as_str(self) -> &'static str {
        match self {
            Period::Week => "week",
            Period::Month => "month",
        }
    }

    /// Stored field carrying the start of this period for each record.
    pub fn start_field(self) -> &'static str {
        match self {
            Period::Week => WEEK_START_FIELD,
            Period::Month => MONTH_START_FIELD,
        }
    }

    pub fn end_of(self, start: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Period::Week => timeutils::next_week(start),
            Period::Month => timeutils::next_month(start),
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "week" => Ok(Period::Week),
            "month" => Ok(Period::Month),
            _ => Err(format!("unsupported period '{value}'")),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Ascending => "ascending",
            SortDirection::Descending => "descending",
        }
    }
}

impl FromStr for SortDirection {
    type Err = BucketError;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value {
            "ascending" => Ok(SortDirection::Ascending),
            "descending" => Ok(SortDirection::Descending),
            _ => Err(BucketError::InvalidSort(format!(
                "Invalid sort direction {value}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortBy {
    pub field: String,
    pub direction: SortDirection,
}

impl SortBy {
    pub fn new(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            field: field.into(),
            direction,
        }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Ascending)
    }

    pub fn descending(field: impl Into<String>) -> Self {
        Self::new(field, SortDirection::Descending)
    }
}

/// A validated read request against one bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub filter_by: Vec<(String, FieldValue)>,
    pub period: Option<Period>,
    pub group_by: Option<String>,
    pub sort_by: Option<SortBy>,
    pub limit: Option<usize>,
    pub collect: Vec<String>,
}

impl Query {
    /// Runs the validator chain over `params` and, if it passes, parses them.
    pub fn parse(params: &RequestParams, context: &ValidationContext) -> Result<Self> {
        query_validation::validate_query_args(params, context).into_result()?;
        parse_request_args(params)
    }

    pub fn is_raw_query(&self) -> bool {
        self.group_by.is_none() && self.period.is_none()
    }

    pub fn is_period_grouped_query(&self) -> bool {
        self.group_by.is_some() && self.period.is_some()
    }

    pub fn is_grouped_query(&self) -> bool {
        self.group_by.is_some()
    }

    pub fn is_period_query(&self) -> bool {
        self.period.is_some()
    }

    pub fn kind(&self) -> QueryKind {
        if self.is_period_grouped_query() {
            QueryKind::PeriodGrouped
        } else if self.is_grouped_query() {
            QueryKind::Grouped
        } else if self.is_period_query() {
            QueryKind::Period
        } else {
            QueryKind::Raw
        }
    }
}

/// Execution path for a query, resolved in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    PeriodGrouped,
    Grouped,
    Period,
    Raw,
}

impl QueryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::PeriodGrouped => "period_grouped",
            QueryKind::Grouped => "grouped",
            QueryKind::Period => "period",
            QueryKind::Raw => "raw",
        }
    }
}

/// Extracts typed fields from raw parameters without applying validation rules.
pub fn parse_request_args(params: &RequestParams) -> Result<Query> {
    let start_at = params.get("start_at").map(parse_instant).transpose()?;
    let end_at = params.get("end_at").map(parse_instant).transpose()?;

    let filter_by = params
        .get_all("filter_by")
        .into_iter()
        .map(parse_filter)
        .collect::<Result<Vec<_>>>()?;

    let period = params
        .get("period")
        .map(|value| value.parse::<Period>().map_err(BucketError::Parse))
        .transpose()?;

    let sort_by = params
        .get("sort_by")
        .map(|value| {
            let (field, direction) = value.split_once(':').ok_or_else(|| {
                BucketError::Parse(format!("sort_by '{value}' is missing a direction"))
            })?;
            Ok::<_, BucketError>(SortBy::new(field, direction.parse()?))
        })
        .transpose()?;

    // A zero limit means no limit.
    let limit = params
        .get("limit")
        .map(|value| {
            value
                .parse::<usize>()
                .map_err(|_| BucketError::Parse(format!("limit '{value}' is not an integer")))
        })
        .transpose()?
        .filter(|limit| *limit > 0);

    Ok(Query {
        start_at,
        end_at,
        filter_by,
        period,
        group_by: params.get("group_by").map(str::to_string),
        sort_by,
        limit,
        collect: params
            .get_all("collect")
            .into_iter()
            .map(str::to_string)
            .collect(),
    })
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>> {
    timeutils::parse_time_string(value)
        .ok_or_else(|| BucketError::Parse(format!("{value} is not a valid timestamp")))
}

// Only the literal booleans are coerced; numeric-looking strings stay strings.
fn parse_filter(value: &str) -> Result<(String, FieldValue)> {
    let (field, raw) = value
        .split_once(':')
        .ok_or_else(|| BucketError::Parse(format!("filter_by '{value}' is missing a value")))?;
    let value = match raw {
        "true" => FieldValue::Bool(true),
        "false" => FieldValue::Bool(false),
        other => FieldValue::String(other.to_string()),
    };
    Ok((field.to_string(), value))
}

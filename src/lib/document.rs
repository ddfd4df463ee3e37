use std::{cmp::Ordering, collections::BTreeMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Number, Value};

/// A stored document: field name to scalar value.
pub type Document = BTreeMap<String, FieldValue>;

/// The scalar values a record field may hold.
///
/// Ordering is total across variants (numbers, then strings, then booleans,
/// then instants) so values can key grouping maps and sort result rows.
#[derive(Debug, Clone)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl FieldValue {
    fn rank(&self) -> u8 {
        match self {
            FieldValue::Integer(_) | FieldValue::Float(_) => 0,
            FieldValue::String(_) => 1,
            FieldValue::Bool(_) => 2,
            FieldValue::Timestamp(_) => 3,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(value) => Some(*value),
            _ => None,
        }
    }

    /// Converts a JSON scalar. Nulls, arrays and objects have no field value.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(flag) => Some(FieldValue::Bool(*flag)),
            Value::Number(number) => number
                .as_i64()
                .map(FieldValue::Integer)
                .or_else(|| number.as_f64().map(FieldValue::Float)),
            Value::String(text) => Some(FieldValue::String(text.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// JSON rendering used in API responses; instants become RFC 3339 strings.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Integer(value) => Value::from(*value),
            FieldValue::Float(value) => Number::from_f64(*value)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            FieldValue::String(value) => Value::String(value.clone()),
            FieldValue::Bool(value) => Value::Bool(*value),
            FieldValue::Timestamp(value) => Value::String(value.to_rfc3339()),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl Ord for FieldValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (FieldValue::Integer(lhs), FieldValue::Integer(rhs)) => lhs.cmp(rhs),
            (FieldValue::Float(lhs), FieldValue::Float(rhs)) => compare_floats(*lhs, *rhs),
            (FieldValue::Integer(lhs), FieldValue::Float(rhs)) => compare_integer_float(*lhs, *rhs),
            (FieldValue::Float(lhs), FieldValue::Integer(rhs)) => {
                compare_integer_float(*rhs, *lhs).reverse()
            }
            (FieldValue::String(lhs), FieldValue::String(rhs)) => lhs.cmp(rhs),
            (FieldValue::Bool(lhs), FieldValue::Bool(rhs)) => lhs.cmp(rhs),
            (FieldValue::Timestamp(lhs), FieldValue::Timestamp(rhs)) => lhs.cmp(rhs),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Numeric order with `-0.0 == 0.0`. Negative NaNs sort below every number and
/// positive NaNs above.
fn compare_floats(lhs: f64, rhs: f64) -> Ordering {
    match lhs.partial_cmp(&rhs) {
        Some(ordering) => ordering,
        None => lhs.total_cmp(&rhs),
    }
}

/// Compares without rounding `int` through `f64`, which loses precision past 2^53.
fn compare_integer_float(int: i64, float: f64) -> Ordering {
    // 2^63, the first float above i64::MAX.
    const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;

    if float.is_nan() {
        return if float.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if float >= I64_UPPER {
        return Ordering::Less;
    }
    if float < -I64_UPPER {
        return Ordering::Greater;
    }
    let whole = float.trunc();
    match int.cmp(&(whole as i64)) {
        Ordering::Equal => compare_floats(0.0, float - whole),
        ordering => ordering,
    }
}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for FieldValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FieldValue {}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(value) => write!(f, "{value}"),
            FieldValue::Float(value) => write!(f, "{value}"),
            FieldValue::String(value) => f.write_str(value),
            FieldValue::Bool(value) => write!(f, "{value}"),
            FieldValue::Timestamp(value) => f.write_str(&value.to_rfc3339()),
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

/// Lossless encoding used by persistent stores so instants survive a round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub(crate) enum StoredValue {
    Integer(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl From<&FieldValue> for StoredValue {
    fn from(value: &FieldValue) -> Self {
        match value {
            FieldValue::Integer(value) => StoredValue::Integer(*value),
            FieldValue::Float(value) => StoredValue::Float(*value),
            FieldValue::String(value) => StoredValue::String(value.clone()),
            FieldValue::Bool(value) => StoredValue::Bool(*value),
            FieldValue::Timestamp(value) => StoredValue::Timestamp(*value),
        }
    }
}

impl From<StoredValue> for FieldValue {
    fn from(value: StoredValue) -> Self {
        match value {
            StoredValue::Integer(value) => FieldValue::Integer(value),
            StoredValue::Float(value) => FieldValue::Float(value),
            StoredValue::String(value) => FieldValue::String(value),
            StoredValue::Bool(value) => FieldValue::Bool(value),
            StoredValue::Timestamp(value) => FieldValue::Timestamp(value),
        }
    }
}

pub fn document_to_json(document: &Document) -> Value {
    Value::Object(
        document
            .iter()
            .map(|(key, value)| (key.clone(), value.to_json()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integers_and_floats_compare_numerically() {
        assert_eq!(FieldValue::Integer(2), FieldValue::Float(2.0));
        assert!(FieldValue::Integer(2) < FieldValue::Float(2.5));
        assert!(FieldValue::Float(-1.0) < FieldValue::Integer(0));
        assert!(FieldValue::Float(-0.5) < FieldValue::Integer(0));
        assert_eq!(FieldValue::Float(-0.0), FieldValue::Integer(0));
        assert_eq!(FieldValue::Float(-0.0), FieldValue::Float(0.0));
        assert!(FieldValue::Integer(i64::MAX) < FieldValue::Float(9.3e18));
        assert!(FieldValue::Integer(i64::MIN) > FieldValue::Float(f64::NEG_INFINITY));
    }

    #[test]
    fn large_integers_compare_exactly_against_floats() {
        let below = FieldValue::Integer(9_007_199_254_740_992);
        let above = FieldValue::Integer(9_007_199_254_740_993);
        let float = FieldValue::Float(9_007_199_254_740_992.0);
        assert_eq!(below, float);
        assert!(float < above);
        assert!(below < above);

        let orders = [
            [above.clone(), below.clone(), float.clone()],
            [below.clone(), float.clone(), above.clone()],
            [float.clone(), above.clone(), below.clone()],
        ];
        for values in orders {
            let mut counts: BTreeMap<FieldValue, usize> = BTreeMap::new();
            for value in values {
                *counts.entry(value).or_default() += 1;
            }
            assert_eq!(
                counts.into_iter().map(|(_, count)| count).collect::<Vec<_>>(),
                vec![2, 1]
            );
        }
    }

    #[test]
    fn variants_order_by_rank() {
        let mut values = vec![
            FieldValue::Bool(false),
            FieldValue::from("a"),
            FieldValue::Integer(10),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                FieldValue::Integer(10),
                FieldValue::from("a"),
                FieldValue::Bool(false)
            ]
        );
    }

    #[test]
    fn json_scalars_convert_and_structures_do_not() {
        assert_eq!(FieldValue::from_json(&json!(3)), Some(FieldValue::Integer(3)));
        assert_eq!(FieldValue::from_json(&json!("x")), Some(FieldValue::from("x")));
        assert!(FieldValue::from_json(&json!(null)).is_none());
        assert!(FieldValue::from_json(&json!([1])).is_none());
        assert!(FieldValue::from_json(&json!({"a": 1})).is_none());
    }

    #[test]
    fn stored_encoding_keeps_timestamps_distinct_from_strings() {
        let instant = chrono::TimeZone::with_ymd_and_hms(&Utc, 2013, 4, 1, 0, 0, 0).unwrap();
        let encoded = serde_json::to_string(&StoredValue::from(&FieldValue::Timestamp(instant)))
            .expect("encode");
        let decoded: StoredValue = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(FieldValue::from(decoded), FieldValue::Timestamp(instant));
    }
}

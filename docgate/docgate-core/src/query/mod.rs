//! In-memory evaluation of MongoDB-shaped criteria.
//!
//! Criteria objects are parsed into a [`Filter`] tree and evaluated against
//! JSON documents. Only a bounded subset of the query language is understood;
//! anything else is rejected with [`QueryError::UnsupportedOperator`] so the
//! caller can hand the query to a store that does understand it.

mod projection;
mod sort;

pub use projection::Projection;
pub use sort::{compare_values, sort_documents, SortKey, SortOrder};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueryError {
    #[error("unsupported query operator: {0}")]
    UnsupportedOperator(String),
    #[error("malformed query: {0}")]
    Malformed(String),
}

pub type QueryResult<T> = std::result::Result<T, QueryError>;

/// Parsed criteria.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Field { path: String, condition: Condition },
}

/// Condition applied to the value(s) found at a field path.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Exists(bool),
    All(Vec<Value>),
    Size(usize),
    Type(Vec<JsonType>),
    Not(Box<Condition>),
    /// Several operators on one field, e.g. `{ $gte: 1, $lt: 5 }`.
    Every(Vec<Condition>),
}

/// BSON type classes understood by `$type`, collapsed onto JSON's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonType {
    Null,
    Bool,
    Number,
    String,
    Object,
    Array,
}

impl JsonType {
    /// Accepts the string aliases and the numeric codes of the types JSON
    /// can carry.
    fn parse(spec: &Value) -> QueryResult<Self> {
        let parsed = match spec {
            Value::String(alias) => match alias.as_str() {
                "null" => Some(JsonType::Null),
                "bool" => Some(JsonType::Bool),
                "number" | "double" | "int" | "long" | "decimal" => Some(JsonType::Number),
                "string" => Some(JsonType::String),
                "object" => Some(JsonType::Object),
                "array" => Some(JsonType::Array),
                _ => None,
            },
            Value::Number(code) => match code.as_u64() {
                Some(1 | 16 | 18 | 19) => Some(JsonType::Number),
                Some(2) => Some(JsonType::String),
                Some(3) => Some(JsonType::Object),
                Some(4) => Some(JsonType::Array),
                Some(8) => Some(JsonType::Bool),
                Some(10) => Some(JsonType::Null),
                _ => None,
            },
            _ => None,
        };
        parsed.ok_or_else(|| QueryError::Malformed(format!("unknown $type {}", spec)))
    }

    fn describes(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (JsonType::Null, Value::Null)
                | (JsonType::Bool, Value::Bool(_))
                | (JsonType::Number, Value::Number(_))
                | (JsonType::String, Value::String(_))
                | (JsonType::Object, Value::Object(_))
                | (JsonType::Array, Value::Array(_))
        )
    }
}

/// Shorthand for parsing `criteria` and testing a single document.
pub fn matches(criteria: &Value, doc: &Value) -> QueryResult<bool> {
    Ok(Filter::parse(criteria)?.matches(doc))
}

/// Cursor modifiers. A `limit` of zero means no limit, as in the store.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOptions {
    #[serde(default)]
    pub sort: Vec<SortKey>,
    #[serde(default)]
    pub skip: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct QueryOutcome {
    /// Matching documents after sort, skip, limit and projection.
    pub docs: Vec<Value>,
    /// Number of matching documents, ignoring skip and limit.
    pub total: usize,
}

/// Run a query over a set of documents: filter, sort, skip/limit, project.
pub fn execute<'a, I>(
    docs: I,
    criteria: &Value,
    projection: &Value,
    options: &QueryOptions,
) -> QueryResult<QueryOutcome>
where
    I: IntoIterator<Item = &'a Value>,
{
    let filter = Filter::parse(criteria)?;
    let projection = Projection::parse(projection)?;
    let mut matched: Vec<Value> = docs
        .into_iter()
        .filter(|d| filter.matches(d))
        .cloned()
        .collect();
    let total = matched.len();
    sort_documents(&mut matched, &options.sort);
    let limit = options.limit.filter(|l| *l > 0).unwrap_or(usize::MAX);
    let docs = matched
        .iter()
        .skip(options.skip)
        .take(limit)
        .map(|d| projection.apply(d))
        .collect();
    Ok(QueryOutcome { docs, total })
}

impl Filter {
    /// A filter that matches every document (`{}`).
    pub fn everything() -> Self {
        Filter::And(Vec::new())
    }

    pub fn parse(criteria: &Value) -> QueryResult<Self> {
        let obj = criteria
            .as_object()
            .ok_or_else(|| QueryError::Malformed("criteria must be an object".to_string()))?;
        let mut clauses = Vec::with_capacity(obj.len());
        for (key, value) in obj {
            let clause = match key.as_str() {
                "$and" => Filter::And(Self::parse_list(key, value)?),
                "$or" => Filter::Or(Self::parse_list(key, value)?),
                "$nor" => Filter::Nor(Self::parse_list(key, value)?),
                op if op.starts_with('$') => {
                    return Err(QueryError::UnsupportedOperator(op.to_string()))
                }
                path => Filter::Field {
                    path: path.to_string(),
                    condition: Condition::parse(value)?,
                },
            };
            clauses.push(clause);
        }
        Ok(if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            Filter::And(clauses)
        })
    }

    fn parse_list(op: &str, value: &Value) -> QueryResult<Vec<Filter>> {
        let items = value
            .as_array()
            .ok_or_else(|| QueryError::Malformed(format!("{} requires an array", op)))?;
        // the store rejects an empty combinator, so we do too
        if items.is_empty() {
            return Err(QueryError::Malformed(format!("{} requires a non-empty array", op)));
        }
        items.iter().map(Self::parse).collect()
    }

    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            Filter::And(clauses) => clauses.iter().all(|c| c.matches(doc)),
            Filter::Or(clauses) => clauses.iter().any(|c| c.matches(doc)),
            Filter::Nor(clauses) => !clauses.iter().any(|c| c.matches(doc)),
            Filter::Field { path, condition } => {
                let found = resolve_path(doc, path);
                condition.matches(&found)
            }
        }
    }
}

impl Condition {
    pub fn parse(value: &Value) -> QueryResult<Self> {
        let Some(obj) = value.as_object() else {
            return Ok(Condition::Eq(value.clone()));
        };
        let operators = obj.keys().filter(|k| k.starts_with('$')).count();
        if operators == 0 {
            // literal subdocument
            return Ok(Condition::Eq(value.clone()));
        }
        if operators != obj.len() {
            return Err(QueryError::Malformed(
                "cannot mix operators and fields in one condition".to_string(),
            ));
        }
        let mut conditions = obj
            .iter()
            .map(|(op, arg)| Self::parse_operator(op, arg))
            .collect::<QueryResult<Vec<_>>>()?;
        Ok(if conditions.len() == 1 {
            conditions.remove(0)
        } else {
            Condition::Every(conditions)
        })
    }

    fn parse_operator(op: &str, arg: &Value) -> QueryResult<Self> {
        let list = |arg: &Value| -> QueryResult<Vec<Value>> {
            arg.as_array()
                .cloned()
                .ok_or_else(|| QueryError::Malformed(format!("{} requires an array", op)))
        };
        Ok(match op {
            "$eq" => Condition::Eq(arg.clone()),
            "$ne" => Condition::Ne(arg.clone()),
            "$in" => Condition::In(list(arg)?),
            "$nin" => Condition::Nin(list(arg)?),
            "$gt" => Condition::Gt(arg.clone()),
            "$gte" => Condition::Gte(arg.clone()),
            "$lt" => Condition::Lt(arg.clone()),
            "$lte" => Condition::Lte(arg.clone()),
            "$exists" => Condition::Exists(truthy(arg)),
            "$all" => Condition::All(list(arg)?),
            "$size" => Condition::Size(
                arg.as_u64()
                    .ok_or_else(|| QueryError::Malformed("$size requires a count".to_string()))?
                    as usize,
            ),
            "$type" => Condition::Type(match arg {
                Value::Array(specs) => specs.iter().map(JsonType::parse).collect::<QueryResult<_>>()?,
                spec => vec![JsonType::parse(spec)?],
            }),
            "$not" => {
                if !arg.is_object() {
                    return Err(QueryError::Malformed(
                        "$not requires an operator expression".to_string(),
                    ));
                }
                Condition::Not(Box::new(Self::parse(arg)?))
            }
            other => return Err(QueryError::UnsupportedOperator(other.to_string())),
        })
    }

    /// `found` holds every value reachable at the field path; it is empty when
    /// the field is missing.
    fn matches(&self, found: &[&Value]) -> bool {
        match self {
            Condition::Eq(expected) => equals_any(found, expected),
            Condition::Ne(expected) => !equals_any(found, expected),
            Condition::In(options) => options.iter().any(|o| equals_any(found, o)),
            Condition::Nin(options) => !options.iter().any(|o| equals_any(found, o)),
            Condition::Gt(bound) => compares_any(found, bound, |o| o == Ordering::Greater),
            Condition::Gte(bound) => compares_any(found, bound, |o| o != Ordering::Less),
            Condition::Lt(bound) => compares_any(found, bound, |o| o == Ordering::Less),
            Condition::Lte(bound) => compares_any(found, bound, |o| o != Ordering::Greater),
            Condition::Exists(wanted) => found.is_empty() != *wanted,
            Condition::All(required) => {
                !required.is_empty() && required.iter().all(|r| equals_any(found, r))
            }
            Condition::Size(len) => found
                .iter()
                .any(|v| v.as_array().map_or(false, |a| a.len() == *len)),
            // an array field also matches by its elements, except for `array`
            Condition::Type(types) => found.iter().any(|v| {
                types.iter().any(|t| {
                    t.describes(v)
                        || *t != JsonType::Array
                            && v.as_array().map_or(false, |items| items.iter().any(|i| t.describes(i)))
                })
            }),
            Condition::Not(inner) => !inner.matches(found),
            Condition::Every(conditions) => conditions.iter().all(|c| c.matches(found)),
        }
    }
}

/// Collect every value reachable at a dotted path. Arrays along the way are
/// traversed element-wise, and a numeric segment also indexes into them.
pub fn resolve_path<'a>(doc: &'a Value, path: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    let segments: Vec<&str> = path.split('.').collect();
    collect(doc, &segments, &mut out);
    out
}

fn collect<'a>(value: &'a Value, segments: &[&str], out: &mut Vec<&'a Value>) {
    let Some((head, rest)) = segments.split_first() else {
        out.push(value);
        return;
    };
    match value {
        Value::Object(map) => {
            if let Some(next) = map.get(*head) {
                collect(next, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = head.parse::<usize>() {
                if let Some(next) = items.get(index) {
                    collect(next, rest, out);
                }
            }
            for item in items.iter().filter(|i| i.is_object()) {
                collect(item, segments, out);
            }
        }
        _ => {}
    }
}

fn equals_any(found: &[&Value], expected: &Value) -> bool {
    if found.is_empty() {
        return expected.is_null();
    }
    found.iter().any(|v| {
        values_equal(v, expected)
            || v.as_array()
                .map_or(false, |items| items.iter().any(|i| values_equal(i, expected)))
    })
}

fn compares_any(found: &[&Value], bound: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    let check = |v: &Value| {
        sort::type_rank(Some(v)) == sort::type_rank(Some(bound))
            && accept(compare_values(Some(v), Some(bound)))
    };
    found.iter().copied().any(|v| match v {
        Value::Array(items) if !bound.is_array() => items.iter().any(|i| check(i)),
        _ => check(v),
    })
}

/// Structural equality with numbers compared by value, so `1` equals `1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map_or(false, |other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

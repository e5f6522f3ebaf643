use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use super::{resolve_path, QueryError, QueryResult};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SortKey {
    pub path: String,
    pub order: SortOrder,
}

impl SortKey {
    pub fn asc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn desc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            order: SortOrder::Descending,
        }
    }

    /// Parse a store-style sort object such as `{ "title": 1, "updatedAt": -1 }`.
    /// Key order is significant.
    pub fn parse_spec(spec: &Value) -> QueryResult<Vec<SortKey>> {
        let Some(obj) = spec.as_object() else {
            return Err(QueryError::Malformed("sort must be an object".to_string()));
        };
        obj.iter()
            .map(|(path, dir)| match dir.as_i64() {
                Some(1) => Ok(SortKey::asc(path.as_str())),
                Some(-1) => Ok(SortKey::desc(path.as_str())),
                // { $meta: "textScore" } and friends
                _ if dir.is_object() => Err(QueryError::UnsupportedOperator(format!(
                    "sort on {}",
                    path
                ))),
                _ => Err(QueryError::Malformed(format!("bad sort direction for {}", path))),
            })
            .collect()
    }
}

/// Stable multi-key sort. Later keys only break ties left by earlier ones and
/// documents equal on every key keep their relative order.
pub fn sort_documents(docs: &mut [Value], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for key in keys {
            let left = resolve_path(a, &key.path).into_iter().next();
            let right = resolve_path(b, &key.path).into_iter().next();
            let ord = compare_values(left, right);
            let ord = match key.order {
                SortOrder::Ascending => ord,
                SortOrder::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Rank of a value's kind in the cross-type ordering. Missing and null share
/// the lowest rank.
pub(crate) fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order over JSON values: null < numbers < strings < objects < arrays < booleans.
pub fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_values(Some(l), Some(r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Some(Value::Object(x)), Some(Value::Object(y))) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y) {
                let ord = lk.cmp(rk).then_with(|| compare_values(Some(lv), Some(rv)));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

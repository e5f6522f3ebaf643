use serde_json::{Map, Value};

use super::{truthy, QueryError, QueryResult};

/// Field selection applied to query results.
///
/// Inclusion and exclusion are mutually exclusive. The mode is chosen by the
/// first entry other than `_id` (or by `_id` itself when it is the only one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    All,
    Include { fields: Vec<String>, keep_id: bool },
    Exclude { fields: Vec<String> },
}

impl Projection {
    pub fn parse(spec: &Value) -> QueryResult<Self> {
        let obj = match spec {
            Value::Null => return Ok(Projection::All),
            Value::Object(obj) if obj.is_empty() => return Ok(Projection::All),
            Value::Object(obj) => obj,
            _ => return Err(QueryError::Malformed("projection must be an object".to_string())),
        };
        if let Some((field, _)) = obj.iter().find(|(_, v)| v.is_object() || v.is_array()) {
            return Err(QueryError::UnsupportedOperator(format!("projection of {}", field)));
        }
        let mode = obj
            .iter()
            .find(|(k, _)| k.as_str() != "_id")
            .or_else(|| obj.iter().next())
            .map_or(false, |(_, v)| truthy(v));
        let keep_id = obj.get("_id").map_or(true, truthy);
        if mode {
            Ok(Projection::Include {
                fields: obj
                    .iter()
                    .filter(|(k, v)| k.as_str() != "_id" && truthy(v))
                    .map(|(k, _)| k.clone())
                    .collect(),
                keep_id,
            })
        } else {
            Ok(Projection::Exclude {
                fields: obj
                    .iter()
                    .filter(|(_, v)| !truthy(v))
                    .map(|(k, _)| k.clone())
                    .collect(),
            })
        }
    }

    pub fn apply(&self, doc: &Value) -> Value {
        match self {
            Projection::All => doc.clone(),
            Projection::Include { fields, keep_id } => {
                let mut out = Map::new();
                if *keep_id {
                    if let Some(id) = doc.get("_id") {
                        out.insert("_id".to_string(), id.clone());
                    }
                }
                if let Some(src) = doc.as_object() {
                    for field in fields {
                        copy_path(src, &mut out, field);
                    }
                }
                Value::Object(out)
            }
            Projection::Exclude { fields } => {
                let mut out = doc.clone();
                for field in fields {
                    remove_path(&mut out, field);
                }
                out
            }
        }
    }
}

fn copy_path(src: &Map<String, Value>, dest: &mut Map<String, Value>, path: &str) {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    let Some(value) = src.get(head) else { return };
    match rest {
        None => {
            dest.insert(head.to_string(), value.clone());
        }
        Some(rest) => {
            // a dotted path through a scalar selects nothing
            if !value.is_object() && !value.is_array() {
                return;
            }
            let slot = dest.entry(head.to_string()).or_insert(Value::Null);
            copy_within(value, slot, rest);
        }
    }
}

/// Project `rest` out of `value` into `slot`, descending into every element
/// of an array. Scalars inside arrays are dropped.
fn copy_within(value: &Value, slot: &mut Value, rest: &str) {
    match value {
        Value::Object(map) => {
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            if let Value::Object(inner) = slot {
                copy_path(map, inner, rest);
            }
        }
        Value::Array(items) => {
            let kept: Vec<&Value> = items
                .iter()
                .filter(|i| i.is_object() || i.is_array())
                .collect();
            // slots from an earlier path line up with the same kept elements
            let aligned = slot.as_array().map_or(false, |s| s.len() == kept.len());
            if !aligned {
                *slot = Value::Array(vec![Value::Null; kept.len()]);
            }
            if let Value::Array(slots) = slot {
                for (item, slot) in kept.into_iter().zip(slots.iter_mut()) {
                    copy_within(item, slot, rest);
                }
            }
        }
        _ => {}
    }
}

fn remove_path(value: &mut Value, path: &str) {
    match value {
        Value::Object(map) => match path.split_once('.') {
            None => {
                map.remove(path);
            }
            Some((head, rest)) => {
                if let Some(inner) = map.get_mut(head) {
                    remove_path(inner, rest);
                }
            }
        },
        Value::Array(items) => {
            for item in items {
                remove_path(item, path);
            }
        }
        _ => {}
    }
}

//! Optimize index: the ids of every document a document refers to.
//!
//! Relationship fields store foreign ids under keys ending in `Id` (one) or
//! `Ids` (many), at any depth, including inside area widgets. Widget `_id`s
//! are internal to the document and are not collected, and attachment objects
//! are skipped entirely.

use serde_json::Value;
use std::collections::BTreeSet;

pub const OPTIMIZE_IDS: &str = "optimizeIds";

/// Sorted, deduplicated ids reachable from `doc`, excluding its own id.
pub fn optimize_ids(doc: &Value) -> Vec<String> {
    let mut ids = BTreeSet::new();
    if let Value::Object(map) = doc {
        for (key, value) in map {
            if key == OPTIMIZE_IDS {
                continue;
            }
            walk(key, value, &mut ids);
        }
    }
    if let Some(own) = doc.get("_id").and_then(Value::as_str) {
        ids.remove(own);
    }
    ids.into_iter().collect()
}

/// Ids previously recorded on a document.
pub fn stored_optimize_ids(doc: &Value) -> Vec<String> {
    doc.get(OPTIMIZE_IDS)
        .and_then(Value::as_array)
        .map(|ids| ids.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

fn walk(key: &str, value: &Value, ids: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("attachment") {
                return;
            }
            for (k, v) in map {
                walk(k, v, ids);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(key, item, ids);
            }
        }
        Value::String(id) if is_relationship_key(key) => {
            ids.insert(id.clone());
        }
        _ => {}
    }
}

fn is_relationship_key(key: &str) -> bool {
    key != "_id" && (key.ends_with("Id") || key.ends_with("Ids"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_collects_relationships_at_any_depth() {
        let doc = json!({
            "_id": "page1",
            "type": "default-page",
            "authorIds": ["u2", "u1", "u2"],
            "main": {
                "_id": "area1",
                "metaType": "area",
                "items": [
                    { "_id": "w1", "type": "image", "imageIds": ["img1"] },
                    { "_id": "w2", "type": "article-widget", "pieceIds": ["a1", "page1"] },
                ]
            },
            "heroId": "img2",
            "optimizeIds": ["stale"],
        });
        assert_eq!(optimize_ids(&doc), vec!["a1", "img1", "img2", "u1", "u2"]);
    }

    #[test]
    fn test_skips_attachments_and_plain_fields() {
        let doc = json!({
            "_id": "a1",
            "title": "Hello",
            "tags": ["x"],
            "file": { "_id": "att1", "type": "attachment", "ownerIds": ["nope"] },
        });
        assert!(optimize_ids(&doc).is_empty());
    }

    #[test]
    fn test_stored_ids() {
        let doc = json!({ "optimizeIds": ["a", 3, "b"] });
        assert_eq!(stored_optimize_ids(&doc), vec!["a", "b"]);
        assert!(stored_optimize_ids(&json!({})).is_empty());
    }
}

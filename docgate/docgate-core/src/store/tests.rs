use super::*;
use crate::query::SortKey;
use serde_json::json;
use tempfile::TempDir;

fn seeded(dir: &TempDir) -> DocumentStore {
    let mut store = DocumentStore::new(dir.path()).unwrap();
    store
        .save(json!({ "_id": "u1", "type": "user", "title": "Kim" }))
        .unwrap();
    store
        .save(json!({
            "_id": "a1",
            "type": "article",
            "title": "Hello",
            "published": true,
            "authorIds": ["u1"],
        }))
        .unwrap();
    store
        .save(json!({ "_id": "a2", "type": "article", "title": "Draft", "published": false }))
        .unwrap();
    store
}

#[test]
fn test_save_indexes_and_persists() {
    let dir = TempDir::new().unwrap();
    let store = seeded(&dir);

    let a1 = store.get("a1").unwrap();
    assert_eq!(a1[OPTIMIZE_IDS], json!(["u1"]));
    assert!(a1["updatedAt"].is_string());
    assert!(dir.path().join("a1.json").exists());

    let reopened = DocumentStore::new(dir.path()).unwrap();
    assert_eq!(reopened.len(), 3);
    assert_eq!(reopened.get("a1").unwrap()["title"], "Hello");
}

#[test]
fn test_insert_assigns_id() {
    let dir = TempDir::new().unwrap();
    let mut store = DocumentStore::new(dir.path()).unwrap();
    let id = store.insert(json!({ "type": "article" })).unwrap();
    assert!(Uuid::parse_str(&id).is_ok());
    assert_eq!(store.get(&id).unwrap()["_id"], id.as_str());
    assert!(store.insert(json!(["not", "an", "object"])).is_err());
}

#[test]
fn test_rejects_unsafe_ids() {
    let dir = TempDir::new().unwrap();
    let mut store = DocumentStore::new(dir.path()).unwrap();
    assert!(store.save(json!({ "_id": "../escape" })).is_err());
    assert!(store.save(json!({ "_id": "" })).is_err());
    assert!(store.save(json!({ "title": "no id" })).is_err());
    assert!(store.is_empty());
}

#[test]
fn test_skips_unreadable_files() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("broken.json"), b"{ nope").unwrap();
    std::fs::write(dir.path().join("noid.json"), b"{\"title\": \"x\"}").unwrap();
    std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
    std::fs::write(dir.path().join("ok.json"), b"{\"_id\": \"ok\"}").unwrap();
    let store = DocumentStore::new(dir.path()).unwrap();
    assert_eq!(store.len(), 1);
    assert!(store.get("ok").is_some());
}

#[test]
fn test_find_and_count() {
    let dir = TempDir::new().unwrap();
    let store = seeded(&dir);
    let options = QueryOptions {
        sort: vec![SortKey::asc("title")],
        ..Default::default()
    };
    let docs = store
        .find(&json!({ "type": "article" }), &json!({ "title": 1 }), &options)
        .unwrap();
    assert_eq!(
        docs,
        vec![
            json!({ "_id": "a2", "title": "Draft" }),
            json!({ "_id": "a1", "title": "Hello" }),
        ]
    );
    assert_eq!(store.count(&json!({ "published": true })).unwrap(), 1);

    let err = store
        .find(&json!({ "$where": "1" }), &Value::Null, &QueryOptions::default())
        .unwrap_err();
    assert!(err.to_string().contains("$where"));
}

#[test]
fn test_remove() {
    let dir = TempDir::new().unwrap();
    let mut store = seeded(&dir);
    assert!(store.remove("a2").unwrap().is_some());
    assert!(store.remove("a2").unwrap().is_none());
    assert!(!dir.path().join("a2.json").exists());
}

#[test]
fn test_migration_only_touches_stale_documents() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("p1.json"),
        serde_json::to_vec(&json!({ "_id": "p1", "heroId": "img1" })).unwrap(),
    )
    .unwrap();
    std::fs::write(
        dir.path().join("p2.json"),
        serde_json::to_vec(&json!({ "_id": "p2", "optimizeIds": [] })).unwrap(),
    )
    .unwrap();

    let mut store = DocumentStore::new(dir.path()).unwrap();
    assert_eq!(store.migrate_optimize_ids().unwrap(), 1);
    assert_eq!(store.get("p1").unwrap()[OPTIMIZE_IDS], json!(["img1"]));
    assert_eq!(store.migrate_optimize_ids().unwrap(), 0);

    let reopened = DocumentStore::new(dir.path()).unwrap();
    assert_eq!(reopened.get("p1").unwrap()[OPTIMIZE_IDS], json!(["img1"]));
}

#[tokio::test]
async fn test_source_over_shared_store() {
    let dir = TempDir::new().unwrap();
    let source = RwLock::new(seeded(&dir));
    let docs = DocumentSource::find(
        &source,
        &json!({ "_id": { "$in": ["u1", "a1"] } }),
        &Value::Null,
        &QueryOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(docs.len(), 2);
    assert_eq!(DocumentSource::count(&source, &json!({})).await.unwrap(), 3);
}

use super::*;
use crate::principal::{PermissionSet, Principal};
use crate::query::SortKey;
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::AtomicUsize;

// Mock source that records every query it answers
struct CountingSource {
    docs: Vec<Value>,
    finds: AtomicUsize,
    last: parking_lot::Mutex<Option<Value>>,
}

impl CountingSource {
    fn new(docs: Vec<Value>) -> Self {
        Self {
            docs,
            finds: AtomicUsize::new(0),
            last: parking_lot::Mutex::new(None),
        }
    }

    fn finds(&self) -> usize {
        self.finds.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for CountingSource {
    async fn find(
        &self,
        criteria: &Value,
        projection: &Value,
        options: &QueryOptions,
    ) -> Result<Vec<Value>> {
        self.finds.fetch_add(1, Ordering::SeqCst);
        *self.last.lock() = Some(criteria.clone());
        Ok(query::execute(&self.docs, criteria, projection, options)?.docs)
    }

    async fn count(&self, criteria: &Value) -> Result<usize> {
        Ok(query::execute(&self.docs, criteria, &Value::Null, &QueryOptions::default())?.total)
    }
}

fn corpus() -> Vec<Value> {
    vec![
        json!({ "_id": "home", "type": "home-page", "optimizeIds": ["a1", "a2", "img1"] }),
        json!({ "_id": "a1", "type": "article", "title": "Beta", "rank": 2, "optimizeIds": ["img1"] }),
        json!({ "_id": "a2", "type": "article", "title": "Alpha", "rank": 1, "optimizeIds": [] }),
        json!({ "_id": "img1", "type": "image", "title": "Logo" }),
        json!({ "_id": "other", "type": "article", "title": "Elsewhere" }),
    ]
}

fn request() -> RequestContext {
    RequestContext::new(Principal::anonymous(Some("s1"), &PermissionSet::new()))
}

fn setup() -> (Arc<CountingSource>, QueryOptimizer) {
    let source = Arc::new(CountingSource::new(corpus()));
    let optimizer = QueryOptimizer::new(source.clone(), Arc::new(OptimizerStats::default()));
    (source, optimizer)
}

fn home() -> Value {
    corpus().remove(0)
}

#[tokio::test]
async fn test_optimize_fetches_once() {
    let (source, optimizer) = setup();
    let req = request();

    let fetched = optimizer.optimize(&req, &[home()]).await.unwrap();
    assert_eq!(fetched, 3);
    assert_eq!(source.finds(), 1);
    assert_eq!(
        *source.last.lock(),
        Some(json!({ "_id": { "$in": ["a1", "a2", "img1"] } }))
    );
    assert_eq!(req.optimize_cache().ids().await, vec!["a1", "a2", "img1"]);

    // already cached: no second fetch
    assert_eq!(optimizer.optimize(&req, &[home()]).await.unwrap(), 0);
    assert_eq!(source.finds(), 1);
}

#[tokio::test]
async fn test_optimize_does_not_refetch_missing_ids() {
    let (source, optimizer) = setup();
    let req = request();
    let outer = json!({ "_id": "p", "optimizeIds": ["a1", "gone"] });

    assert_eq!(optimizer.optimize(&req, &[outer.clone()]).await.unwrap(), 1);
    assert!(!req.optimize_cache().contains("gone").await);
    assert_eq!(optimizer.optimize(&req, &[outer]).await.unwrap(), 0);
    assert_eq!(source.finds(), 1);
}

#[tokio::test]
async fn test_caches_are_per_request() {
    let (source, optimizer) = setup();
    let first = request();
    let second = request();
    optimizer.optimize(&first, &[home()]).await.unwrap();
    assert!(second.optimize_cache().is_empty().await);
    optimizer.optimize(&second, &[home()]).await.unwrap();
    assert_eq!(source.finds(), 2);
}

#[tokio::test]
async fn test_compatibility_rules() {
    let (_, optimizer) = setup();
    let req = request();
    optimizer.optimize(&req, &[home()]).await.unwrap();
    let none = Value::Null;
    let opts = QueryOptions::default();

    let ok = |c: Value| {
        let optimizer = &optimizer;
        let req = &req;
        let none = none.clone();
        let opts = opts.clone();
        async move { optimizer.optimize_compatible(req, &c, &none, &opts).await }
    };

    assert!(ok(json!({ "_id": "a1" })).await);
    assert!(ok(json!({ "_id": { "$in": ["a1", "img1"] }, "published": true })).await);
    assert!(!ok(json!({ "_id": { "$in": ["a1", "other"] } })).await);
    assert!(!ok(json!({ "_id": { "$in": ["a1"], "$ne": "a2" } })).await);
    assert!(!ok(json!({ "type": "article" })).await);
    assert!(ok(json!({ "$and": [{ "type": "article" }, { "_id": "a2" }] })).await);
    assert!(ok(json!({ "$or": [{ "_id": "a1" }, { "_id": { "$in": ["a2"] } }] })).await);
    assert!(!ok(json!({ "$or": [{ "_id": "a1" }, { "type": "image" }] })).await);
    assert!(!ok(json!({ "$or": [] })).await);

    let meta = json!({ "title": { "$meta": "textScore" } });
    assert!(
        !optimizer
            .optimize_compatible(&req, &json!({ "_id": "a1" }), &meta, &opts)
            .await
    );
}

#[tokio::test]
async fn test_disabled_optimizer_goes_direct() {
    let (source, optimizer) = setup();
    let optimizer = optimizer.with_enabled(false);
    let req = request();
    assert_eq!(optimizer.optimize(&req, &[home()]).await.unwrap(), 0);
    assert_eq!(source.finds(), 0);

    let cursor = optimizer
        .low_level_cursor(&req, &json!({ "_id": "a1" }), &Value::Null, &QueryOptions::default())
        .await;
    assert!(!cursor.is_optimized());
    assert_eq!(optimizer.stats().snapshot(), StatsSnapshot { direct: 1, optimized: 0 });
}

#[tokio::test]
async fn test_cursor_serves_from_cache() {
    let (source, optimizer) = setup();
    let req = request();
    optimizer.optimize(&req, &[home()]).await.unwrap();

    let criteria = json!({ "_id": { "$in": ["a1", "a2", "img1"] }, "type": "article" });
    let options = QueryOptions {
        sort: vec![SortKey::asc("title")],
        ..Default::default()
    };
    let projection = json!({ "title": 1 });

    let cursor = optimizer.low_level_cursor(&req, &criteria, &projection, &options).await;
    assert!(cursor.is_optimized());
    assert_eq!(
        cursor.to_array().await.unwrap(),
        vec![
            json!({ "_id": "a2", "title": "Alpha" }),
            json!({ "_id": "a1", "title": "Beta" }),
        ]
    );

    let first = optimizer
        .low_level_cursor(&req, &criteria, &projection, &options)
        .await
        .to_object()
        .await
        .unwrap();
    assert_eq!(first, Some(json!({ "_id": "a2", "title": "Alpha" })));

    let paged = QueryOptions { skip: 1, limit: Some(1), ..options.clone() };
    let count = optimizer
        .low_level_cursor(&req, &criteria, &projection, &paged)
        .await
        .to_count()
        .await
        .unwrap();
    assert_eq!(count, 2);

    // only the priming fetch reached the store
    assert_eq!(source.finds(), 1);
    assert_eq!(optimizer.stats().snapshot(), StatsSnapshot { direct: 0, optimized: 3 });
    optimizer.stats().reset();
    assert_eq!(optimizer.stats().snapshot(), StatsSnapshot::default());
}

#[tokio::test]
async fn test_unsupported_operator_falls_back() {
    let (source, optimizer) = setup();
    let req = request();
    optimizer.optimize(&req, &[home()]).await.unwrap();

    let criteria = json!({ "_id": "a1", "title": { "$regex": "^B" } });
    assert!(optimizer
        .optimize_filter_docs(&req, &criteria, &Value::Null, &QueryOptions::default())
        .await
        .is_err());

    let cursor = optimizer
        .low_level_cursor(&req, &criteria, &Value::Null, &QueryOptions::default())
        .await;
    assert!(!cursor.is_optimized());
    // the store rejects it too; the error surfaces from the direct path
    assert!(cursor.to_array().await.is_err());
    assert_eq!(source.finds(), 2);
    assert_eq!(optimizer.stats().snapshot().direct, 1);
}

#[tokio::test]
async fn test_find_primes_nested_queries() {
    let (source, optimizer) = setup();
    let req = request();
    let pages = optimizer
        .find(&req, &json!({ "type": "home-page" }), &Value::Null, &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(source.finds(), 2);

    let widgets = optimizer
        .find(&req, &json!({ "_id": { "$in": ["a1", "a2"] } }), &Value::Null, &QueryOptions::default())
        .await
        .unwrap();
    assert_eq!(widgets.len(), 2);
    // served from cache, and a1's reference to img1 is already cached
    assert_eq!(source.finds(), 2);
}

#[tokio::test]
async fn test_concurrent_queries_wait_for_population() {
    let (source, optimizer) = setup();
    let req = request();
    let outer = [home()];
    let criteria = json!({ "_id": "img1" });
    let options = QueryOptions::default();

    let (fetched, again) = tokio::join!(
        optimizer.optimize(&req, &outer),
        optimizer.optimize(&req, &outer)
    );
    assert_eq!(fetched.unwrap() + again.unwrap(), 3);
    assert_eq!(source.finds(), 1);

    let found = optimizer
        .low_level_cursor(&req, &criteria, &Value::Null, &options)
        .await
        .to_object()
        .await
        .unwrap();
    assert_eq!(found.unwrap()["title"], "Logo");
}

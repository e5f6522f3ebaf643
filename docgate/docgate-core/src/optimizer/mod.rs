//! Request-scoped query optimizer.
//!
//! Rendering one page issues many small follow-up queries for documents the
//! page refers to. Each stored document carries an `optimizeIds` index of
//! those references, so after the outer query the optimizer fetches every
//! referenced document in one bulk query and answers the follow-ups from that
//! cache. Queries it cannot answer exactly go to the store unchanged.

mod cursor;
#[cfg(test)]
mod tests;

pub use cursor::{Cursor, DirectCursor, MemoryCursor};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::OptimizerConfig;
use crate::query::{self, QueryOptions, QueryOutcome, QueryResult};
use crate::request::RequestContext;
use crate::store::{stored_optimize_ids, DocumentSource};

#[derive(Default)]
struct CacheState {
    docs: BTreeMap<String, Value>,
    /// Ids already asked for, including ones the store did not have.
    requested: BTreeSet<String>,
}

/// Documents fetched for the current request, keyed by id.
#[derive(Default)]
pub struct OptimizeCache {
    state: Mutex<CacheState>,
}

impl OptimizeCache {
    pub async fn len(&self) -> usize {
        self.state.lock().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.docs.is_empty()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.state.lock().await.docs.contains_key(id)
    }

    pub async fn ids(&self) -> Vec<String> {
        self.state.lock().await.docs.keys().cloned().collect()
    }
}

/// Counts of queries served from the cache versus the store. Shared across
/// requests.
#[derive(Debug, Default)]
pub struct OptimizerStats {
    direct: AtomicU64,
    optimized: AtomicU64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub direct: u64,
    pub optimized: u64,
}

impl OptimizerStats {
    pub fn record_direct(&self) {
        self.direct.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_optimized(&self) {
        self.optimized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            direct: self.direct.load(Ordering::Relaxed),
            optimized: self.optimized.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.direct.store(0, Ordering::Relaxed);
        self.optimized.store(0, Ordering::Relaxed);
    }
}

pub struct QueryOptimizer {
    source: Arc<dyn DocumentSource>,
    stats: Arc<OptimizerStats>,
    enabled: bool,
}

impl QueryOptimizer {
    pub fn new(source: Arc<dyn DocumentSource>, stats: Arc<OptimizerStats>) -> Self {
        Self {
            source,
            stats,
            enabled: true,
        }
    }

    pub fn from_config(
        source: Arc<dyn DocumentSource>,
        stats: Arc<OptimizerStats>,
        config: &OptimizerConfig,
    ) -> Self {
        Self::new(source, stats).with_enabled(config.enabled)
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn stats(&self) -> &Arc<OptimizerStats> {
        &self.stats
    }

    /// Prime the request cache with every document referenced by `outer`.
    /// Returns the number of documents fetched.
    ///
    /// The cache lock is held across the fetch, so concurrent queries on the
    /// same request see either nothing or the whole batch.
    pub async fn optimize(&self, req: &RequestContext, outer: &[Value]) -> Result<usize> {
        if !self.enabled {
            return Ok(0);
        }
        let mut state = req.optimize_cache().state.lock().await;
        let wanted: Vec<String> = outer
            .iter()
            .flat_map(stored_optimize_ids)
            .filter(|id| !state.docs.contains_key(id) && !state.requested.contains(id))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if wanted.is_empty() {
            return Ok(0);
        }
        let docs = self
            .source
            .find(
                &json!({ "_id": { "$in": wanted } }),
                &Value::Null,
                &QueryOptions::default(),
            )
            .await?;
        state.requested.extend(wanted);
        let fetched = docs.len();
        for doc in docs {
            if let Some(id) = doc.get("_id").and_then(Value::as_str) {
                state.docs.insert(id.to_string(), doc);
            }
        }
        debug!(fetched, cached = state.docs.len(), "optimize cache primed");
        Ok(fetched)
    }

    /// Whether a query can be answered exactly from the request cache.
    pub async fn optimize_compatible(
        &self,
        req: &RequestContext,
        criteria: &Value,
        projection: &Value,
        options: &QueryOptions,
    ) -> bool {
        let state = req.optimize_cache().state.lock().await;
        self.enabled && compatible(&state, criteria, projection, options)
    }

    /// Evaluate a query against the cached documents only.
    pub async fn optimize_filter_docs(
        &self,
        req: &RequestContext,
        criteria: &Value,
        projection: &Value,
        options: &QueryOptions,
    ) -> QueryResult<QueryOutcome> {
        let state = req.optimize_cache().state.lock().await;
        query::execute(state.docs.values(), criteria, projection, options)
    }

    /// Cursor for a query: served from the cache when that gives the same
    /// answer as the store, otherwise a direct cursor on the store.
    pub async fn low_level_cursor(
        &self,
        req: &RequestContext,
        criteria: &Value,
        projection: &Value,
        options: &QueryOptions,
    ) -> Box<dyn Cursor> {
        if self.enabled {
            let state = req.optimize_cache().state.lock().await;
            if compatible(&state, criteria, projection, options) {
                match query::execute(state.docs.values(), criteria, projection, options) {
                    Ok(QueryOutcome { docs, total }) => {
                        self.stats.record_optimized();
                        return Box::new(MemoryCursor::new(docs, total));
                    }
                    Err(e) => debug!(%criteria, "optimizer fallback: {}", e),
                }
            }
        }
        self.stats.record_direct();
        Box::new(DirectCursor::new(
            self.source.clone(),
            criteria.clone(),
            projection.clone(),
            options.clone(),
        ))
    }

    /// Run a query and prime the cache with whatever its results refer to.
    /// The projection must keep `optimizeIds` for priming to find anything.
    pub async fn find(
        &self,
        req: &RequestContext,
        criteria: &Value,
        projection: &Value,
        options: &QueryOptions,
    ) -> Result<Vec<Value>> {
        let docs = self
            .low_level_cursor(req, criteria, projection, options)
            .await
            .to_array()
            .await?;
        self.optimize(req, &docs).await?;
        Ok(docs)
    }
}

fn compatible(
    state: &CacheState,
    criteria: &Value,
    projection: &Value,
    _options: &QueryOptions,
) -> bool {
    // $meta and other projection operators need the store
    if let Some(fields) = projection.as_object() {
        if fields.values().any(|v| v.is_object() || v.is_array()) {
            return false;
        }
    }
    scoped(state, criteria)
}

/// True when every document the criteria can match is in the cache.
fn scoped(state: &CacheState, criteria: &Value) -> bool {
    let Some(obj) = criteria.as_object() else {
        return false;
    };
    obj.iter().any(|(key, value)| match key.as_str() {
        "_id" => ids_cached(state, value),
        "$and" => value
            .as_array()
            .map_or(false, |clauses| clauses.iter().any(|c| scoped(state, c))),
        "$or" => value.as_array().map_or(false, |clauses| {
            !clauses.is_empty() && clauses.iter().all(|c| scoped(state, c))
        }),
        _ => false,
    })
}

fn ids_cached(state: &CacheState, value: &Value) -> bool {
    match value {
        Value::String(id) => state.docs.contains_key(id),
        Value::Object(op) if op.len() == 1 => match op.get("$in").and_then(Value::as_array) {
            Some(ids) => ids
                .iter()
                .all(|id| id.as_str().map_or(false, |id| state.docs.contains_key(id))),
            None => false,
        },
        _ => false,
    }
}

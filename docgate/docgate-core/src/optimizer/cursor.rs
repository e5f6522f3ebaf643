use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::query::QueryOptions;
use crate::store::DocumentSource;

/// Results of a low-level query, however they were obtained.
#[async_trait]
pub trait Cursor: Send {
    async fn to_array(self: Box<Self>) -> Result<Vec<Value>>;

    /// First result, if any.
    async fn to_object(self: Box<Self>) -> Result<Option<Value>>;

    /// Number of matches, ignoring skip and limit.
    async fn to_count(self: Box<Self>) -> Result<usize>;

    /// Whether results come from the request cache.
    fn is_optimized(&self) -> bool;
}

/// Results already evaluated against the request cache.
pub struct MemoryCursor {
    docs: Vec<Value>,
    total: usize,
}

impl MemoryCursor {
    pub fn new(docs: Vec<Value>, total: usize) -> Self {
        Self { docs, total }
    }
}

#[async_trait]
impl Cursor for MemoryCursor {
    async fn to_array(self: Box<Self>) -> Result<Vec<Value>> {
        Ok(self.docs)
    }

    async fn to_object(self: Box<Self>) -> Result<Option<Value>> {
        Ok(self.docs.into_iter().next())
    }

    async fn to_count(self: Box<Self>) -> Result<usize> {
        Ok(self.total)
    }

    fn is_optimized(&self) -> bool {
        true
    }
}

/// Deferred query against the authoritative source.
pub struct DirectCursor {
    source: Arc<dyn DocumentSource>,
    criteria: Value,
    projection: Value,
    options: QueryOptions,
}

impl DirectCursor {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        criteria: Value,
        projection: Value,
        options: QueryOptions,
    ) -> Self {
        Self {
            source,
            criteria,
            projection,
            options,
        }
    }
}

#[async_trait]
impl Cursor for DirectCursor {
    async fn to_array(self: Box<Self>) -> Result<Vec<Value>> {
        self.source
            .find(&self.criteria, &self.projection, &self.options)
            .await
    }

    async fn to_object(self: Box<Self>) -> Result<Option<Value>> {
        let options = QueryOptions {
            limit: Some(1),
            ..self.options.clone()
        };
        let docs = self
            .source
            .find(&self.criteria, &self.projection, &options)
            .await?;
        Ok(docs.into_iter().next())
    }

    async fn to_count(self: Box<Self>) -> Result<usize> {
        self.source.count(&self.criteria).await
    }

    fn is_optimized(&self) -> bool {
        false
    }
}

use anyhow::{anyhow, bail, Result};
use docgate_core::{
    config::EngineConfig,
    optimizer::{OptimizerStats, QueryOptimizer, StatsSnapshot},
    permission::{self, PermissionDescriptor, PermissionEngine, DOC_TYPE},
    principal::Directory,
    query::{QueryOptions, SortKey},
    request::RequestContext,
    store::{stored_optimize_ids, DocumentStore},
    types::PAGE_TYPE,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Everything a command needs, loaded once per invocation.
pub struct App {
    config: EngineConfig,
    directory: Directory,
    engine: PermissionEngine,
    store: Arc<RwLock<DocumentStore>>,
    optimizer: QueryOptimizer,
}

#[derive(Debug, Serialize)]
pub struct FindReport {
    pub docs: Vec<Value>,
    /// Whether the final query was answered from the request cache.
    pub optimized: bool,
    pub stats: StatsSnapshot,
}

impl App {
    pub fn open(config: Option<&Path>, data: &Path, directory: Option<&Path>) -> Result<Self> {
        let config = match config {
            Some(path) => EngineConfig::load(path)?,
            None => EngineConfig::default(),
        };
        let directory = match directory {
            Some(path) => Directory::load(path)?,
            None => Directory::default(),
        };
        let engine = PermissionEngine::from_config(&config);
        let store = Arc::new(RwLock::new(DocumentStore::new(data)?));
        let optimizer = QueryOptimizer::from_config(
            store.clone(),
            Arc::new(OptimizerStats::default()),
            &config.optimizer,
        );
        info!(
            types = engine.types().len(),
            users = directory.users.len(),
            optimizer = optimizer.is_enabled(),
            "loaded site"
        );
        Ok(Self {
            config,
            directory,
            engine,
            store,
            optimizer,
        })
    }

    pub fn request(&self, user: Option<&str>, session: Option<&str>) -> Result<RequestContext> {
        let principal =
            self.directory
                .principal_for(user, session, &self.config.public_permission_set())?;
        Ok(RequestContext::new(principal))
    }

    pub async fn can(
        &self,
        user: Option<&str>,
        session: Option<&str>,
        action: &str,
        doc_id: Option<&str>,
    ) -> Result<bool> {
        let req = self.request(user, session)?;
        let doc = match doc_id {
            Some(id) => Some(
                self.store
                    .read()
                    .await
                    .get(id)
                    .cloned()
                    .ok_or_else(|| anyhow!("no document {}", id))?,
            ),
            None => None,
        };
        Ok(self.engine.can(&req, action, doc.as_ref()))
    }

    pub fn criteria(&self, user: Option<&str>, action: &str) -> Result<Value> {
        let req = self.request(user, None)?;
        Ok(self.engine.criteria(&req, action).to_filter())
    }

    /// Documents of the action's type the user may access under `action`,
    /// limited to `ids` when given. With `via`, the parent document is loaded
    /// first (it must be viewable) so its references can be served from the
    /// request cache; its references are also the default id list, so a
    /// parent without references yields nothing.
    pub async fn find(
        &self,
        user: Option<&str>,
        action: &str,
        ids: &[String],
        via: Option<&str>,
        options: &QueryOptions,
    ) -> Result<FindReport> {
        let req = self.request(user, None)?;
        let criteria = self.engine.criteria(&req, action);

        let mut ids = ids.to_vec();
        // an id list taken from the parent restricts even when it is empty
        let mut by_id = !ids.is_empty();
        if let Some(parent) = via {
            let viewable = self.engine.criteria(&req, "view");
            let parents = self
                .optimizer
                .find(
                    &req,
                    &viewable.restrict(json!({ "_id": parent })),
                    &Value::Null,
                    &QueryOptions::default(),
                )
                .await?;
            let Some(parent_doc) = parents.first() else {
                bail!("document {} not found or not permitted", parent);
            };
            if ids.is_empty() {
                ids = stored_optimize_ids(parent_doc);
                by_id = true;
            }
        }

        let mut base = serde_json::Map::new();
        if by_id {
            base.insert("_id".to_string(), json!({ "$in": ids }));
        }
        if let Some(scope) = self.type_scope(action) {
            base.insert("type".to_string(), scope);
        }
        let query = criteria.restrict(Value::Object(base));
        let cursor = self
            .optimizer
            .low_level_cursor(&req, &query, &Value::Null, options)
            .await;
        let optimized = cursor.is_optimized();
        let docs = cursor.to_array().await?;
        Ok(FindReport {
            docs,
            optimized,
            stats: self.optimizer.stats().snapshot(),
        })
    }

    /// Rebuild stale optimize indexes. Returns the number of documents updated.
    pub async fn reindex(&self) -> Result<usize> {
        self.store.write().await.migrate_optimize_ids()
    }

    pub fn permissions(&self) -> Vec<PermissionDescriptor> {
        self.engine.choices()
    }

    /// Condition on `type` for the type an action names. `page` covers every
    /// page type; the generic `doc` type is unrestricted.
    fn type_scope(&self, action: &str) -> Option<Value> {
        let doc_type = permission::parse(action).doc_type;
        if doc_type == DOC_TYPE {
            return None;
        }
        if doc_type == PAGE_TYPE {
            let pages: Vec<&str> = self
                .engine
                .types()
                .iter()
                .filter(|m| m.is_page())
                .map(|m| m.name())
                .collect();
            return Some(json!({ "$in": pages }));
        }
        Some(Value::String(doc_type))
    }
}

/// `title` sorts ascending, `-title` descending.
pub fn parse_sort(spec: &str) -> SortKey {
    match spec.strip_prefix('-') {
        Some(path) => SortKey::desc(path),
        None => SortKey::asc(spec.strip_prefix('+').unwrap_or(spec)),
    }
}

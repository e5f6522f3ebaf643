mod index;
#[cfg(test)]
mod tests;

pub use index::{optimize_ids, stored_optimize_ids, OPTIMIZE_IDS};

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::query::{self, QueryOptions};

/// Anything that can answer queries authoritatively. The optimizer falls back
/// to one of these whenever it cannot serve a query from its cache.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    async fn find(
        &self,
        criteria: &Value,
        projection: &Value,
        options: &QueryOptions,
    ) -> Result<Vec<Value>>;

    async fn count(&self, criteria: &Value) -> Result<usize>;
}

/// Filesystem-backed store: one `<id>.json` file per document, all loaded
/// into memory at startup.
pub struct DocumentStore {
    docs: BTreeMap<String, Value>,
    dir: PathBuf,
}

impl DocumentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating data directory {}", dir.display()))?;
        let mut docs = BTreeMap::new();
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some("json")
            {
                continue;
            }
            match load_document(path) {
                Ok((id, doc)) => {
                    docs.insert(id, doc);
                }
                Err(e) => warn!(path = %path.display(), "skipping document: {:#}", e),
            }
        }
        Ok(Self { docs, dir })
    }

    /// Directory where documents are persisted.
    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, id: &str) -> Option<&Value> {
        self.docs.get(id)
    }

    /// Iterate over all documents in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.docs.values()
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Save a new document, assigning an `_id` when it has none. Returns the id.
    pub fn insert(&mut self, mut doc: Value) -> Result<String> {
        let obj = doc
            .as_object_mut()
            .ok_or_else(|| anyhow!("document must be a JSON object"))?;
        if !obj.get("_id").map_or(false, Value::is_string) {
            obj.insert("_id".to_string(), Value::String(Uuid::new_v4().to_string()));
        }
        self.save(doc)
    }

    /// Write a document to disk, refreshing its optimize index and
    /// `updatedAt` stamp. Returns the id.
    pub fn save(&mut self, mut doc: Value) -> Result<String> {
        let id = doc
            .get("_id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("document has no string _id"))?
            .to_string();
        if !is_safe_id(&id) {
            bail!("document id {:?} cannot be stored", id);
        }
        let ids = optimize_ids(&doc);
        if let Some(obj) = doc.as_object_mut() {
            obj.insert(OPTIMIZE_IDS.to_string(), serde_json::to_value(ids)?);
            obj.insert(
                "updatedAt".to_string(),
                Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        self.write(&id, &doc)?;
        self.docs.insert(id.clone(), doc);
        Ok(id)
    }

    pub fn remove(&mut self, id: &str) -> Result<Option<Value>> {
        let Some(doc) = self.docs.remove(id) else {
            return Ok(None);
        };
        let path = self.path(id);
        if path.exists() {
            std::fs::remove_file(&path)
                .with_context(|| format!("removing {}", path.display()))?;
        }
        Ok(Some(doc))
    }

    pub fn find(
        &self,
        criteria: &Value,
        projection: &Value,
        options: &QueryOptions,
    ) -> Result<Vec<Value>> {
        Ok(query::execute(self.docs.values(), criteria, projection, options)?.docs)
    }

    pub fn count(&self, criteria: &Value) -> Result<usize> {
        let filter = query::Filter::parse(criteria)?;
        Ok(self.docs.values().filter(|d| filter.matches(d)).count())
    }

    /// Recompute `optimizeIds` for every document whose stored index is out
    /// of date. Returns how many documents were rewritten.
    pub fn migrate_optimize_ids(&mut self) -> Result<usize> {
        let stale: Vec<(String, Vec<String>)> = self
            .docs
            .iter()
            .filter_map(|(id, doc)| {
                let fresh = optimize_ids(doc);
                let current = doc.get(OPTIMIZE_IDS).map(|_| stored_optimize_ids(doc));
                (current.as_ref() != Some(&fresh)).then(|| (id.clone(), fresh))
            })
            .collect();
        for (id, ids) in &stale {
            let Some(mut doc) = self.docs.get(id).cloned() else {
                continue;
            };
            if let Some(obj) = doc.as_object_mut() {
                obj.insert(OPTIMIZE_IDS.to_string(), serde_json::to_value(ids)?);
            }
            self.write(id, &doc)?;
            self.docs.insert(id.clone(), doc);
        }
        info!(updated = stale.len(), total = self.docs.len(), "optimize index migration complete");
        Ok(stale.len())
    }

    fn path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    fn write(&self, id: &str, doc: &Value) -> Result<()> {
        let path = self.path(id);
        let data = serde_json::to_vec_pretty(doc)?;
        std::fs::write(&path, data).with_context(|| format!("writing {}", path.display()))
    }
}

#[async_trait]
impl DocumentSource for RwLock<DocumentStore> {
    async fn find(
        &self,
        criteria: &Value,
        projection: &Value,
        options: &QueryOptions,
    ) -> Result<Vec<Value>> {
        self.read().await.find(criteria, projection, options)
    }

    async fn count(&self, criteria: &Value) -> Result<usize> {
        self.read().await.count(criteria)
    }
}

fn load_document(path: &Path) -> Result<(String, Value)> {
    let data = std::fs::read(path)?;
    let doc: Value = serde_json::from_slice(&data)?;
    let id = doc
        .get("_id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("missing string _id"))?
        .to_string();
    Ok((id, doc))
}

fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && !id.starts_with('.')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

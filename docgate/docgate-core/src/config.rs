//! Engine configuration, read from a JSON file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::permission::PermissionDescriptor;
use crate::principal::PermissionSet;
use crate::types::DocTypeManager;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Replaces the default verb implication table when present.
    #[serde(default)]
    pub implied_by: Option<BTreeMap<String, Vec<String>>>,

    /// Permissions every principal holds, logged in or not.
    #[serde(default)]
    pub public_permissions: Vec<String>,

    /// Document types known to the site.
    #[serde(default = "default_types")]
    pub types: Vec<DocTypeManager>,

    /// Extra entries for the selectable permission catalog.
    #[serde(default)]
    pub permissions: Vec<PermissionDescriptor>,

    #[serde(default)]
    pub optimizer: OptimizerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerConfig {
    /// When off every query goes straight to the store.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool { true }

fn default_types() -> Vec<DocTypeManager> {
    vec![
        DocTypeManager::page("home-page"),
        DocTypeManager::page("default-page"),
        DocTypeManager::piece("user"),
        DocTypeManager::piece("group"),
    ]
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            implied_by: None,
            public_permissions: Vec::new(),
            types: default_types(),
            permissions: Vec::new(),
            optimizer: OptimizerConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn public_permission_set(&self) -> PermissionSet {
        self.public_permissions.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_to_missing_fields() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert!(config.implied_by.is_none());
        assert!(config.optimizer.enabled);
        assert!(config.types.iter().any(|t| t.name == "home-page" && t.page));
    }

    #[test]
    fn test_full_config() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "impliedBy": { "view": ["edit"], "edit": ["admin"] },
                "publicPermissions": ["view-event"],
                "types": [{ "name": "article", "label": "Article" }, { "name": "blog-page", "page": true }],
                "permissions": [{ "value": "export", "label": "Export" }],
                "optimizer": { "enabled": false }
            }"#,
        )
        .unwrap();
        assert_eq!(config.implied_by.as_ref().unwrap()["view"], vec!["edit"]);
        assert!(config.public_permission_set().has("view-event"));
        assert_eq!(config.types.len(), 2);
        assert!(config.types[1].page);
        assert_eq!(config.permissions[0].value, "export");
        assert!(!config.optimizer.enabled);
    }
}

//! Registry of document type managers.
//!
//! The permission engine asks every registered type which permission names
//! edit and administer it, so a type can customise those without the engine
//! knowing about it.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Generic type name all page variants collapse to for permission checks.
pub const PAGE_TYPE: &str = "page";

pub trait TypeManager: Send + Sync {
    fn name(&self) -> &str;

    fn edit_permission_name(&self) -> String {
        format!("edit-{}", self.name())
    }

    fn admin_permission_name(&self) -> String {
        format!("admin-{}", self.name())
    }

    /// Pages may change type at runtime, so their permissions are never
    /// type-specific.
    fn is_page(&self) -> bool {
        false
    }

    fn label(&self) -> String {
        self.name().to_string()
    }
}

/// Plain manager for a named piece or page type.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct DocTypeManager {
    pub name: String,
    #[serde(default)]
    pub page: bool,
    #[serde(default)]
    pub label: Option<String>,
}

impl DocTypeManager {
    pub fn piece(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            page: false,
            label: None,
        }
    }

    pub fn page(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            page: true,
            label: None,
        }
    }
}

impl TypeManager for DocTypeManager {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_page(&self) -> bool {
        self.page
    }

    fn label(&self) -> String {
        self.label.clone().unwrap_or_else(|| self.name.clone())
    }
}

#[derive(Clone, Default)]
pub struct TypeRegistry {
    managers: BTreeMap<String, Arc<dyn TypeManager>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, manager: Arc<dyn TypeManager>) {
        self.managers.insert(manager.name().to_string(), manager);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn TypeManager>> {
        self.managers.get(name)
    }

    pub fn is_page(&self, name: &str) -> bool {
        self.managers.get(name).map_or(false, |m| m.is_page())
    }

    /// Iterate managers in type-name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TypeManager>> {
        self.managers.values()
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }
}

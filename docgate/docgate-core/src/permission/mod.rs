//! Capability-based access control for documents.
//!
//! Permissions are plain names of the form `<verb>-<scope>`. The scope is a
//! document type (`edit-article`) when held by a principal, or a group/user id
//! (`edit-<groupId>`) when listed in a document's `docPermissions`. Names
//! without a scope (`admin`, `edit`, `guest`) apply to every type.
//!
//! [`PermissionEngine::can`] decides a single action and
//! [`PermissionEngine::criteria`] produces the equivalent store filter, so a
//! bulk query returns exactly the documents `can` would allow one by one.

mod criteria;
mod implication;

pub use criteria::{Criteria, NEVER_MATCH_ID};
pub use implication::ImplicationGraph;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

use crate::config::EngineConfig;
use crate::principal::Principal;
use crate::request::RequestContext;
use crate::types::{TypeManager, TypeRegistry, PAGE_TYPE};

/// Type assumed when an action names none.
pub const DOC_TYPE: &str = "doc";

const LOGIN_REQUIRED: &str = "loginRequired";
const CERTAIN_USERS: &str = "certainUsers";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Action {
    pub verb: String,
    pub doc_type: String,
}

/// Split an action on its first hyphen: `edit-article` is `edit` on
/// `article`, `edit-home-page` is `edit` on `home-page`. An action without a
/// hyphen applies to the generic `doc` type.
pub fn parse(action: &str) -> Action {
    match action.split_once('-') {
        Some((verb, doc_type)) => Action {
            verb: verb.to_string(),
            doc_type: doc_type.to_string(),
        },
        None => Action {
            verb: action.to_string(),
            doc_type: DOC_TYPE.to_string(),
        },
    }
}

/// Entry in the catalog of permissions offered when editing groups.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionDescriptor {
    pub value: String,
    pub label: String,
}

impl PermissionDescriptor {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }
}

pub struct PermissionEngine {
    types: TypeRegistry,
    implications: ImplicationGraph,
    catalog: RwLock<Vec<PermissionDescriptor>>,
}

impl PermissionEngine {
    pub fn new() -> Self {
        Self {
            types: TypeRegistry::new(),
            implications: ImplicationGraph::default(),
            catalog: RwLock::new(vec![
                PermissionDescriptor::new("admin", "Admin: All"),
                PermissionDescriptor::new("edit", "Editor"),
                PermissionDescriptor::new("guest", "Guest"),
            ]),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let mut engine = Self::new();
        if let Some(table) = &config.implied_by {
            engine.implications = ImplicationGraph::new(table.clone());
        }
        for manager in &config.types {
            engine.register_type(Arc::new(manager.clone()));
        }
        for descriptor in &config.permissions {
            engine.add(descriptor.clone());
        }
        engine
    }

    pub fn with_implications(mut self, implications: ImplicationGraph) -> Self {
        self.implications = implications;
        self
    }

    /// Register a document type and offer its edit/admin permissions in the
    /// catalog. Page types share the single `page` entries.
    pub fn register_type(&mut self, manager: Arc<dyn TypeManager>) {
        let (scope, label) = if manager.is_page() {
            (PAGE_TYPE.to_string(), "Pages".to_string())
        } else {
            (manager.name().to_string(), manager.label())
        };
        self.add(PermissionDescriptor::new(
            format!("edit-{}", scope),
            format!("Edit: {}", label),
        ));
        self.add(PermissionDescriptor::new(
            format!("admin-{}", scope),
            format!("Admin: {}", label),
        ));
        self.types.register(manager);
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn implications(&self) -> &ImplicationGraph {
        &self.implications
    }

    /// Append to the permission catalog. Values already offered are ignored.
    pub fn add(&self, descriptor: PermissionDescriptor) {
        let mut catalog = self.catalog.write();
        if !catalog.iter().any(|d| d.value == descriptor.value) {
            catalog.push(descriptor);
        }
    }

    pub fn choices(&self) -> Vec<PermissionDescriptor> {
        self.catalog.read().clone()
    }

    /// Type whose permissions govern an action. With an object and the
    /// generic `doc` type the object's own type is used; page variants all
    /// collapse to `page`.
    pub fn effective_type(&self, doc_type: &str, object: Option<&Value>) -> String {
        let resolved = match object {
            Some(obj) if doc_type == DOC_TYPE => obj
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or(DOC_TYPE),
            _ => doc_type,
        };
        if self.types.is_page(resolved) {
            PAGE_TYPE.to_string()
        } else {
            resolved.to_string()
        }
    }

    pub fn can(&self, req: &RequestContext, action: &str, object: Option<&Value>) -> bool {
        let principal = req.principal();
        let Action { verb, doc_type } = parse(action);
        let doc_type = self.effective_type(&doc_type, object);

        if self.administers(principal, &doc_type) {
            return true;
        }
        if verb == "edit" && !self.holds_edit(principal, &doc_type) {
            return false;
        }
        match object {
            None => self.generic(principal, &verb, &doc_type),
            Some(object) => self.specific(req, &verb, &doc_type, object),
        }
    }

    /// Type-level check, used when no particular document is involved
    /// (typically "may I create one of these"). Anyone may attempt to view;
    /// what they actually see is filtered per document.
    pub fn generic(&self, principal: &Principal, verb: &str, doc_type: &str) -> bool {
        if verb == "view" {
            return true;
        }
        self.implications
            .expand(verb)
            .iter()
            .any(|v| principal.has(v) || principal.has(&format!("{}-{}", v, doc_type)))
    }

    /// Instance-level check against a document's publication state and its
    /// `docPermissions`.
    pub fn specific(
        &self,
        req: &RequestContext,
        verb: &str,
        _doc_type: &str,
        object: &Value,
    ) -> bool {
        let principal = req.principal();
        if verb == "view" {
            let published = object.get("published") == Some(&Value::Bool(true));
            let login = login_requirement(object);
            if published && login == Some("") {
                return true;
            }
            if !principal.is_authenticated() {
                return false;
            }
            if published && login == Some(LOGIN_REQUIRED) && principal.has("guest") {
                return true;
            }
            if published
                && login == Some(CERTAIN_USERS)
                && self.granted_on(principal, "view", object)
            {
                return true;
            }
            let object_type = object.get("type").and_then(Value::as_str).unwrap_or(DOC_TYPE);
            return self.granted_on(principal, "edit", object)
                && self.editable_types(req).iter().any(|t| t == object_type);
        }
        principal.is_authenticated() && self.granted_on(principal, verb, object)
    }

    /// Names under which documents grant `verbs` to this principal: every
    /// verb and everything implying it, scoped to each of the principal's
    /// groups and to the user.
    pub fn user_permission_names(&self, principal: &Principal, verbs: &[&str]) -> Vec<String> {
        let mut expanded: Vec<String> = Vec::new();
        for verb in verbs {
            for v in self.implications.expand(verb) {
                if !expanded.contains(&v) {
                    expanded.push(v);
                }
            }
        }
        let mut names = Vec::new();
        for verb in &expanded {
            for group in principal.group_ids() {
                names.push(format!("{}-{}", verb, group));
            }
            if let Some(user) = principal.user_id() {
                names.push(format!("{}-{}", verb, user));
            }
        }
        names
    }

    /// Store filter selecting exactly the documents `can(req, action, doc)`
    /// would allow.
    pub fn criteria(&self, req: &RequestContext, action: &str) -> Criteria {
        let principal = req.principal();
        let Action { verb, doc_type } = parse(action);
        let doc_type = self.effective_type(&doc_type, None);

        if self.administers(principal, &doc_type) {
            return Criteria::All;
        }
        // `doc` spans every type; the editable-types clause below does the
        // per-type restriction instead.
        if verb == "edit" && doc_type != DOC_TYPE && !self.holds_edit(principal, &doc_type) {
            debug!(principal = principal.id(), action, "no edit permission for type");
            return Criteria::Nothing;
        }

        if verb == "view" {
            let mut clauses = vec![json!({
                "published": scalar_eq(true),
                "loginRequired": scalar_in(json!([null, ""])),
            })];
            if principal.is_authenticated() {
                if principal.has("guest") {
                    clauses.push(json!({
                        "published": scalar_eq(true),
                        "loginRequired": scalar_eq(LOGIN_REQUIRED),
                    }));
                }
                clauses.push(json!({
                    "published": scalar_eq(true),
                    "loginRequired": scalar_eq(CERTAIN_USERS),
                    "docPermissions": granted_in(self.user_permission_names(principal, &["view"])),
                }));
                clauses.push(json!({
                    "docPermissions": granted_in(self.user_permission_names(principal, &["edit"])),
                    "type": scalar_in(json!(self.editable_types(req))),
                }));
            }
            // `doc` could not take the admin shortcut for a single type, so
            // per-type admins get their types here
            let admin_types = self.admin_types(req);
            if doc_type == DOC_TYPE && !admin_types.is_empty() {
                clauses.push(json!({ "type": scalar_in(json!(admin_types)) }));
            }
            return Criteria::any_of(clauses);
        }

        if !principal.is_authenticated() {
            return Criteria::Nothing;
        }
        Criteria::any_of(vec![
            json!({
                "docPermissions": granted_in(self.user_permission_names(principal, &[verb.as_str()])),
                "type": scalar_in(json!(self.editable_types(req))),
            }),
            json!({ "type": scalar_in(json!(self.admin_types(req))) }),
        ])
    }

    /// Registered types the principal may edit. Computed once per request.
    pub fn editable_types<'r>(&self, req: &'r RequestContext) -> &'r [String] {
        req.editable_types.get_or_init(|| {
            self.types
                .iter()
                .filter(|m| self.can(req, &m.edit_permission_name(), None))
                .map(|m| m.name().to_string())
                .collect()
        })
    }

    /// Registered types the principal administers. Computed once per request.
    pub fn admin_types<'r>(&self, req: &'r RequestContext) -> &'r [String] {
        req.admin_types.get_or_init(|| {
            self.types
                .iter()
                .filter(|m| self.can(req, &m.admin_permission_name(), None))
                .map(|m| m.name().to_string())
                .collect()
        })
    }

    fn administers(&self, principal: &Principal, doc_type: &str) -> bool {
        principal.has("admin") || principal.has(&format!("admin-{}", doc_type))
    }

    fn holds_edit(&self, principal: &Principal, doc_type: &str) -> bool {
        principal.has("edit") || principal.has(&format!("edit-{}", doc_type))
    }

    fn granted_on(&self, principal: &Principal, verb: &str, object: &Value) -> bool {
        let Some(granted) = object.get("docPermissions").and_then(Value::as_array) else {
            return false;
        };
        let names = self.user_permission_names(principal, &[verb]);
        granted
            .iter()
            .filter_map(Value::as_str)
            .any(|g| names.iter().any(|n| n == g))
    }
}

impl Default for PermissionEngine {
    fn default() -> Self {
        Self::new()
    }
}

// Filter conditions reading fields the way `specific` does: a value wrapped
// in an array is not the value, and grants only count inside an array.

fn scalar_eq(value: impl Into<Value>) -> Value {
    json!({ "$eq": value.into(), "$not": { "$type": "array" } })
}

fn scalar_in(values: Value) -> Value {
    json!({ "$in": values, "$not": { "$type": "array" } })
}

fn granted_in(names: Vec<String>) -> Value {
    json!({ "$type": "array", "$in": names })
}

/// `Some("")` when no login is required (missing, null or empty), the
/// requirement string otherwise, and `None` for values of any other kind,
/// which never count as public.
fn login_requirement(object: &Value) -> Option<&str> {
    match object.get("loginRequired") {
        None | Some(Value::Null) => Some(""),
        Some(Value::String(s)) => Some(s.as_str()),
        Some(_) => None,
    }
}

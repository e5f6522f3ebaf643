//! Acting identities and the user/group directory they are resolved from.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use uuid::Uuid;

/// Resolved permission names. A name maps to `true` when granted; an explicit
/// `false` is kept but never counts as a grant.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeMap<String, bool>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, name: &str) -> bool {
        self.0.get(name).copied().unwrap_or(false)
    }

    pub fn grant(&mut self, name: impl Into<String>) {
        self.0.insert(name.into(), true);
    }

    pub fn extend<I, S>(&mut self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            self.grant(name);
        }
    }

    pub fn granted(&self) -> impl Iterator<Item = &str> {
        self.0.iter().filter(|(_, v)| **v).map(|(k, _)| k.as_str())
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = PermissionSet::new();
        set.extend(iter);
        set
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub group_ids: Vec<String>,
    /// Permissions held directly, in addition to those of the user's groups.
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// The identity a request acts as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Principal {
    id: String,
    user_id: Option<String>,
    group_ids: Vec<String>,
    permissions: PermissionSet,
}

impl Principal {
    /// Anonymous visitor. The id is derived from the session so that the same
    /// visitor keeps one identity for the life of the session.
    pub fn anonymous(session_id: Option<&str>, public: &PermissionSet) -> Self {
        let session = session_id
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Self {
            id: format!("anon-{}", session),
            user_id: None,
            group_ids: Vec::new(),
            permissions: public.clone(),
        }
    }

    /// Logged-in user. Public permissions, the user's own permissions and
    /// those of every group the user belongs to are merged.
    pub fn user(user: &UserRecord, groups: &[Group], public: &PermissionSet) -> Self {
        let mut permissions = public.clone();
        permissions.extend(user.permissions.iter().cloned());
        let mut group_ids: Vec<String> = Vec::new();
        for gid in &user.group_ids {
            if group_ids.contains(gid) {
                continue;
            }
            group_ids.push(gid.clone());
            if let Some(group) = groups.iter().find(|g| &g.id == gid) {
                permissions.extend(group.permissions.iter().cloned());
            }
        }
        Self {
            id: user.id.clone(),
            user_id: Some(user.id.clone()),
            group_ids,
            permissions,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn group_ids(&self) -> &[String] {
        &self.group_ids
    }

    pub fn permissions(&self) -> &PermissionSet {
        &self.permissions
    }

    pub fn has(&self, permission: &str) -> bool {
        self.permissions.has(permission)
    }
}

/// Users and groups known to the site.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Directory {
    #[serde(default)]
    pub groups: Vec<Group>,
    #[serde(default)]
    pub users: Vec<UserRecord>,
}

impl Directory {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading directory {}", path.display()))?;
        serde_json::from_str(&data).with_context(|| format!("parsing directory {}", path.display()))
    }

    pub fn user(&self, id: &str) -> Option<&UserRecord> {
        self.users
            .iter()
            .find(|u| u.id == id || u.username.as_deref() == Some(id))
    }

    /// Build the principal for a request. `user` is a user id or username;
    /// `None` yields an anonymous principal.
    pub fn principal_for(
        &self,
        user: Option<&str>,
        session_id: Option<&str>,
        public: &PermissionSet,
    ) -> Result<Principal> {
        match user {
            None => Ok(Principal::anonymous(session_id, public)),
            Some(id) => {
                let record = self.user(id).ok_or_else(|| anyhow!("unknown user {}", id))?;
                Ok(Principal::user(record, &self.groups, public))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directory() -> Directory {
        Directory {
            groups: vec![
                Group {
                    id: "g-editors".to_string(),
                    title: "Editors".to_string(),
                    permissions: vec!["edit-article".to_string()],
                },
                Group {
                    id: "g-guests".to_string(),
                    title: "Guests".to_string(),
                    permissions: vec!["guest".to_string()],
                },
            ],
            users: vec![UserRecord {
                id: "u1".to_string(),
                username: Some("kim".to_string()),
                group_ids: vec![
                    "g-editors".to_string(),
                    "g-guests".to_string(),
                    "g-editors".to_string(),
                ],
                permissions: vec!["submit".to_string()],
            }],
        }
    }

    #[test]
    fn test_user_permissions_are_merged() {
        let public: PermissionSet = ["view-calendar"].into_iter().collect();
        let principal = directory()
            .principal_for(Some("kim"), None, &public)
            .unwrap();
        assert!(principal.is_authenticated());
        assert_eq!(principal.id(), "u1");
        assert_eq!(principal.group_ids(), &["g-editors", "g-guests"]);
        assert!(principal.has("edit-article"));
        assert!(principal.has("guest"));
        assert!(principal.has("submit"));
        assert!(principal.has("view-calendar"));
        assert!(!principal.has("admin"));
    }

    #[test]
    fn test_anonymous_identity_follows_session() {
        let principal = Principal::anonymous(Some("s-42"), &PermissionSet::new());
        assert_eq!(principal.id(), "anon-s-42");
        assert!(!principal.is_authenticated());
        assert!(principal.group_ids().is_empty());

        let other = Principal::anonymous(None, &PermissionSet::new());
        assert!(other.id().starts_with("anon-"));
    }

    #[test]
    fn test_unknown_user_is_an_error() {
        assert!(directory()
            .principal_for(Some("nobody"), None, &PermissionSet::new())
            .is_err());
    }

    #[test]
    fn test_directory_json_shape() {
        let dir: Directory = serde_json::from_str(
            r#"{
                "groups": [{ "_id": "g1", "title": "Staff", "permissions": ["edit"] }],
                "users": [{ "_id": "u1", "groupIds": ["g1"] }]
            }"#,
        )
        .unwrap();
        let p = dir.principal_for(Some("u1"), None, &PermissionSet::new()).unwrap();
        assert!(p.has("edit"));
    }
}

// Core domain types shared across all Stagehand crates.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of the systemwide default workspace.
pub const DEFAULT_WORKSPACE_ID: &str = "live";

/// Stable string identifier of a workspace (e.g. `"live"`, `"stage"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct WorkspaceId(pub String);

impl WorkspaceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkspaceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of an account acting on the system.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActorId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// May view (and therefore switch to) any workspace.
    ViewAnyWorkspace,
    /// May create workspaces and grant access to them.
    AdministerWorkspaces,
    /// May clear the replication blocked-flag and retry failed jobs.
    AdministerReplication,
}

/// An account identity together with the permissions it holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Actor {
    pub id: ActorId,
    #[serde(default)]
    pub permissions: BTreeSet<Permission>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: ActorId::new(id), permissions: BTreeSet::new() }
    }

    /// The elevated identity replication jobs run under.
    pub fn system(id: impl Into<String>) -> Self {
        Self {
            id: ActorId::new(id),
            permissions: [
                Permission::ViewAnyWorkspace,
                Permission::AdministerWorkspaces,
                Permission::AdministerReplication,
            ]
            .into_iter()
            .collect(),
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permissions.insert(permission);
        self
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }
}

/// A workspace: an isolated, independently editable view of content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub workspace_type: String,
    pub label: String,
    pub owner: ActorId,
    pub is_default: bool,
    /// Actors explicitly granted view access besides the owner.
    #[serde(default)]
    pub viewers: BTreeSet<ActorId>,
    pub created_at: DateTime<Utc>,
}

impl Workspace {
    /// Access predicate used before switching to a workspace.
    ///
    /// The default workspace is viewable by everyone.
    pub fn can_view(&self, actor: &Actor) -> bool {
        self.is_default
            || self.owner == actor.id
            || self.viewers.contains(&actor.id)
            || actor.has_permission(Permission::ViewAnyWorkspace)
    }
}

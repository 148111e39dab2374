// Local configuration for the daemon and the CLI.
//
// Global config: `~/.stagehand/config.toml`
// Metadata database: `~/.stagehand/meta.db` unless `db_path` says otherwise.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stagehand_common::entity::EntityTypeDefinition;
use stagehand_common::types::{Actor, ActorId, Permission, DEFAULT_WORKSPACE_ID};
use url::Url;

use crate::queue::RetryPolicy;

/// Root directory for Stagehand state: `~/.stagehand/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".stagehand"))
}

/// Path to the global config file: `~/.stagehand/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

fn home_missing() -> ConfigError {
    ConfigError::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "could not determine home directory",
    ))
}

// ── Config ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StagehandConfig {
    /// Metadata database location (defaults to `~/.stagehand/meta.db`).
    pub db_path: Option<PathBuf>,
    pub queue: QueueConfig,
    pub replication: ReplicationConfig,
    pub workspaces: WorkspacesConfig,
    /// Entity types known to the registry.
    pub entity_types: Vec<EntityTypeDefinition>,
    /// Identity the CLI acts as.
    pub actor: ActorConfig,
}

impl Default for StagehandConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            queue: QueueConfig::default(),
            replication: ReplicationConfig::default(),
            workspaces: WorkspacesConfig::default(),
            entity_types: default_entity_types(),
            actor: ActorConfig::default(),
        }
    }
}

impl StagehandConfig {
    /// Load from `path`, or from `~/.stagehand/config.toml` when `None`.
    /// A missing file yields defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => global_config_path().ok_or_else(home_missing)?,
        };
        match Self::load_from(&path) {
            Err(ConfigError::Io(error)) if error.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            other => other,
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config: Self = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
            restrict_permissions(parent, 0o700).map_err(ConfigError::Io)?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)?;
        restrict_permissions(path, 0o600).map_err(ConfigError::Io)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.replication.endpoint_url()?;
        if self.workspaces.default_workspace.trim().is_empty() {
            return Err(ConfigError::Invalid("workspaces.default_workspace must not be empty".into()));
        }
        if self.queue.retry_base_delay_ms == 0 {
            return Err(ConfigError::Invalid("queue.retry_base_delay_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn db_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.db_path {
            Some(path) => Ok(path.clone()),
            None => global_dir().map(|d| d.join("meta.db")).ok_or_else(home_missing),
        }
    }
}

/// Best-effort owner-only permissions on unix.
fn restrict_permissions(path: &Path, mode: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let current = std::fs::metadata(path)?.permissions().mode() & 0o777;
        if current != mode {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        }
    }

    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }

    Ok(())
}

// ── Sections ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct QueueConfig {
    /// Pause between batches when the queue is idle.
    pub poll_interval_ms: u64,
    /// Wall time one batch may run.
    pub batch_time_budget_sec: u64,
    /// Visibility timeout of a claimed queue item.
    pub claim_lease_sec: u64,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            batch_time_budget_sec: 600,
            claim_lease_sec: 900,
            retry_base_delay_ms: 250,
            retry_max_delay_ms: 30_000,
        }
    }
}

impl QueueConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn batch_budget(&self) -> Duration {
        Duration::from_secs(self.batch_time_budget_sec)
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_secs(self.claim_lease_sec)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReplicationConfig {
    /// Account replication runs under.
    pub system_actor: String,
    /// URL of the external replication service.
    pub endpoint: Option<String>,
    pub request_timeout_sec: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self { system_actor: "1".into(), endpoint: None, request_timeout_sec: 300 }
    }
}

impl ReplicationConfig {
    pub fn endpoint_url(&self) -> Result<Option<Url>, ConfigError> {
        self.endpoint
            .as_deref()
            .map(|raw| {
                Url::parse(raw).map_err(|error| {
                    ConfigError::Invalid(format!("replication.endpoint `{raw}`: {error}"))
                })
            })
            .transpose()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }

    pub fn system_actor(&self) -> Actor {
        Actor::system(self.system_actor.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WorkspacesConfig {
    /// Id of the default workspace seeded at startup.
    pub default_workspace: String,
    pub default_label: String,
    /// Query parameter consulted by the query-parameter negotiator.
    pub query_parameter: String,
}

impl Default for WorkspacesConfig {
    fn default() -> Self {
        Self {
            default_workspace: DEFAULT_WORKSPACE_ID.into(),
            default_label: "Live".into(),
            query_parameter: "workspace".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ActorConfig {
    pub id: String,
    pub permissions: BTreeSet<Permission>,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            id: "1".into(),
            permissions: [
                Permission::ViewAnyWorkspace,
                Permission::AdministerWorkspaces,
                Permission::AdministerReplication,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl ActorConfig {
    pub fn to_actor(&self) -> Actor {
        Actor { id: ActorId::new(self.id.clone()), permissions: self.permissions.clone() }
    }
}

fn default_entity_types() -> Vec<EntityTypeDefinition> {
    vec![
        EntityTypeDefinition::new("node", true, true),
        EntityTypeDefinition::new("block_content", true, true),
        EntityTypeDefinition::new("taxonomy_term", true, true),
        EntityTypeDefinition::new("user", false, false),
        EntityTypeDefinition::new("file", false, false),
        EntityTypeDefinition::new("workspace", false, true),
        EntityTypeDefinition::new("workspace_association", false, true),
        EntityTypeDefinition::new("replication_log", false, false),
    ]
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}

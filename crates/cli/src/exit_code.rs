// Consistent exit codes for the stagehand CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   10 = replication queue blocked
//   11 = permission denied
//   12 = invalid state transition
//   13 = not found

use std::process;

use stagehand_common::replication::TransitionError;
use stagehand_common::types::{ActorId, Permission};
use stagehand_daemon::config::ConfigError;
use stagehand_daemon::workspace::WorkspaceError;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Blocked = 10,
    Denied = 11,
    Conflict = 12,
    NotFound = 13,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if cause.downcast_ref::<MissingPermission>().is_some() {
                return Self::Denied;
            }
            if let Some(workspace_err) = cause.downcast_ref::<WorkspaceError>() {
                return match workspace_err {
                    WorkspaceError::AccessDenied { .. } => Self::Denied,
                    WorkspaceError::NotFound(_) => Self::NotFound,
                    WorkspaceError::Storage(_) => Self::Error,
                };
            }
            if cause.downcast_ref::<TransitionError>().is_some() {
                return Self::Conflict;
            }
            if let Some(ConfigError::Invalid(_) | ConfigError::Parse(_)) =
                cause.downcast_ref::<ConfigError>()
            {
                return Self::Usage;
            }
        }

        let msg = format!("{err:#}");
        if msg.contains("not found") {
            return Self::NotFound;
        }
        if msg.contains("blocked") {
            return Self::Blocked;
        }

        Self::Error
    }
}

impl From<ExitCode> for process::ExitCode {
    fn from(code: ExitCode) -> Self {
        process::ExitCode::from(code.code() as u8)
    }
}

/// The acting account lacks a permission an operator command requires.
#[derive(Debug)]
pub struct MissingPermission {
    pub actor: ActorId,
    pub permission: Permission,
}

impl std::fmt::Display for MissingPermission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "permission denied: actor {} lacks {:?}", self.actor, self.permission)
    }
}

impl std::error::Error for MissingPermission {}

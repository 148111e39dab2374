use stagehand_common::replication::TransitionError;
use thiserror::Error;

/// Why `process()` did not run a job to completion.
///
/// `Blocked` and `AlreadyInProgress` are soft: the queue should hand the job
/// back for a later attempt. Everything else is an infrastructure failure
/// that propagates to the caller.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("replication is blocked")]
    Blocked,

    #[error("replication {record_id} is already in progress")]
    AlreadyInProgress { record_id: i64 },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("replication storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl ProcessError {
    pub fn should_requeue(&self) -> bool {
        matches!(self, Self::Blocked | Self::AlreadyInProgress { .. })
    }
}

/// A fault raised while invoking the replication capability.
///
/// Faults never leave `process()`; they are logged and turn the record
/// `failed`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplicationFault {
    #[error("could not reach replication service at {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    #[error("replication service at {endpoint} answered {status}: {message}")]
    Rejected { endpoint: String, status: u16, message: String },

    #[error("replication service at {endpoint} sent an unreadable body: {message}")]
    Decode { endpoint: String, message: String },

    #[error("replicator panicked: {message}")]
    Panicked { message: String },
}

impl ReplicationFault {
    /// Short machine-readable kind for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport { .. } => "transport",
            Self::Rejected { .. } => "rejected",
            Self::Decode { .. } => "decode",
            Self::Panicked { .. } => "panic",
        }
    }

    /// Where the fault originated.
    pub fn origin(&self) -> &str {
        match self {
            Self::Transport { endpoint, .. }
            | Self::Rejected { endpoint, .. }
            | Self::Decode { endpoint, .. } => endpoint,
            Self::Panicked { .. } => "replicator",
        }
    }
}

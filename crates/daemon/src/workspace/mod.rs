// Workspace negotiation: which workspace is active for a given caller.
//
// The manager walks a priority-ordered negotiator chain that always ends in
// the default negotiator, so resolution can never come back empty.

pub mod context;
pub mod eligibility;
pub mod error;
pub mod manager;
pub mod negotiator;

use anyhow::Result;
use stagehand_common::types::{ActorId, Workspace, WorkspaceId};

pub use context::RequestContext;
pub use eligibility::EntityTypeFilter;
pub use error::WorkspaceError;
pub use manager::WorkspaceManager;
pub use negotiator::{
    DefaultNegotiator, NegotiatorChain, QueryParameterNegotiator, SessionNegotiator,
    WorkspaceNegotiator,
};

/// Storage for workspace definitions and their access grants.
pub trait WorkspaceRepository {
    fn load(&self, id: &WorkspaceId) -> Result<Option<Workspace>>;

    /// The systemwide default workspace. Errors if none has been seeded.
    fn load_default(&self) -> Result<Workspace>;

    fn list(&self) -> Result<Vec<Workspace>>;

    /// Insert or replace a workspace, including its viewer set.
    fn save(&self, workspace: &Workspace) -> Result<()>;

    fn grant_view(&self, id: &WorkspaceId, actor: &ActorId) -> Result<()>;
}

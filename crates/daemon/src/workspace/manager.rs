// Resolves and switches the active workspace for a request context.

use stagehand_common::entity::EntityTypeDefinition;
use stagehand_common::types::{Workspace, WorkspaceId};
use tracing::{error, info};

use super::{EntityTypeFilter, NegotiatorChain, RequestContext, WorkspaceError, WorkspaceRepository};
use crate::entity::EntityTypeRegistry;

pub struct WorkspaceManager<'a> {
    negotiators: NegotiatorChain<'a>,
    workspaces: &'a dyn WorkspaceRepository,
    entity_types: &'a dyn EntityTypeRegistry,
    filter: &'a EntityTypeFilter,
}

impl<'a> WorkspaceManager<'a> {
    pub fn new(
        negotiators: NegotiatorChain<'a>,
        workspaces: &'a dyn WorkspaceRepository,
        entity_types: &'a dyn EntityTypeRegistry,
        filter: &'a EntityTypeFilter,
    ) -> Self {
        Self { negotiators, workspaces, entity_types, filter }
    }

    /// The workspace active for `ctx`. Never empty while a default
    /// workspace exists.
    pub fn get_active_workspace(&self, ctx: &RequestContext) -> Result<Workspace, WorkspaceError> {
        match self.negotiators.resolve(ctx)? {
            Some((_, workspace)) => Ok(workspace),
            // Only reachable when the default negotiator itself came back
            // empty, which the repository reports as an error first.
            None => Err(WorkspaceError::Storage(anyhow::anyhow!(
                "no negotiator resolved an active workspace"
            ))),
        }
    }

    /// Make `workspace` active for `ctx`.
    ///
    /// Fails without side effects when the actor may not view a
    /// non-default workspace. On success every cached entity of a
    /// workspace-aware type is dropped.
    pub fn set_active_workspace(
        &self,
        ctx: &RequestContext,
        workspace: &Workspace,
    ) -> Result<&Self, WorkspaceError> {
        if !workspace.can_view(&ctx.actor) && !workspace.is_default {
            error!(
                workspace = %workspace.label,
                actor = %ctx.actor.id,
                "denied access to view workspace"
            );
            return Err(WorkspaceError::AccessDenied { workspace_id: workspace.id.clone() });
        }

        if let Some(negotiator) = self.negotiators.first_applicable(ctx) {
            negotiator.set_active_workspace(ctx, workspace)?;
            info!(
                workspace_id = %workspace.id,
                negotiator = negotiator.name(),
                "active workspace set"
            );
        }

        for entity_type in self.filter.supported_entity_types(self.entity_types) {
            self.entity_types.reset_cache(&entity_type.id);
        }
        Ok(self)
    }

    /// Look up a workspace by id and make it active.
    pub fn activate(
        &self,
        ctx: &RequestContext,
        id: &WorkspaceId,
    ) -> Result<Workspace, WorkspaceError> {
        let workspace =
            self.workspaces.load(id)?.ok_or_else(|| WorkspaceError::NotFound(id.clone()))?;
        self.set_active_workspace(ctx, &workspace)?;
        Ok(workspace)
    }

    pub fn supported_entity_types(&self) -> Vec<EntityTypeDefinition> {
        self.filter.supported_entity_types(self.entity_types)
    }
}

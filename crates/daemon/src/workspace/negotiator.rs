// Workspace negotiators and the ordered chain that consults them.

use anyhow::Result;
use stagehand_common::types::{Workspace, WorkspaceId};
use tracing::debug;

use super::{RequestContext, WorkspaceRepository};
use crate::store::sessions::SessionStore;

/// A strategy that decides the active workspace for some contexts.
pub trait WorkspaceNegotiator {
    fn name(&self) -> &'static str;

    /// Whether this negotiator is responsible for `ctx`.
    fn applies(&self, ctx: &RequestContext) -> bool;

    /// The workspace this negotiator resolves for `ctx`, if any.
    fn active_workspace(&self, ctx: &RequestContext) -> Result<Option<Workspace>>;

    fn set_active_workspace(&self, ctx: &RequestContext, workspace: &Workspace) -> Result<()>;
}

// ── Negotiators ─────────────────────────────────────────────────────

/// Resolves the workspace named by a query parameter. Read-only: setting
/// is a no-op because the caller controls the parameter.
pub struct QueryParameterNegotiator<'a> {
    parameter: String,
    workspaces: &'a dyn WorkspaceRepository,
}

impl<'a> QueryParameterNegotiator<'a> {
    pub fn new(parameter: impl Into<String>, workspaces: &'a dyn WorkspaceRepository) -> Self {
        Self { parameter: parameter.into(), workspaces }
    }
}

impl WorkspaceNegotiator for QueryParameterNegotiator<'_> {
    fn name(&self) -> &'static str {
        "query_parameter"
    }

    fn applies(&self, ctx: &RequestContext) -> bool {
        ctx.query_param(&self.parameter).is_some_and(|value| !value.is_empty())
    }

    fn active_workspace(&self, ctx: &RequestContext) -> Result<Option<Workspace>> {
        let Some(id) = ctx.query_param(&self.parameter) else {
            return Ok(None);
        };
        let workspace = self.workspaces.load(&WorkspaceId::from(id))?;
        Ok(workspace.filter(|workspace| workspace.can_view(&ctx.actor)))
    }

    fn set_active_workspace(&self, _ctx: &RequestContext, _workspace: &Workspace) -> Result<()> {
        Ok(())
    }
}

/// Remembers the active workspace per session.
pub struct SessionNegotiator<'a> {
    sessions: &'a dyn SessionStore,
    workspaces: &'a dyn WorkspaceRepository,
}

impl<'a> SessionNegotiator<'a> {
    pub fn new(sessions: &'a dyn SessionStore, workspaces: &'a dyn WorkspaceRepository) -> Self {
        Self { sessions, workspaces }
    }
}

impl WorkspaceNegotiator for SessionNegotiator<'_> {
    fn name(&self) -> &'static str {
        "session"
    }

    fn applies(&self, ctx: &RequestContext) -> bool {
        ctx.session_id.is_some()
    }

    fn active_workspace(&self, ctx: &RequestContext) -> Result<Option<Workspace>> {
        let Some(session_id) = ctx.session_id else {
            return Ok(None);
        };
        let Some(id) = self.sessions.workspace_for(session_id)? else {
            return Ok(None);
        };
        // A workspace deleted or revoked since it was stored falls through.
        let workspace = self.workspaces.load(&id)?;
        Ok(workspace.filter(|workspace| workspace.can_view(&ctx.actor)))
    }

    fn set_active_workspace(&self, ctx: &RequestContext, workspace: &Workspace) -> Result<()> {
        match ctx.session_id {
            Some(session_id) => self.sessions.set_workspace(session_id, &workspace.id),
            None => Ok(()),
        }
    }
}

/// Always applies and always resolves the default workspace.
pub struct DefaultNegotiator<'a> {
    workspaces: &'a dyn WorkspaceRepository,
}

impl<'a> DefaultNegotiator<'a> {
    pub fn new(workspaces: &'a dyn WorkspaceRepository) -> Self {
        Self { workspaces }
    }
}

impl WorkspaceNegotiator for DefaultNegotiator<'_> {
    fn name(&self) -> &'static str {
        "default"
    }

    fn applies(&self, _ctx: &RequestContext) -> bool {
        true
    }

    fn active_workspace(&self, _ctx: &RequestContext) -> Result<Option<Workspace>> {
        self.workspaces.load_default().map(Some)
    }

    fn set_active_workspace(&self, _ctx: &RequestContext, _workspace: &Workspace) -> Result<()> {
        Ok(())
    }
}

// ── Chain ───────────────────────────────────────────────────────────

/// Negotiators in the order they are consulted. The default negotiator is
/// always last.
pub struct NegotiatorChain<'a> {
    negotiators: Vec<Box<dyn WorkspaceNegotiator + 'a>>,
}

impl<'a> NegotiatorChain<'a> {
    pub fn builder(default: DefaultNegotiator<'a>) -> NegotiatorChainBuilder<'a> {
        NegotiatorChainBuilder { registered: Vec::new(), default }
    }

    /// First negotiator that applies to `ctx` and resolves a workspace.
    pub fn resolve(&self, ctx: &RequestContext) -> Result<Option<(&'static str, Workspace)>> {
        for negotiator in self.applicable(ctx) {
            if let Some(workspace) = negotiator.active_workspace(ctx)? {
                return Ok(Some((negotiator.name(), workspace)));
            }
            debug!(negotiator = negotiator.name(), "negotiator applied but resolved nothing");
        }
        Ok(None)
    }

    /// First negotiator that applies to `ctx`.
    pub fn first_applicable(&self, ctx: &RequestContext) -> Option<&dyn WorkspaceNegotiator> {
        self.negotiators
            .iter()
            .map(|negotiator| negotiator.as_ref() as &dyn WorkspaceNegotiator)
            .find(|negotiator| negotiator.applies(ctx))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.negotiators.iter().map(|negotiator| negotiator.name()).collect()
    }

    fn applicable<'s>(
        &'s self,
        ctx: &'s RequestContext,
    ) -> impl Iterator<Item = &'s dyn WorkspaceNegotiator> + 's {
        self.negotiators
            .iter()
            .map(|negotiator| negotiator.as_ref() as &dyn WorkspaceNegotiator)
            .filter(move |negotiator| negotiator.applies(ctx))
    }
}

pub struct NegotiatorChainBuilder<'a> {
    registered: Vec<(i32, Box<dyn WorkspaceNegotiator + 'a>)>,
    default: DefaultNegotiator<'a>,
}

impl<'a> NegotiatorChainBuilder<'a> {
    /// Register a negotiator. Higher priorities are consulted first; equal
    /// priorities keep registration order.
    pub fn with(mut self, priority: i32, negotiator: impl WorkspaceNegotiator + 'a) -> Self {
        self.registered.push((priority, Box::new(negotiator)));
        self
    }

    pub fn build(self) -> NegotiatorChain<'a> {
        let mut registered = self.registered;
        registered.sort_by(|(a, _), (b, _)| b.cmp(a));
        let mut negotiators: Vec<Box<dyn WorkspaceNegotiator + 'a>> =
            registered.into_iter().map(|(_, negotiator)| negotiator).collect();
        negotiators.push(Box::new(self.default));
        NegotiatorChain { negotiators }
    }
}

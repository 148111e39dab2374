use std::collections::BTreeSet;

use chrono::Utc;
use proptest::prelude::*;
use stagehand_common::entity::EntityTypeDefinition;
use stagehand_common::types::{Actor, ActorId, Permission, Workspace, WorkspaceId};
use stagehand_daemon::entity::ConfiguredEntityTypes;
use stagehand_daemon::store::meta_db::MetaDb;
use stagehand_daemon::store::sessions::SqliteSessionStore;
use stagehand_daemon::store::workspaces::SqliteWorkspaceRepository;
use stagehand_daemon::workspace::{
    DefaultNegotiator, EntityTypeFilter, NegotiatorChain, QueryParameterNegotiator,
    RequestContext, SessionNegotiator, WorkspaceError, WorkspaceManager, WorkspaceRepository,
};
use tempfile::TempDir;
use uuid::Uuid;

const WORKSPACES: [(&str, &str); 4] = [("stage", "7"), ("dev", "8"), ("qa", "7"), ("hotfix", "9")];
const ACTORS: [&str; 4] = ["7", "8", "9", "10"];

struct World {
    _dir: TempDir,
    db: MetaDb,
    entity_types: ConfiguredEntityTypes,
    filter: EntityTypeFilter,
}

impl World {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir should be created");
        let db = MetaDb::open(dir.path().join("meta.db")).expect("meta db should open");
        let repo = SqliteWorkspaceRepository::new(db.connection());
        repo.ensure_default(&WorkspaceId::new("live"), "Live", &ActorId::new("1"), Utc::now())
            .expect("default should be seeded");
        for (id, owner) in WORKSPACES {
            repo.save(&Workspace {
                id: WorkspaceId::new(id),
                workspace_type: "basic".into(),
                label: id.to_uppercase(),
                owner: ActorId::new(owner),
                is_default: false,
                viewers: BTreeSet::new(),
                created_at: Utc::now(),
            })
            .expect("workspace should save");
        }
        Self {
            _dir: dir,
            db,
            entity_types: ConfiguredEntityTypes::new(vec![EntityTypeDefinition::new(
                "node", true, true,
            )]),
            filter: EntityTypeFilter::new(),
        }
    }

    /// Build a manager whose chain registers the optional negotiators at the
    /// given priorities.
    fn with_manager<R>(
        &self,
        query_priority: Option<i32>,
        session_priority: Option<i32>,
        body: impl FnOnce(&WorkspaceManager<'_>) -> R,
    ) -> R {
        let repo = SqliteWorkspaceRepository::new(self.db.connection());
        let sessions = SqliteSessionStore::new(self.db.connection());
        let mut builder = NegotiatorChain::builder(DefaultNegotiator::new(&repo));
        if let Some(priority) = query_priority {
            builder = builder.with(priority, QueryParameterNegotiator::new("workspace", &repo));
        }
        if let Some(priority) = session_priority {
            builder = builder.with(priority, SessionNegotiator::new(&sessions, &repo));
        }
        let manager = WorkspaceManager::new(builder.build(), &repo, &self.entity_types, &self.filter);
        body(&manager)
    }
}

fn workspace_ids() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("live".to_string()),
        Just("stage".to_string()),
        Just("dev".to_string()),
        Just("qa".to_string()),
        Just("hotfix".to_string()),
        Just("missing".to_string()),
    ]
}

fn contexts() -> impl Strategy<Value = RequestContext> {
    (
        prop::sample::select(ACTORS.to_vec()),
        any::<bool>(),
        any::<bool>(),
        prop::option::of(workspace_ids()),
    )
        .prop_map(|(actor, view_any, with_session, query)| {
            let mut actor = Actor::new(actor);
            if view_any {
                actor = actor.with_permission(Permission::ViewAnyWorkspace);
            }
            let mut ctx = RequestContext::new(actor);
            if with_session {
                ctx = ctx.with_session(Uuid::new_v4());
            }
            if let Some(id) = query {
                ctx = ctx.with_query("workspace", id);
            }
            ctx
        })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn active_workspace_is_never_empty_and_stable(
        ctx in contexts(),
        query_priority in prop::option::of(-50i32..50),
        session_priority in prop::option::of(-50i32..50),
    ) {
        let world = World::new();
        world.with_manager(query_priority, session_priority, |manager| {
            let first = manager.get_active_workspace(&ctx).expect("resolution must succeed");
            let second = manager.get_active_workspace(&ctx).expect("resolution must succeed");
            prop_assert_eq!(&first, &second);
            prop_assert!(first.can_view(&ctx.actor));
            Ok(())
        })?;
    }

    #[test]
    fn switch_succeeds_iff_viewable_or_default(
        ctx in contexts(),
        target in workspace_ids(),
        session_priority in prop::option::of(-50i32..50),
    ) {
        let world = World::new();
        let repo = SqliteWorkspaceRepository::new(world.db.connection());
        let target_workspace = repo.load(&WorkspaceId::new(target.clone())).expect("load");

        world.with_manager(None, session_priority, |manager| {
            let before = manager.get_active_workspace(&ctx).expect("before");
            let result = manager.activate(&ctx, &WorkspaceId::new(target.clone()));

            match target_workspace {
                None => prop_assert!(matches!(result, Err(WorkspaceError::NotFound(_)))),
                Some(ref workspace) if workspace.can_view(&ctx.actor) || workspace.is_default => {
                    prop_assert!(result.is_ok());
                    if session_priority.is_some() && ctx.session_id.is_some() {
                        let after = manager.get_active_workspace(&ctx).expect("after");
                        prop_assert_eq!(&after.id, &workspace.id);
                    }
                }
                Some(_) => {
                    prop_assert!(matches!(result, Err(WorkspaceError::AccessDenied { .. })), "expected AccessDenied");
                    let after = manager.get_active_workspace(&ctx).expect("after");
                    prop_assert_eq!(after, before);
                }
            }
            Ok(())
        })?;
    }
}

#[test]
fn default_negotiator_alone_always_returns_default() {
    let world = World::new();
    for actor in ACTORS {
        let ctx = RequestContext::new(Actor::new(actor));
        let active = world.with_manager(None, None, |manager| manager.get_active_workspace(&ctx));
        let active = active.expect("default must resolve");
        assert!(active.is_default);
        assert_eq!(active.id.as_str(), "live");
    }
}

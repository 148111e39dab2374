// Scoped identity switching for work that must run as the system account.

use std::sync::Mutex;

use stagehand_common::types::Actor;
use tracing::debug;

/// Switches the effective caller identity.
///
/// Every `switch_to` must be paired with exactly one `switch_back`.
pub trait AccountSwitcher: Send + Sync {
    fn switch_to(&self, actor: Actor);

    fn switch_back(&self);

    fn current(&self) -> Actor;
}

/// Stack-based switcher: the bottom entry is the identity the process
/// started with and is never popped.
#[derive(Debug)]
pub struct AccountStack {
    stack: Mutex<Vec<Actor>>,
}

impl AccountStack {
    pub fn new(initial: Actor) -> Self {
        Self { stack: Mutex::new(vec![initial]) }
    }

    pub fn depth(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Actor>> {
        // A panic while holding the lock cannot leave the stack half-updated.
        self.stack.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl AccountSwitcher for AccountStack {
    fn switch_to(&self, actor: Actor) {
        debug!(actor = %actor.id, "switching account");
        self.lock().push(actor);
    }

    fn switch_back(&self) {
        let mut stack = self.lock();
        if stack.len() > 1 {
            if let Some(previous) = stack.pop() {
                debug!(actor = %previous.id, "switched back from account");
            }
        }
    }

    fn current(&self) -> Actor {
        let stack = self.lock();
        stack.last().cloned().unwrap_or_else(|| Actor::new("anonymous"))
    }
}

/// Holds an elevated identity for as long as it lives.
///
/// The previous identity is restored on drop, so every exit path of the
/// guarded scope (early return, `?`, unwinding) switches back.
#[must_use = "the elevated identity is released as soon as the guard is dropped"]
pub struct ElevatedSession<'a> {
    switcher: &'a dyn AccountSwitcher,
}

impl<'a> ElevatedSession<'a> {
    pub fn enter(switcher: &'a dyn AccountSwitcher, actor: Actor) -> Self {
        switcher.switch_to(actor);
        Self { switcher }
    }
}

impl Drop for ElevatedSession<'_> {
    fn drop(&mut self) {
        self.switcher.switch_back();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn guard_restores_previous_identity() {
        let accounts = AccountStack::new(Actor::new("anonymous"));
        {
            let _session = ElevatedSession::enter(&accounts, Actor::system("1"));
            assert_eq!(accounts.current().id.as_str(), "1");
            assert_eq!(accounts.depth(), 2);
        }
        assert_eq!(accounts.current().id.as_str(), "anonymous");
        assert_eq!(accounts.depth(), 1);
    }

    #[test]
    fn guard_restores_on_early_return() {
        fn run(accounts: &AccountStack) -> Result<(), &'static str> {
            let _session = ElevatedSession::enter(accounts, Actor::system("1"));
            Err("bail out")
        }

        let accounts = AccountStack::new(Actor::new("7"));
        assert!(run(&accounts).is_err());
        assert_eq!(accounts.current().id.as_str(), "7");
    }

    #[test]
    fn guard_restores_on_panic() {
        let accounts = AccountStack::new(Actor::new("7"));
        let result = catch_unwind(AssertUnwindSafe(|| {
            let _session = ElevatedSession::enter(&accounts, Actor::system("1"));
            panic!("replicator exploded");
        }));
        assert!(result.is_err());
        assert_eq!(accounts.current().id.as_str(), "7");
    }

    #[test]
    fn nested_sessions_unwind_in_order() {
        let accounts = AccountStack::new(Actor::new("7"));
        let outer = ElevatedSession::enter(&accounts, Actor::new("8"));
        {
            let _inner = ElevatedSession::enter(&accounts, Actor::system("1"));
            assert_eq!(accounts.current().id.as_str(), "1");
        }
        assert_eq!(accounts.current().id.as_str(), "8");
        drop(outer);
        assert_eq!(accounts.current().id.as_str(), "7");
    }

    #[test]
    fn switch_back_never_pops_initial_identity() {
        let accounts = AccountStack::new(Actor::new("7"));
        accounts.switch_back();
        accounts.switch_back();
        assert_eq!(accounts.current().id.as_str(), "7");
    }
}

//! Per-session permission mode state.
//!
//! The store is an explicit value owned by the agent runtime, never a
//! process-wide singleton. Each mutation replaces the session's state
//! wholesale, so readers always see a complete snapshot.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use uuid::Uuid;

use super::PermissionMode;

/// Called with the session id and the new mode after every change.
pub type ModeListener = Arc<dyn Fn(&str, PermissionMode) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Clone)]
pub struct SessionModeState {
    pub session_id: String,
    pub mode: PermissionMode,
    listeners: Vec<(SubscriptionId, ModeListener)>,
}

impl SessionModeState {
    fn new(session_id: &str, mode: PermissionMode) -> Self {
        Self {
            session_id: session_id.to_string(),
            mode,
            listeners: Vec::new(),
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl fmt::Debug for SessionModeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionModeState")
            .field("session_id", &self.session_id)
            .field("mode", &self.mode)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[derive(Clone, Default)]
pub struct SessionModeStore {
    states: Arc<DashMap<String, Arc<SessionModeState>>>,
    on_change: Option<ModeListener>,
}

impl fmt::Debug for SessionModeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionModeStore")
            .field("sessions", &self.states.len())
            .field("on_change", &self.on_change.is_some())
            .finish()
    }
}

impl SessionModeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose `callback` runs before subscribers on every mode change.
    pub fn with_sync_callback(callback: impl Fn(&str, PermissionMode) + Send + Sync + 'static) -> Self {
        Self {
            states: Arc::default(),
            on_change: Some(Arc::new(callback)),
        }
    }

    pub fn state(&self, session_id: &str) -> Option<Arc<SessionModeState>> {
        self.states.get(session_id).map(|v| Arc::clone(&v))
    }

    /// Mode of `session_id`; sessions never touched are in [`PermissionMode::Ask`].
    pub fn get(&self, session_id: &str) -> PermissionMode {
        self.state(session_id)
            .map(|s| s.mode)
            .unwrap_or_default()
    }

    /// Sets the starting mode without notifying anyone. Existing
    /// subscriptions are kept.
    pub fn initialize(&self, session_id: &str, mode: PermissionMode) {
        self.update(session_id, |current| {
            (Some(SessionModeState { mode, ..current.clone() }), ())
        });
    }

    /// Changes the mode and returns the previous one. Listeners run only
    /// when the mode actually changed.
    pub fn set(&self, session_id: &str, mode: PermissionMode) -> PermissionMode {
        let (previous, installed) = self.update(session_id, |current| {
            let next = (current.mode != mode).then(|| SessionModeState {
                mode,
                ..current.clone()
            });
            (next, current.mode)
        });
        if let Some(next) = installed {
            tracing::debug!(session_id, from = %previous, to = %mode, "permission mode changed");
            self.notify(&next);
        }
        previous
    }

    /// Advances to the next mode in the cycle and returns it.
    pub fn cycle(&self, session_id: &str) -> PermissionMode {
        let (previous, installed) = self.update(session_id, |current| {
            let next = SessionModeState {
                mode: current.mode.next(),
                ..current.clone()
            };
            (Some(next), current.mode)
        });
        let Some(next) = installed else {
            return previous;
        };
        tracing::debug!(session_id, from = %previous, to = %next.mode, "permission mode changed");
        self.notify(&next);
        next.mode
    }

    pub fn subscribe(
        &self,
        session_id: &str,
        listener: impl Fn(&str, PermissionMode) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId::new();
        let listener: ModeListener = Arc::new(listener);
        self.update(session_id, |current| {
            let mut next = current.clone();
            next.listeners.push((id, listener));
            (Some(next), ())
        });
        id
    }

    pub fn unsubscribe(&self, session_id: &str, id: SubscriptionId) -> bool {
        let (removed, _) = self.update(session_id, |current| {
            if !current.listeners.iter().any(|(sub, _)| *sub == id) {
                return (None, false);
            }
            let mut next = current.clone();
            next.listeners.retain(|(sub, _)| *sub != id);
            (Some(next), true)
        });
        removed
    }

    /// Replaces a session's state while holding its map entry, so
    /// concurrent updates to one session cannot overwrite each other.
    /// `change` sees the current state (a fresh one for unknown sessions)
    /// and returns the replacement, if any, plus a value for the caller.
    fn update<T>(
        &self,
        session_id: &str,
        change: impl FnOnce(&SessionModeState) -> (Option<SessionModeState>, T),
    ) -> (T, Option<Arc<SessionModeState>>) {
        match self.states.entry(session_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let (next, out) = change(&**entry.get());
                let installed = next.map(Arc::new);
                if let Some(next) = &installed {
                    entry.insert(Arc::clone(next));
                }
                (out, installed)
            }
            Entry::Vacant(entry) => {
                let fresh = SessionModeState::new(session_id, PermissionMode::default());
                let (next, out) = change(&fresh);
                let installed = next.map(Arc::new);
                if let Some(next) = &installed {
                    entry.insert(Arc::clone(next));
                }
                (out, installed)
            }
        }
    }

    /// Drops all state for a finished session.
    pub fn cleanup(&self, session_id: &str) -> Option<Arc<SessionModeState>> {
        self.states.remove(session_id).map(|(_, v)| v)
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.states.iter().map(|e| e.key().clone()).collect()
    }

    fn notify(&self, state: &SessionModeState) {
        let callbacks = self
            .on_change
            .iter()
            .chain(state.listeners.iter().map(|(_, l)| l));
        for callback in callbacks {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(&state.session_id, state.mode)));
            if outcome.is_err() {
                tracing::warn!(
                    session_id = %state.session_id,
                    mode = %state.mode,
                    "permission mode listener panicked"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn test_default_is_ask() {
        let store = SessionModeStore::new();
        assert_eq!(store.get("s1"), PermissionMode::Ask);
        assert!(store.state("s1").is_none());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let store = SessionModeStore::new();
        store.set("a", PermissionMode::Safe);
        store.set("b", PermissionMode::AllowAll);
        assert_eq!(store.get("a"), PermissionMode::Safe);
        assert_eq!(store.get("b"), PermissionMode::AllowAll);

        let other = SessionModeStore::new();
        assert_eq!(other.get("a"), PermissionMode::Ask);
    }

    #[test]
    fn test_set_replaces_state() {
        let store = SessionModeStore::new();
        store.initialize("s", PermissionMode::Safe);
        let before = store.state("s").unwrap();
        assert_eq!(store.set("s", PermissionMode::Ask), PermissionMode::Safe);
        let after = store.state("s").unwrap();
        assert_eq!(before.mode, PermissionMode::Safe);
        assert_eq!(after.mode, PermissionMode::Ask);
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_listeners_and_sync_callback() {
        let synced = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&synced);
        let store = SessionModeStore::with_sync_callback(move |id, mode| {
            sink.lock().unwrap().push((id.to_string(), mode));
        });

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let id = store.subscribe("s", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set("s", PermissionMode::Safe);
        store.set("s", PermissionMode::Safe);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            synced.lock().unwrap().as_slice(),
            &[("s".to_string(), PermissionMode::Safe)]
        );

        assert!(store.unsubscribe("s", id));
        assert!(!store.unsubscribe("s", id));
        store.set("s", PermissionMode::Ask);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panicking_listener_does_not_block() {
        let store = SessionModeStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        store.subscribe("s", |_, _| panic!("listener bug"));
        let counter = Arc::clone(&calls);
        store.subscribe("s", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set("s", PermissionMode::Safe);
        assert_eq!(store.get("s"), PermissionMode::Safe);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cycle_and_cleanup() {
        let store = SessionModeStore::new();
        assert_eq!(store.cycle("s"), PermissionMode::AllowAll);
        assert_eq!(store.cycle("s"), PermissionMode::Safe);
        assert_eq!(store.cycle("s"), PermissionMode::Ask);
        assert!(store.cleanup("s").is_some());
        assert!(store.session_ids().is_empty());
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let store = SessionModeStore::new();
        let changes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&changes);
        store.subscribe("s", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        store.subscribe("s", |_, _| {});
                        store.cycle("s");
                    }
                });
            }
        });

        let state = store.state("s").unwrap();
        assert_eq!(state.listener_count(), 1 + 8 * 25);
        assert_eq!(changes.load(Ordering::SeqCst), 8 * 25);
        // Ask -> AllowAll -> Safe, and 200 % 3 == 2.
        assert_eq!(state.mode, PermissionMode::Safe);
    }

    #[test]
    fn test_initialize_keeps_subscriptions_silently() {
        let store = SessionModeStore::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        store.subscribe("s", move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        store.initialize("s", PermissionMode::Safe);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.state("s").unwrap().listener_count(), 1);
    }
}

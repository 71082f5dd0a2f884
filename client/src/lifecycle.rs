use crate::store::SessionStore;
use log::{debug, info, warn};
use serde_json::Value;
use shared::{RaceSession, SessionPaths};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Creates, flags and deletes the shared session record, each at most once.
///
/// Writes are fire-and-forget: a failure is logged and not retried, and the
/// operation still counts as done so it is never attempted again.
pub struct SessionLifecycle {
    store: Arc<dyn SessionStore>,
    paths: SessionPaths,
    created: bool,
    game_over_pushed: bool,
    deleted: bool,
    cleanup_scheduled: bool,
}

impl SessionLifecycle {
    pub fn new(store: Arc<dyn SessionStore>, uuid: &str) -> Self {
        Self {
            store,
            paths: SessionPaths::new(uuid),
            created: false,
            game_over_pushed: false,
            deleted: false,
            cleanup_scheduled: false,
        }
    }

    /// Writes the initial record. Challenger only, on race entry.
    pub fn create_session(&mut self, field_width: f32) {
        if self.created {
            debug!("Session {} already created", self.paths.root());
            return;
        }
        self.created = true;

        let record = RaceSession::initial(field_width).to_value();
        match self.store.set(self.paths.root(), record) {
            Ok(()) => info!("Game session created: {}", self.paths.root()),
            Err(e) => warn!("Failed to create session {}: {}", self.paths.root(), e),
        }
    }

    /// Flags the race as won. Only the normal winner calls this.
    pub fn push_game_over(&mut self) {
        if self.game_over_pushed {
            return;
        }
        self.game_over_pushed = true;

        match self.store.set(&self.paths.game_over(), Value::from(1)) {
            Ok(()) => info!("Pushed game over: {}", self.paths.root()),
            Err(e) => warn!("Failed to push game over for {}: {}", self.paths.root(), e),
        }
    }

    /// Removes the whole record. Repeated calls are no-ops.
    pub fn delete_session(&mut self) {
        if self.deleted {
            debug!("Session {} already deleted", self.paths.root());
            return;
        }
        self.deleted = true;

        match self.store.delete(self.paths.root()) {
            Ok(()) => info!("Game session deleted: {}", self.paths.root()),
            Err(e) => warn!("Failed to delete session {}: {}", self.paths.root(), e),
        }
    }

    /// Deletes the record after `grace` unless it disappears first.
    ///
    /// Armed by the normal winner, which covers both sides finishing before
    /// either sees the other's game over. The task watches the root and
    /// stands down once it reads back empty. It outlives driver teardown.
    pub fn schedule_cleanup(&mut self, grace: Duration) {
        if self.cleanup_scheduled || self.deleted {
            return;
        }
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Cannot schedule cleanup of {}: {}", self.paths.root(), e);
                return;
            }
        };
        let mut watch = match self.store.watch(self.paths.root()) {
            Ok(watch) => watch,
            Err(e) => {
                warn!("Cannot watch {} for cleanup: {}", self.paths.root(), e);
                return;
            }
        };

        self.cleanup_scheduled = true;
        let store = Arc::clone(&self.store);
        let root = self.paths.root().to_string();
        debug!("Cleanup of {} armed for {:?}", root, grace);
        runtime.spawn(async move {
            let deadline = tokio::time::sleep(grace);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    biased;

                    update = watch.updates.recv() => match update {
                        Some(Some(_)) => continue,
                        Some(None) => {
                            debug!("Session {} already gone, cleanup stands down", root);
                            break;
                        }
                        None => break,
                    },
                    _ = &mut deadline => {
                        match store.delete(&root) {
                            Ok(()) => info!("Game session cleaned up: {}", root),
                            Err(e) => warn!("Failed to clean up session {}: {}", root, e),
                        }
                        break;
                    }
                }
            }
            store.unwatch(watch.id);
        });
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_create_writes_initial_record_once() {
        let store = Arc::new(MemoryStore::new());
        let mut lifecycle = SessionLifecycle::new(store.clone(), "abc");
        lifecycle.create_session(375.0);

        let record = store.get("GameSessions/abc").unwrap();
        assert_eq!(record["countdown"], 4);
        assert_eq!(record["gameOver"], 0);
        assert_eq!(record["challenger"]["position"], "167.5,0");
        assert_eq!(record["challenged"]["position"], "207.5,0");
        assert_eq!(record["presence"]["challenged"], 0);

        store.set("GameSessions/abc/countdown", json!(2)).unwrap();
        lifecycle.create_session(375.0);
        assert_eq!(store.get("GameSessions/abc/countdown"), Some(json!(2)));
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn test_game_over_written_once() {
        let store = Arc::new(MemoryStore::new());
        let mut lifecycle = SessionLifecycle::new(store.clone(), "abc");
        lifecycle.create_session(375.0);
        lifecycle.push_game_over();
        lifecycle.push_game_over();
        assert_eq!(store.get("GameSessions/abc/gameOver"), Some(json!(1)));
        assert_eq!(store.write_count(), 2);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let mut lifecycle = SessionLifecycle::new(store.clone(), "abc");
        lifecycle.create_session(375.0);
        lifecycle.delete_session();
        lifecycle.delete_session();

        assert!(lifecycle.is_deleted());
        assert!(!store.exists("GameSessions/abc"));
        assert_eq!(store.delete_count("GameSessions/abc"), 1);
    }

    #[test]
    fn test_deleting_absent_session_is_not_an_error() {
        let store = Arc::new(MemoryStore::new());
        let mut first = SessionLifecycle::new(store.clone(), "gone");
        let mut second = SessionLifecycle::new(store.clone(), "gone");
        first.delete_session();
        second.delete_session();
        assert_eq!(store.delete_count("GameSessions/gone"), 2);
    }

    #[test]
    fn test_failed_delete_is_not_retried() {
        let store = Arc::new(MemoryStore::new());
        let mut lifecycle = SessionLifecycle::new(store.clone(), "abc");
        lifecycle.create_session(375.0);
        store.set_offline(true);
        lifecycle.delete_session();
        store.set_offline(false);
        lifecycle.delete_session();
        assert_eq!(store.delete_count("GameSessions/abc"), 0);
        assert!(store.exists("GameSessions/abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_removes_lingering_session() {
        let store = Arc::new(MemoryStore::new());
        let mut lifecycle = SessionLifecycle::new(store.clone(), "abc");
        lifecycle.create_session(375.0);
        lifecycle.push_game_over();
        lifecycle.schedule_cleanup(Duration::from_secs(10));
        lifecycle.schedule_cleanup(Duration::from_secs(1));
        assert_eq!(store.watcher_count(), 1);

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(store.exists("GameSessions/abc"));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!store.exists("GameSessions/abc"));
        assert_eq!(store.delete_count("GameSessions/abc"), 1);
        assert_eq!(store.watcher_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_stands_down_once_session_is_gone() {
        let store = Arc::new(MemoryStore::new());
        let mut winner = SessionLifecycle::new(store.clone(), "abc");
        let mut loser = SessionLifecycle::new(store.clone(), "abc");
        winner.create_session(375.0);
        winner.push_game_over();
        winner.schedule_cleanup(Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(1)).await;
        loser.delete_session();

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(store.delete_count("GameSessions/abc"), 1);
        assert_eq!(store.watcher_count(), 0);
    }
}

//! Background refresh loop.
//!
//! Periodically re-runs `load()` to pick up server-side changes and drains
//! the change bus for broadcasts from peer contexts. Races with
//! user-initiated mutations resolve last-write-wins by whole-collection
//! replacement.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::entity::Entity;
use crate::manager::EntityCacheManager;

/// Default poll interval in seconds.
pub const DEFAULT_POLL_SECS: u64 = 30;

/// Spawn the refresh loop for one manager. The first refresh happens one
/// full interval after the call, so the caller controls the initial
/// `load()`. Abort the returned handle to stop polling.
pub fn spawn_refresh<E: Entity>(
    manager: Arc<EntityCacheManager<E>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // interval fires immediately; swallow the first tick
        ticker.tick().await;
        loop {
            ticker.tick().await;
            debug!(kind = E::KIND, "background refresh");
            manager.load().await;
            manager.apply_pending();
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{ChangeBus, ChannelTransport};
    use crate::entity::OrderPolicy;
    use crate::store::FileStore;
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        id: String,
        body: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl Entity for Note {
        const KIND: &'static str = "notes";
        const ID_PREFIX: &'static str = "NOTE";
        const MAX_RETAINED: usize = 100;
        const ORDERING: OrderPolicy = OrderPolicy::Insertion;

        fn id(&self) -> &str {
            &self.id
        }

        fn set_id(&mut self, id: String) {
            self.id = id;
        }

        fn created_at(&self) -> DateTime<Utc> {
            self.created_at
        }

        fn updated_at(&self) -> DateTime<Utc> {
            self.updated_at
        }

        fn stamp_created(&mut self, at: DateTime<Utc>) {
            self.created_at = at;
            self.updated_at = at;
        }

        fn stamp_updated(&mut self, at: DateTime<Utc>) {
            self.updated_at = at;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_applies_peer_broadcasts() {
        let dir = tempfile::tempdir().expect("tempdir");
        let hub = ChannelTransport::hub();

        let manager = Arc::new(EntityCacheManager::<Note>::new(
            FileStore::new(dir.path()).expect("store"),
            ChangeBus::with_origin("ctx-a").add_transport(ChannelTransport::new(&hub)),
        ));

        let handle = spawn_refresh(Arc::clone(&manager), Duration::from_secs(30));

        // A peer context publishes a snapshot
        let peer = ChangeBus::with_origin("ctx-b").add_transport(ChannelTransport::new(&hub));
        let now = Utc::now();
        let snapshot = serde_json::to_value(vec![Note {
            id: "NOTE001".to_string(),
            body: "from peer".to_string(),
            created_at: now,
            updated_at: now,
        }])
        .expect("snapshot");
        peer.publish(Note::KIND, None, snapshot);

        // Let the paused clock pass one interval
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get_all()[0].body, "from peer");
        handle.abort();
    }
}

//! The entity cache manager.
//!
//! One `EntityCacheManager<E>` owns the authoritative in-memory copy of one
//! entity collection. Every mutation commits locally no matter what the
//! backend says, writes through to the durable store, records an audit
//! entry, and broadcasts the new collection snapshot to peer contexts.
//!
//! The remote API is an accelerant: mutations try it first and fall back to
//! a local-only commit on any failure. The only errors a caller sees are
//! precondition violations (`NotFound`) and import validation
//! (`InvalidFormat`).

use std::cmp::Ordering as CmpOrdering;
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::{ApiError, Remote};
use crate::audit::{diff_changes, AuditAction, AuditEntry};
use crate::bus::{ChangeBus, ChangeEvent};
use crate::entity::{next_local_id, Entity, OrderPolicy, StatusToggle};
use crate::error::CacheError;
use crate::store::{FileStore, StateEnvelope, StoreError};

// ============================================================================
// Constants
// ============================================================================

/// Listener event: the collection changed through a local mutation or load.
pub const EVENT_UPDATED: &str = "updated";

/// Listener event: the collection was replaced wholesale (import, or a
/// broadcast from a peer context).
pub const EVENT_REPLACED: &str = "replaced";

/// Listener event: the collection was cleared by an explicit user action.
pub const EVENT_CLEARED: &str = "cleared";

/// Consider loaded data stale after 1 hour without a refresh.
const STALE_MINUTES: i64 = 60;

/// Schema version written into export documents.
const EXPORT_VERSION: &str = "1.0";

// ============================================================================
// Sync status
// ============================================================================

/// Where the last `load()` got its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Remote,
    Store,
    Seed,
    Empty,
}

/// Snapshot of the manager's relationship with its backends; what a UI
/// shows as "saved" / "using offline data".
#[derive(Debug, Clone)]
pub struct SyncStatus {
    pub source: DataSource,
    pub refreshed_at: Option<DateTime<Utc>>,
    pub last_remote_error: Option<String>,
}

impl SyncStatus {
    pub fn is_stale(&self) -> bool {
        match self.refreshed_at {
            Some(at) => (Utc::now() - at).num_minutes() > STALE_MINUTES,
            None => true,
        }
    }

    /// True when the current view did not come from the backend.
    pub fn offline(&self) -> bool {
        matches!(self.source, DataSource::Store | DataSource::Seed)
    }
}

type ListenerFn<E> = Arc<dyn Fn(&[E]) + Send + Sync>;

struct Listener<E> {
    token: u64,
    event: String,
    callback: ListenerFn<E>,
}

// ============================================================================
// Manager
// ============================================================================

pub struct EntityCacheManager<E: Entity> {
    items: RwLock<Vec<E>>,
    store: FileStore,
    remote: Option<Box<dyn Remote<E>>>,
    bus: ChangeBus,
    listeners: Mutex<Vec<Listener<E>>>,
    next_token: AtomicU64,
    status: Mutex<SyncStatus>,
}

impl<E: Entity> EntityCacheManager<E> {
    /// A manager with no remote backend; all mutations are local-only.
    pub fn new(store: FileStore, bus: ChangeBus) -> Self {
        Self {
            items: RwLock::new(Vec::new()),
            store,
            remote: None,
            bus,
            listeners: Mutex::new(Vec::new()),
            next_token: AtomicU64::new(1),
            status: Mutex::new(SyncStatus {
                source: DataSource::Empty,
                refreshed_at: None,
                last_remote_error: None,
            }),
        }
    }

    pub fn with_remote(mut self, remote: impl Remote<E> + 'static) -> Self {
        self.remote = Some(Box::new(remote));
        self
    }

    pub fn kind(&self) -> &'static str {
        E::KIND
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Populate the collection: remote API first, then the durable store,
    /// then the seed set. Never fails; every failure degrades to the next
    /// fallback.
    pub async fn load(&self) {
        let local = match self.store.load_state::<E>(E::KIND) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(kind = E::KIND, error = %e, "local store unreadable");
                None
            }
        };

        // An explicit user clear blocks remote repopulation until the next
        // legitimate add
        if local.as_ref().is_some_and(|envelope| envelope.user_cleared) {
            debug!(kind = E::KIND, "collection cleared by user; skipping remote refresh");
            let items = local.map(|envelope| envelope.items).unwrap_or_default();
            let snapshot = self.set_items(items);
            self.set_source(DataSource::Store);
            self.notify(EVENT_UPDATED, &snapshot);
            return;
        }

        if let Some(remote) = &self.remote {
            match remote.list().await {
                Ok(items) => {
                    let snapshot = self.set_items(items);
                    self.persist(false, None);
                    self.set_source(DataSource::Remote);
                    self.clear_remote_error();
                    self.notify(EVENT_UPDATED, &snapshot);
                    debug!(kind = E::KIND, count = snapshot.len(), "loaded from remote API");
                    return;
                }
                Err(e) => {
                    warn!(kind = E::KIND, error = %e, "remote list failed; falling back to local store");
                    self.note_remote_error(&e);
                }
            }
        }

        match local {
            Some(envelope) if !envelope.items.is_empty() => {
                let snapshot = self.set_items(envelope.items);
                self.set_source(DataSource::Store);
                self.notify(EVENT_UPDATED, &snapshot);
                debug!(kind = E::KIND, count = snapshot.len(), "loaded from local store");
            }
            _ => {
                let seed = E::seed();
                if seed.is_empty() {
                    self.set_items(Vec::new());
                    self.set_source(DataSource::Empty);
                } else {
                    let snapshot = self.set_items(seed);
                    self.persist(false, None);
                    self.set_source(DataSource::Seed);
                    self.notify(EVENT_UPDATED, &snapshot);
                    debug!(kind = E::KIND, count = snapshot.len(), "seeded default entries");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Shallow copy of the collection; callers cannot mutate managed state.
    pub fn get_all(&self) -> Vec<E> {
        self.read_items().clone()
    }

    pub fn get(&self, id: &str) -> Option<E> {
        self.read_items().iter().find(|e| e.id() == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read_items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_items().is_empty()
    }

    /// Filtered, ordered subset. The predicate and comparator encode the
    /// entity type's matching contract (see e.g. `Protocol::match_compare`).
    pub fn query<P, C>(&self, predicate: P, compare: C) -> Vec<E>
    where
        P: Fn(&E) -> bool,
        C: Fn(&E, &E) -> CmpOrdering,
    {
        let mut matched: Vec<E> = self
            .read_items()
            .iter()
            .filter(|e| predicate(e))
            .cloned()
            .collect();
        matched.sort_by(|a, b| compare(a, b));
        matched
    }

    /// Audit history for this collection, newest first.
    pub fn history(&self) -> Vec<AuditEntry> {
        self.store.load_history(E::KIND)
    }

    pub fn sync_status(&self) -> SyncStatus {
        self.lock_status().clone()
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Add a new entity. Remote creation is attempted first; on any failure
    /// the entity is committed locally with a generated id, so the caller
    /// never blocks on the network. Returns the committed entity.
    pub async fn add(&self, mut entity: E) -> E {
        let now = Utc::now();
        entity.stamp_created(now);

        let mut remote_id = false;
        if let Some(remote) = &self.remote {
            match remote.create(&entity).await {
                Ok(confirmed) if !confirmed.id().is_empty() => {
                    entity = confirmed;
                    remote_id = true;
                }
                Ok(_) => {
                    warn!(kind = E::KIND, "remote create returned no id; keeping local copy");
                }
                Err(e) => {
                    warn!(kind = E::KIND, error = %e, "remote create failed; committing locally");
                    self.note_remote_error(&e);
                }
            }
        }

        let snapshot = {
            let mut items = self.write_items();
            if !remote_id {
                entity.set_id(next_local_id::<E>(&items));
            }
            // A poll may have raced the confirmed entity in already
            if let Some(position) = items.iter().position(|e| e.id() == entity.id()) {
                items[position] = entity.clone();
            } else {
                Self::insert_entity(&mut items, entity.clone());
            }
            items.clone()
        };

        // A new entry ends any user-cleared state
        self.persist(false, None);
        self.record(AuditAction::Create, &entity, None);
        self.broadcast(Some(entity.id().to_string()), &snapshot);
        self.notify(EVENT_UPDATED, &snapshot);
        entity
    }

    /// Id-preserving insert for entities pushed by the server (polling or a
    /// push feed). Entities whose id is already present are dropped, so
    /// redelivery is harmless. Returns whether the entity was inserted.
    pub fn ingest(&self, mut entity: E) -> bool {
        let snapshot = {
            let mut items = self.write_items();
            if entity.id().is_empty() {
                entity.set_id(next_local_id::<E>(&items));
            } else if items.iter().any(|e| e.id() == entity.id()) {
                return false;
            }
            Self::insert_entity(&mut items, entity.clone());
            items.clone()
        };

        self.persist(false, None);
        self.broadcast(Some(entity.id().to_string()), &snapshot);
        self.notify(EVENT_UPDATED, &snapshot);
        true
    }

    /// Apply a mutation to the entity with the given id. Fails with
    /// [`CacheError::NotFound`] before any state change when the id is
    /// absent; otherwise the merged entity is committed locally regardless
    /// of the remote outcome. Returns the committed entity.
    pub async fn update<F>(&self, id: &str, mutate: F) -> Result<E, CacheError>
    where
        F: FnOnce(&mut E),
    {
        let old = self.get(id).ok_or_else(|| CacheError::NotFound {
            kind: E::KIND,
            id: id.to_string(),
        })?;

        let mut merged = old.clone();
        mutate(&mut merged);
        // The id is not mutable through update
        merged.set_id(old.id().to_string());
        merged.stamp_updated(Utc::now());

        if let Some(remote) = &self.remote {
            match remote.update(id, &merged).await {
                Ok(confirmed) if confirmed.id() == id => merged = confirmed,
                Ok(_) => {
                    warn!(kind = E::KIND, id, "remote update changed the id; keeping local merge");
                }
                Err(e) => {
                    warn!(kind = E::KIND, id, error = %e, "remote update failed; committing locally");
                    self.note_remote_error(&e);
                }
            }
        }

        let snapshot = self.commit_replace(merged.clone());
        self.persist(false, None);
        self.record(AuditAction::Update, &merged, diff_changes(&old, &merged));
        self.broadcast(Some(id.to_string()), &snapshot);
        self.notify(EVENT_UPDATED, &snapshot);
        Ok(merged)
    }

    /// In-place bulk mutation with one persist/broadcast. The closure
    /// returns whether it changed the entity; unchanged entities keep their
    /// timestamps. Returns the number of changed entities. No remote sync.
    pub fn update_each<F>(&self, mut mutate: F) -> usize
    where
        F: FnMut(&mut E) -> bool,
    {
        let now = Utc::now();
        let (changed, snapshot) = {
            let mut items = self.write_items();
            let mut changed = 0;
            for entity in items.iter_mut() {
                if mutate(entity) {
                    entity.stamp_updated(now);
                    changed += 1;
                }
            }
            (changed, items.clone())
        };

        if changed > 0 {
            self.persist(false, None);
            self.broadcast(None, &snapshot);
            self.notify(EVENT_UPDATED, &snapshot);
        }
        changed
    }

    /// Remove the entity with the given id. Fails with
    /// [`CacheError::NotFound`] before any state change when the id is
    /// absent. The removal is committed locally regardless of the remote
    /// outcome. Returns the removed entity for undo/audit use.
    pub async fn delete(&self, id: &str) -> Result<E, CacheError> {
        let removed = self.get(id).ok_or_else(|| CacheError::NotFound {
            kind: E::KIND,
            id: id.to_string(),
        })?;

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.delete(id).await {
                warn!(kind = E::KIND, id, error = %e, "remote delete failed; removing locally");
                self.note_remote_error(&e);
            }
        }

        let snapshot = {
            let mut items = self.write_items();
            items.retain(|e| e.id() != id);
            items.clone()
        };

        self.persist(false, None);
        self.record(AuditAction::Delete, &removed, None);
        self.broadcast(Some(id.to_string()), &snapshot);
        self.notify(EVENT_UPDATED, &snapshot);
        Ok(removed)
    }

    /// Empty the collection and set the user-cleared sentinel, so a
    /// background refresh cannot resurrect old entries from a stale remote
    /// response. The sentinel lifts on the next add/ingest/import.
    pub fn clear_all(&self) {
        let now = Utc::now();
        {
            let mut items = self.write_items();
            items.clear();
        }

        if let Err(e) = self
            .store
            .save_state::<E>(E::KIND, &StateEnvelope::cleared(now))
        {
            warn!(kind = E::KIND, error = %e, "failed to persist cleared collection");
        }
        self.broadcast(None, &[]);
        self.notify(EVENT_CLEARED, &[]);
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register an in-process observer for one listener event. Returns a
    /// token for [`Self::remove_listener`].
    pub fn add_listener<F>(&self, event: impl Into<String>, callback: F) -> u64
    where
        F: Fn(&[E]) + Send + Sync + 'static,
    {
        let token = self.next_token.fetch_add(1, AtomicOrdering::SeqCst);
        self.lock_listeners().push(Listener {
            token,
            event: event.into(),
            callback: Arc::new(callback),
        });
        token
    }

    pub fn remove_listener(&self, token: u64) {
        self.lock_listeners().retain(|l| l.token != token);
    }

    fn notify(&self, event: &str, snapshot: &[E]) {
        let callbacks: Vec<ListenerFn<E>> = self
            .lock_listeners()
            .iter()
            .filter(|l| l.event == event)
            .map(|l| Arc::clone(&l.callback))
            .collect();

        for callback in callbacks {
            // One panicking listener must not stop the others
            if catch_unwind(AssertUnwindSafe(|| callback(snapshot))).is_err() {
                warn!(kind = E::KIND, event, "listener panicked");
            }
        }
    }

    // ------------------------------------------------------------------
    // Export / import
    // ------------------------------------------------------------------

    /// Serialize the collection to the portable export document:
    /// `{ "<kind>": [entities], "exportTime": ..., "version": "1.0" }`.
    pub fn export_all(&self) -> String {
        let mut document = serde_json::Map::new();
        document.insert(
            E::KIND.to_string(),
            serde_json::to_value(self.get_all()).unwrap_or_else(|_| Value::Array(Vec::new())),
        );
        document.insert(
            "exportTime".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );
        document.insert(
            "version".to_string(),
            Value::String(EXPORT_VERSION.to_string()),
        );

        serde_json::to_string_pretty(&Value::Object(document))
            .unwrap_or_else(|_| "{}".to_string())
    }

    /// Write the export document to `oneorder_<kind>_<date>.json` in `dir`
    /// and return the path.
    pub fn export_to(&self, dir: &Path) -> Result<PathBuf, CacheError> {
        let name = format!(
            "oneorder_{}_{}.json",
            E::KIND,
            Utc::now().format("%Y-%m-%d")
        );
        let path = dir.join(name);
        std::fs::write(&path, self.export_all()).map_err(|source| {
            CacheError::Storage(StoreError::Write {
                key: path.display().to_string(),
                source,
            })
        })?;
        Ok(path)
    }

    /// Replace the whole collection from an export document. Validation
    /// happens before any state is touched; on success the collection and
    /// store are replaced, the user-cleared sentinel is reset, and a
    /// `replaced` notification fires.
    pub fn import_all(&self, blob: &str) -> Result<Vec<E>, CacheError> {
        let document: Value = serde_json::from_str(blob)
            .map_err(|e| CacheError::InvalidFormat(format!("not valid JSON: {}", e)))?;

        let items_value = document
            .get(E::KIND)
            .ok_or_else(|| CacheError::InvalidFormat(format!("missing '{}' array", E::KIND)))?;
        if !items_value.is_array() {
            return Err(CacheError::InvalidFormat(format!(
                "'{}' is not an array",
                E::KIND
            )));
        }

        let items: Vec<E> = serde_json::from_value(items_value.clone())
            .map_err(|e| CacheError::InvalidFormat(format!("bad entity shape: {}", e)))?;

        let snapshot = self.set_items(items);
        self.persist(false, None);
        self.broadcast(None, &snapshot);
        self.notify(EVENT_REPLACED, &snapshot);
        Ok(snapshot)
    }

    // ------------------------------------------------------------------
    // Cross-context reconciliation
    // ------------------------------------------------------------------

    /// Drain the change bus and apply broadcasts from peer contexts by
    /// whole-collection replacement (last writer wins). Replaying an event
    /// is harmless. Returns the number of events applied.
    pub fn apply_pending(&self) -> usize {
        let tag = ChangeEvent::kind_tag(E::KIND);
        let mut applied = 0;

        for event in self.bus.drain() {
            if event.event_type != tag {
                continue;
            }
            match serde_json::from_value::<Vec<E>>(event.items.clone()) {
                Ok(items) => {
                    let snapshot = self.set_items(items);
                    self.persist_preserving_sentinel();
                    self.notify(EVENT_REPLACED, &snapshot);
                    applied += 1;
                }
                Err(e) => {
                    debug!(kind = E::KIND, error = %e, "ignoring malformed change event");
                }
            }
        }
        applied
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn read_items(&self) -> std::sync::RwLockReadGuard<'_, Vec<E>> {
        self.items.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_items(&self) -> std::sync::RwLockWriteGuard<'_, Vec<E>> {
        self.items.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<Listener<E>>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_status(&self) -> std::sync::MutexGuard<'_, SyncStatus> {
        self.status
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the collection (deduplicated by id, capped) and return the
    /// committed snapshot.
    fn set_items(&self, items: Vec<E>) -> Vec<E> {
        let mut seen = HashSet::new();
        let mut deduped: Vec<E> = items
            .into_iter()
            .filter(|e| seen.insert(e.id().to_string()))
            .collect();
        Self::enforce_cap(&mut deduped);

        let mut guard = self.write_items();
        *guard = deduped;
        guard.clone()
    }

    /// Replace the entry matching `entity`'s id, or insert it if a peer
    /// removed it while the remote call was in flight.
    fn commit_replace(&self, entity: E) -> Vec<E> {
        let mut items = self.write_items();
        if let Some(position) = items.iter().position(|e| e.id() == entity.id()) {
            items[position] = entity;
        } else {
            Self::insert_entity(&mut items, entity);
        }
        items.clone()
    }

    fn insert_entity(items: &mut Vec<E>, entity: E) {
        match E::ORDERING {
            OrderPolicy::Insertion => items.push(entity),
            OrderPolicy::NewestFirst => items.insert(0, entity),
        }
        Self::enforce_cap(items);
    }

    /// Drop entries beyond the cap from the old end of the ordering.
    fn enforce_cap(items: &mut Vec<E>) {
        if items.len() <= E::MAX_RETAINED {
            return;
        }
        let excess = items.len() - E::MAX_RETAINED;
        match E::ORDERING {
            OrderPolicy::Insertion => {
                items.drain(0..excess);
            }
            OrderPolicy::NewestFirst => items.truncate(E::MAX_RETAINED),
        }
    }

    /// Write the current collection through to the durable store. Storage
    /// failures are logged; in-memory state stays correct for this session.
    fn persist(&self, user_cleared: bool, last_clear_time: Option<DateTime<Utc>>) {
        let envelope = StateEnvelope {
            items: self.get_all(),
            user_cleared,
            last_clear_time,
            saved_at: Some(Utc::now()),
        };
        if let Err(e) = self.store.save_state(E::KIND, &envelope) {
            warn!(kind = E::KIND, error = %e, "failed to persist collection");
        }
    }

    /// Write-through for broadcast application. A peer that shares our
    /// store directory already wrote the items and possibly a user-cleared
    /// sentinel; keep whatever sentinel state the store carries instead of
    /// resetting it.
    fn persist_preserving_sentinel(&self) {
        let (user_cleared, last_clear_time) = match self.store.load_state::<E>(E::KIND) {
            Ok(Some(envelope)) => (envelope.user_cleared, envelope.last_clear_time),
            _ => (false, None),
        };
        self.persist(user_cleared, last_clear_time);
    }

    fn broadcast(&self, entity_id: Option<String>, snapshot: &[E]) {
        match serde_json::to_value(snapshot) {
            Ok(items) => self.bus.publish(E::KIND, entity_id, items),
            Err(e) => warn!(kind = E::KIND, error = %e, "failed to serialize change event"),
        }
    }

    fn record(
        &self,
        action: AuditAction,
        entity: &E,
        changes: Option<std::collections::BTreeMap<String, crate::audit::FieldChange>>,
    ) {
        let entry = AuditEntry::new(action, entity.id(), entity.label()).with_changes(changes);
        self.store.push_history(E::KIND, entry);
    }

    fn set_source(&self, source: DataSource) {
        let mut status = self.lock_status();
        status.source = source;
        status.refreshed_at = Some(Utc::now());
    }

    fn note_remote_error(&self, error: &ApiError) {
        self.lock_status().last_remote_error = Some(error.to_string());
    }

    fn clear_remote_error(&self) {
        self.lock_status().last_remote_error = None;
    }
}

impl<E: StatusToggle> EntityCacheManager<E> {
    /// Flip the entity's binary status field. Fails with
    /// [`CacheError::NotFound`] before any state change when the id is
    /// absent. The flip commits locally; remote sync is best-effort.
    pub async fn toggle_status(&self, id: &str) -> Result<E, CacheError> {
        let old = self.get(id).ok_or_else(|| CacheError::NotFound {
            kind: E::KIND,
            id: id.to_string(),
        })?;

        let mut flipped = old.clone();
        let new_state = flipped.flip_status();
        flipped.stamp_updated(Utc::now());

        if let Some(remote) = &self.remote {
            if let Err(e) = remote.set_status(id, new_state).await {
                debug!(kind = E::KIND, id, error = %e, "remote status sync failed; keeping local state");
                self.note_remote_error(&e);
            }
        }

        let snapshot = self.commit_replace(flipped.clone());
        self.persist(false, None);
        self.record(AuditAction::StatusChange, &flipped, diff_changes(&old, &flipped));
        self.broadcast(Some(id.to_string()), &snapshot);
        self.notify(EVENT_UPDATED, &snapshot);
        Ok(flipped)
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Change bus: publish/subscribe fan-out of collection changes.
//!
//! Every mutation publishes one [`ChangeEvent`] carrying a full collection
//! snapshot. The bus forwards it to each registered [`Transport`]; receiving
//! contexts drop their own events and reconcile by whole-collection
//! replacement, which makes re-delivery harmless.
//!
//! Transports are pluggable: the in-process channel transport covers sibling
//! components, the store-signal transport covers other processes sharing the
//! durable store, and further transports (e.g. WebSocket) can be added
//! without touching cache logic.

pub mod transport;

pub use transport::{ChannelTransport, StoreSignalTransport, Transport};

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Length of the random per-context origin id.
const ORIGIN_ID_LEN: usize = 8;

/// One collection change, broadcast to every peer context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// `"<kind>Changed"`, e.g. `"protocolsChanged"`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Context that produced the event; receivers drop their own.
    pub origin: String,
    /// Monotonic per-origin sequence number.
    pub seq: u64,
    /// Id of the entity the mutation touched, when it touched exactly one.
    #[serde(rename = "entityId", default)]
    pub entity_id: Option<String>,
    /// Full collection snapshot; receivers reconcile by replacement.
    pub items: Value,
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Event-type tag for a collection kind.
    pub fn kind_tag(kind: &str) -> String {
        format!("{}Changed", kind)
    }
}

/// Fan-out hub owned by one cache manager.
pub struct ChangeBus {
    origin: String,
    seq: AtomicU64,
    transports: Vec<Box<dyn Transport>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        let origin: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(ORIGIN_ID_LEN)
            .map(char::from)
            .collect();
        Self::with_origin(origin)
    }

    /// Fixed origin id; useful in tests and when the embedding application
    /// already has a context identity.
    pub fn with_origin(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            seq: AtomicU64::new(0),
            transports: Vec::new(),
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn add_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transports.push(Box::new(transport));
        self
    }

    /// Publish one change to every transport. Transport failures are logged
    /// and do not affect the others or the caller.
    pub fn publish(&self, kind: &str, entity_id: Option<String>, items: Value) {
        let event = ChangeEvent {
            event_type: ChangeEvent::kind_tag(kind),
            origin: self.origin.clone(),
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            entity_id,
            items,
            at: Utc::now(),
        };

        for transport in &self.transports {
            if let Err(e) = transport.publish(&event) {
                warn!(transport = transport.name(), error = %e, "failed to publish change event");
            }
        }
    }

    /// Drain events received from peer contexts, oldest first. Events this
    /// bus published itself are filtered out.
    pub fn drain(&self) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        for transport in &self.transports {
            match transport.drain() {
                Ok(received) => events.extend(received),
                Err(e) => {
                    warn!(transport = transport.name(), error = %e, "failed to drain change events");
                }
            }
        }
        events.retain(|event| event.origin != self.origin);
        events
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================

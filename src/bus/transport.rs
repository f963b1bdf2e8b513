use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::debug;

use super::ChangeEvent;

/// Capacity of the in-process channel. Slow consumers past this lag lose
/// intermediate events, which is safe: every event carries a full snapshot.
const CHANNEL_CAPACITY: usize = 64;

/// Delivery path to one class of peer context.
pub trait Transport: Send + Sync {
    fn name(&self) -> &'static str;

    /// Deliver an event to peers.
    fn publish(&self, event: &ChangeEvent) -> Result<()>;

    /// Return events received from peers since the last call.
    fn drain(&self) -> Result<Vec<ChangeEvent>>;
}

/// In-process transport over a tokio broadcast channel.
///
/// Peers are created from a shared hub; every peer sees every other peer's
/// events. This is the delivery path between components of one application
/// (the embedded-frame case of the source system).
pub struct ChannelTransport {
    tx: broadcast::Sender<ChangeEvent>,
    rx: Mutex<broadcast::Receiver<ChangeEvent>>,
}

impl ChannelTransport {
    /// Create a hub to connect peers through.
    pub fn hub() -> broadcast::Sender<ChangeEvent> {
        broadcast::channel(CHANNEL_CAPACITY).0
    }

    pub fn new(hub: &broadcast::Sender<ChangeEvent>) -> Self {
        Self {
            tx: hub.clone(),
            rx: Mutex::new(hub.subscribe()),
        }
    }
}

impl Transport for ChannelTransport {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn publish(&self, event: &ChangeEvent) -> Result<()> {
        // A send with no live receivers is not an error
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    fn drain(&self) -> Result<Vec<ChangeEvent>> {
        use broadcast::error::TryRecvError;

        let mut rx = self.rx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
                Err(TryRecvError::Lagged(missed)) => {
                    debug!(missed, "channel transport lagged; continuing from newest events");
                }
            }
        }
        Ok(events)
    }
}

/// Cross-process transport through a signal file next to the durable store.
///
/// The analogue of the browser's storage-change event: the writer drops the
/// latest event into the file, readers poll it and pick up anything they
/// have not seen. Only the newest event survives between polls, which is
/// safe because every event carries a full snapshot.
pub struct StoreSignalTransport {
    path: PathBuf,
    last_seen: Mutex<Option<(String, u64)>>,
}

impl StoreSignalTransport {
    /// `path` is per collection, from [`FileStore::signal_path`].
    ///
    /// [`FileStore::signal_path`]: crate::store::FileStore::signal_path
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            last_seen: Mutex::new(None),
        }
    }
}

impl Transport for StoreSignalTransport {
    fn name(&self) -> &'static str {
        "store-signal"
    }

    fn publish(&self, event: &ChangeEvent) -> Result<()> {
        let contents = serde_json::to_string(event).context("serialize change event")?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("write signal file {}", self.path.display()))?;

        // Mark our own write as seen so a later drain doesn't re-read it
        let mut last_seen = self
            .last_seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last_seen = Some((event.origin.clone(), event.seq));
        Ok(())
    }

    fn drain(&self) -> Result<Vec<ChangeEvent>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let contents = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read signal file {}", self.path.display()))?;

        let event: ChangeEvent = match serde_json::from_str(&contents) {
            Ok(event) => event,
            Err(e) => {
                // A torn write from a concurrent publisher; the next poll
                // sees the completed file
                debug!(path = %self.path.display(), error = %e, "unreadable signal file");
                return Ok(Vec::new());
            }
        };

        let key = (event.origin.clone(), event.seq);
        let mut last_seen = self
            .last_seen
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if last_seen.as_ref() == Some(&key) {
            return Ok(Vec::new());
        }
        *last_seen = Some(key);
        Ok(vec![event])
    }
}

// ============================================================================
// Tests
// ============================================================================

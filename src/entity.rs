//! The collection contract implemented by every cached entity type.
//!
//! An entity type declares its collection name, local-id scheme, ordering
//! policy, and retention cap through associated constants, and exposes its
//! id and timestamps through accessors. The manager is generic over this
//! trait and contains no per-type logic.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

/// How a collection keeps its entries ordered.
///
/// The policy also decides which end is "oldest" when the retention cap
/// trims the collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderPolicy {
    /// Entries stay in the order they were inserted; oldest at the front.
    Insertion,
    /// New entries go to the front; oldest at the back.
    NewestFirst,
}

/// One cached entity type.
pub trait Entity: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Collection name; used for storage keys, endpoint paths, and
    /// broadcast tags (`"<KIND>Changed"`).
    const KIND: &'static str;

    /// Prefix for locally generated ids, e.g. `PROTO` for `PROTO004`.
    const ID_PREFIX: &'static str;

    /// Maximum retained entries; entries beyond the cap are dropped
    /// silently from the old end of [`Self::ORDERING`].
    const MAX_RETAINED: usize;

    /// Collection ordering policy.
    const ORDERING: OrderPolicy;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    fn created_at(&self) -> DateTime<Utc>;

    fn updated_at(&self) -> DateTime<Utc>;

    /// Set both timestamps; called once when an entity enters the collection
    /// through `add`.
    fn stamp_created(&mut self, at: DateTime<Utc>);

    /// Bump the update timestamp; called on every mutation.
    fn stamp_updated(&mut self, at: DateTime<Utc>);

    /// Short human-readable label for audit entries.
    fn label(&self) -> String {
        self.id().to_string()
    }

    /// Entries used when both the remote API and the local store come up
    /// empty, so a demo or offline run never starts blank.
    fn seed() -> Vec<Self> {
        Vec::new()
    }
}

/// Entity types that carry a binary status field (active flag, read flag).
pub trait StatusToggle: Entity {
    /// Flip the status field and return its new value.
    fn flip_status(&mut self) -> bool;
}

/// Next locally generated id: `max(existing numeric suffixes) + 1`,
/// zero-padded to three digits. Ids that do not carry [`Entity::ID_PREFIX`]
/// (e.g. remote-assigned ids with a different scheme) are ignored.
pub(crate) fn next_local_id<E: Entity>(items: &[E]) -> String {
    let max = items
        .iter()
        .filter_map(|e| e.id().strip_prefix(E::ID_PREFIX))
        .filter_map(|suffix| suffix.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    format!("{}{:03}", E::ID_PREFIX, max + 1)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Widget {
        id: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    }

    impl Widget {
        fn with_id(id: &str) -> Self {
            let now = Utc::now();
            Self {
                id: id.to_string(),
                created_at: now,
                updated_at: now,
            }
        }
    }

    impl Entity for Widget {
        const KIND: &'static str = "widgets";
        const ID_PREFIX: &'static str = "WDG";
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

    #[test]
    fn test_next_local_id_empty_collection() {
        let items: Vec<Widget> = Vec::new();
        assert_eq!(next_local_id::<Widget>(&items), "WDG001");
    }

    #[test]
    fn test_next_local_id_continues_sequence() {
        let items = vec![
            Widget::with_id("WDG001"),
            Widget::with_id("WDG002"),
            Widget::with_id("WDG003"),
        ];
        assert_eq!(next_local_id::<Widget>(&items), "WDG004");
    }

    #[test]
    fn test_next_local_id_ignores_foreign_ids() {
        // Remote-assigned ids with a different scheme don't take part
        let items = vec![
            Widget::with_id("WDG002"),
            Widget::with_id("srv-9f3a"),
            Widget::with_id("WDGX"),
        ];
        assert_eq!(next_local_id::<Widget>(&items), "WDG003");
    }

    #[test]
    fn test_next_local_id_pads_to_three_digits() {
        let items = vec![Widget::with_id("WDG099")];
        assert_eq!(next_local_id::<Widget>(&items), "WDG100");
    }
}

//! Dispatch and system notifications.
//!
//! Collection contract: newest first, ids `NTFxxx`, capped at 100 (older
//! notices drop off silently), read-flag toggle via `toggle_status`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::{Entity, OrderPolicy, StatusToggle};
use crate::manager::EntityCacheManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Assignment,
    #[default]
    System,
    Urgent,
    Success,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "isRead", default)]
    pub is_read: bool,
    #[serde(default)]
    pub priority: Priority,
    #[serde(rename = "orderNo", default)]
    pub order_no: Option<String>,
    #[serde(rename = "serviceCode", default)]
    pub service_code: Option<String>,
    #[serde(rename = "operatorId", default)]
    pub operator_id: Option<String>,
    #[serde(rename = "actionUrl", default)]
    pub action_url: Option<String>,
    #[serde(default = "empty_object")]
    pub metadata: Value,
    #[serde(rename = "updatedAt", default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Notification {
    pub fn new(kind: NotificationKind, title: &str, message: &str) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            kind,
            title: title.to_string(),
            message: message.to_string(),
            timestamp: now,
            is_read: false,
            priority: Priority::Normal,
            order_no: None,
            service_code: None,
            operator_id: None,
            action_url: None,
            metadata: empty_object(),
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_order(mut self, order_no: &str, service_code: &str) -> Self {
        self.order_no = Some(order_no.to_string());
        self.service_code = Some(service_code.to_string());
        self
    }
}

/// Count of unread notifications.
pub fn unread_count(manager: &EntityCacheManager<Notification>) -> usize {
    manager
        .get_all()
        .iter()
        .filter(|notification| !notification.is_read)
        .count()
}

/// Mark every notification read in one pass; returns how many changed.
pub fn mark_all_read(manager: &EntityCacheManager<Notification>) -> usize {
    manager.update_each(|notification| {
        if notification.is_read {
            false
        } else {
            notification.is_read = true;
            true
        }
    })
}

impl Entity for Notification {
    const KIND: &'static str = "notifications";
    const ID_PREFIX: &'static str = "NTF";
    const MAX_RETAINED: usize = 100;
    const ORDERING: OrderPolicy = OrderPolicy::NewestFirst;

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    fn stamp_created(&mut self, at: DateTime<Utc>) {
        self.timestamp = at;
        self.updated_at = at;
    }

    fn stamp_updated(&mut self, at: DateTime<Utc>) {
        self.updated_at = at;
    }

    fn label(&self) -> String {
        self.title.clone()
    }

    fn seed() -> Vec<Self> {
        vec![
            Notification::new(
                NotificationKind::System,
                "Welcome to OneOrder",
                "You are viewing offline data; changes sync when the backend is reachable.",
            ),
            Notification::new(
                NotificationKind::Assignment,
                "New service assignment",
                "Order ORD-2025-0001 assigned: ocean booking, Shanghai to Rotterdam.",
            )
            .with_order("ORD-2025-0001", "BOOKING")
            .with_priority(Priority::High),
            Notification::new(
                NotificationKind::System,
                "Protocol library updated",
                "Nine internal commission protocols are available for dispatch.",
            ),
        ]
    }
}

impl StatusToggle for Notification {
    fn flip_status(&mut self) -> bool {
        self.is_read = !self.is_read;
        self.is_read
    }
}

// ============================================================================
// Tests
// ============================================================================

use super::single_table_entity;
use crate::core::TableName;
use crate::store::{CacheStore, StoreKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Records that hang off a guest and go away with it.
pub trait GuestOwned {
    fn belongs_to(&self, guest_id: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestReminder {
    #[serde(default)]
    pub id: String,
    pub guest_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dismissed_at: Option<DateTime<Utc>>,
}

impl GuestReminder {
    pub fn new(guest_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            guest_id: guest_id.into(),
            message: message.into(),
            created_by: None,
            created_at: Utc::now(),
            dismissed_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestWarning {
    #[serde(default)]
    pub id: String,
    pub guest_id: String,
    pub message: String,
    #[serde(default)]
    pub severity: u8,
    #[serde(default = "active_by_default")]
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

fn active_by_default() -> bool {
    true
}

impl GuestWarning {
    pub fn new(guest_id: impl Into<String>, message: impl Into<String>, severity: u8) -> Self {
        Self {
            id: String::new(),
            guest_id: guest_id.into(),
            message: message.into(),
            severity,
            active: true,
            created_at: Utc::now(),
        }
    }
}

/// Link letting `proxy_id` pick up on behalf of `guest_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuestProxy {
    #[serde(default)]
    pub id: String,
    pub guest_id: String,
    pub proxy_id: String,
    pub created_at: DateTime<Utc>,
}

impl GuestProxy {
    pub fn new(guest_id: impl Into<String>, proxy_id: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            guest_id: guest_id.into(),
            proxy_id: proxy_id.into(),
            created_at: Utc::now(),
        }
    }
}

single_table_entity!(GuestReminder, StoreKind::Reminders, TableName::GuestReminders, |r| {
    r.created_at
});
single_table_entity!(GuestWarning, StoreKind::Warnings, TableName::GuestWarnings, |w| {
    w.created_at
});
single_table_entity!(GuestProxy, StoreKind::GuestProxies, TableName::GuestProxies, |p| {
    p.created_at
});

impl GuestOwned for GuestReminder {
    fn belongs_to(&self, guest_id: &str) -> bool {
        self.guest_id == guest_id
    }
}

impl GuestOwned for GuestWarning {
    fn belongs_to(&self, guest_id: &str) -> bool {
        self.guest_id == guest_id
    }
}

// A link is meaningless once either side is gone.
impl GuestOwned for GuestProxy {
    fn belongs_to(&self, guest_id: &str) -> bool {
        self.guest_id == guest_id || self.proxy_id == guest_id
    }
}

impl CacheStore<GuestWarning> {
    pub fn active_for(&self, guest_id: &str) -> Vec<GuestWarning> {
        self.filter(|w| w.active && w.guest_id == guest_id)
    }
}

impl CacheStore<GuestReminder> {
    pub fn pending_for(&self, guest_id: &str) -> Vec<GuestReminder> {
        self.filter(|r| r.dismissed_at.is_none() && r.guest_id == guest_id)
    }
}

impl CacheStore<GuestProxy> {
    pub fn proxies_of(&self, guest_id: &str) -> Vec<String> {
        self.filter(|p| p.guest_id == guest_id)
            .into_iter()
            .map(|p| p.proxy_id)
            .collect()
    }
}

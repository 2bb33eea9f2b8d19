//! In-memory mirror of the ban lists for fast admission-path checks.
//!
//! Loaded from the store at construction and updated whenever an admin
//! action adds or removes a ban, so the hot path never touches the store.

use dashmap::DashMap;
use tracing::debug;

use super::BanRecord;

/// A mirrored ban entry.
#[derive(Debug, Clone)]
pub struct BanEntry {
    /// Reason recorded with the ban.
    pub reason: String,
    /// Unix timestamp when the ban was recorded.
    pub banned_at: i64,
}

/// Mirror of active user and channel bans.
#[derive(Debug, Default)]
pub struct BanMirror {
    users: DashMap<String, BanEntry>,
    channels: DashMap<String, BanEntry>,
}

impl BanMirror {
    /// Create an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populate the mirror from store records.
    pub fn load(users: Vec<BanRecord>, channels: Vec<BanRecord>) -> Self {
        let mirror = Self::new();
        for record in users {
            mirror.users.insert(
                record.subject_id,
                BanEntry {
                    reason: record.reason,
                    banned_at: record.banned_at,
                },
            );
        }
        for record in channels {
            mirror.channels.insert(
                record.subject_id,
                BanEntry {
                    reason: record.reason,
                    banned_at: record.banned_at,
                },
            );
        }
        debug!(
            users = mirror.users.len(),
            channels = mirror.channels.len(),
            "Ban mirror loaded"
        );
        mirror
    }

    /// Whether a user is banned.
    pub fn is_banned_user(&self, id: &str) -> bool {
        self.users.contains_key(id)
    }

    /// Whether a channel is banned.
    pub fn is_banned_channel(&self, id: &str) -> bool {
        self.channels.contains_key(id)
    }

    /// Look up a user's ban entry for reporting.
    pub fn user_ban(&self, id: &str) -> Option<BanEntry> {
        self.users.get(id).map(|entry| entry.value().clone())
    }

    pub fn insert_user(&self, id: String, entry: BanEntry) {
        self.users.insert(id, entry);
    }

    pub fn insert_channel(&self, id: String, entry: BanEntry) {
        self.channels.insert(id, entry);
    }

    pub fn remove_user(&self, id: &str) {
        self.users.remove(id);
    }

    pub fn remove_channel(&self, id: &str) {
        self.channels.remove(id);
    }
}

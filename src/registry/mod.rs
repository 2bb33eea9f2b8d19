//! Authorization registry: permanent grants, bans, and the user population.
//!
//! Owns the grant and ban records exclusively. Ban lookups on the admission
//! path hit an in-memory mirror; every mutation goes through the store and
//! the mirror in that order.

mod cache;

pub use cache::{BanEntry, BanMirror};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AccessError, AccessResult};
use crate::store::{Filter, Store, decode, encode};

/// Collection names.
const GRANTS: &str = "authorized_users";
const BANNED_USERS: &str = "banned_users";
const BANNED_CHANNELS: &str = "banned_channels";
const USERS: &str = "users";

/// A permanent, non-expiring access grant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    pub user_id: String,
    pub granted_by: String,
    /// Unix timestamp of the grant.
    pub granted_at: i64,
}

/// A ban record. Presence of a record means banned; the subject kind is
/// implied by the collection it lives in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanRecord {
    pub subject_id: String,
    pub reason: String,
    /// Unix timestamp of the ban.
    pub banned_at: i64,
}

/// A known caller, tracked as the broadcast recipient population.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: String,
    /// Unix timestamp of first contact.
    pub registered_at: i64,
}

/// Registry over owner identity, grants, bans, and known users.
pub struct AuthorizationRegistry {
    store: Arc<dyn Store>,
    owner_id: String,
    mirror: BanMirror,
}

impl AuthorizationRegistry {
    /// Build a registry, loading the ban mirror from the store.
    pub async fn new(store: Arc<dyn Store>, owner_id: String) -> AccessResult<Self> {
        let user_bans = store.find_all(BANNED_USERS, &Filter::all()).await?;
        let channel_bans = store.find_all(BANNED_CHANNELS, &Filter::all()).await?;

        let user_bans = user_bans
            .into_iter()
            .map(decode::<BanRecord>)
            .collect::<Result<Vec<_>, _>>()?;
        let channel_bans = channel_bans
            .into_iter()
            .map(decode::<BanRecord>)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            store,
            owner_id,
            mirror: BanMirror::load(user_bans, channel_bans),
        })
    }

    /// The configured owner identifier.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Whether `id` is the owner.
    pub fn is_owner(&self, id: &str) -> bool {
        id == self.owner_id
    }

    /// Whether `id` holds a user ban. Mirror lookup, O(1).
    pub fn is_banned_user(&self, id: &str) -> bool {
        self.mirror.is_banned_user(id)
    }

    /// Whether `id` holds a channel ban. Mirror lookup, O(1).
    pub fn is_banned_channel(&self, id: &str) -> bool {
        self.mirror.is_banned_channel(id)
    }

    /// Look up the ban entry for a user, for "you are banned" reporting.
    pub fn user_ban(&self, id: &str) -> Option<BanEntry> {
        self.mirror.user_ban(id)
    }

    // ========== Ban operations ==========

    /// Ban a user. Fails with [`AccessError::OwnerProtected`] for the owner.
    ///
    /// Idempotent upsert; returns whether a prior record existed so the
    /// caller can report "already banned".
    pub async fn ban_user(&self, id: &str, reason: &str) -> AccessResult<bool> {
        if self.is_owner(id) {
            return Err(AccessError::OwnerProtected);
        }
        let record = BanRecord {
            subject_id: id.to_string(),
            reason: reason.to_string(),
            banned_at: chrono::Utc::now().timestamp(),
        };
        let existed = self
            .store
            .upsert(BANNED_USERS, &Filter::all().eq("subject_id", id), encode(&record)?)
            .await?;
        self.mirror.insert_user(
            record.subject_id,
            BanEntry {
                reason: record.reason,
                banned_at: record.banned_at,
            },
        );
        info!(user = %id, already_banned = existed, "User banned");
        Ok(existed)
    }

    /// Lift a user ban. Fails with [`AccessError::NotFound`] if absent.
    pub async fn unban_user(&self, id: &str) -> AccessResult<()> {
        let removed = self
            .store
            .delete(BANNED_USERS, &Filter::all().eq("subject_id", id))
            .await?;
        if removed == 0 {
            return Err(AccessError::NotFound(id.to_string()));
        }
        self.mirror.remove_user(id);
        info!(user = %id, "User unbanned");
        Ok(())
    }

    /// Ban a channel. Same contract as [`ban_user`](Self::ban_user), minus
    /// owner protection (channels have no owner identity).
    pub async fn ban_channel(&self, id: &str, reason: &str) -> AccessResult<bool> {
        let record = BanRecord {
            subject_id: id.to_string(),
            reason: reason.to_string(),
            banned_at: chrono::Utc::now().timestamp(),
        };
        let existed = self
            .store
            .upsert(BANNED_CHANNELS, &Filter::all().eq("subject_id", id), encode(&record)?)
            .await?;
        self.mirror.insert_channel(
            record.subject_id,
            BanEntry {
                reason: record.reason,
                banned_at: record.banned_at,
            },
        );
        info!(channel = %id, already_banned = existed, "Channel banned");
        Ok(existed)
    }

    /// Lift a channel ban. Fails with [`AccessError::NotFound`] if absent.
    pub async fn unban_channel(&self, id: &str) -> AccessResult<()> {
        let removed = self
            .store
            .delete(BANNED_CHANNELS, &Filter::all().eq("subject_id", id))
            .await?;
        if removed == 0 {
            return Err(AccessError::NotFound(id.to_string()));
        }
        self.mirror.remove_channel(id);
        info!(channel = %id, "Channel unbanned");
        Ok(())
    }

    // ========== Grant operations ==========

    /// Grant permanent access. Idempotent: an existing grant is left
    /// untouched, preserving its original `granted_at`.
    pub async fn authorize(&self, id: &str, granted_by: &str) -> AccessResult<()> {
        let by_user = Filter::all().eq("user_id", id);
        if self.store.find_one(GRANTS, &by_user).await?.is_some() {
            debug!(user = %id, "Grant already present");
            return Ok(());
        }
        let grant = AuthorizationGrant {
            user_id: id.to_string(),
            granted_by: granted_by.to_string(),
            granted_at: chrono::Utc::now().timestamp(),
        };
        self.store.upsert(GRANTS, &by_user, encode(&grant)?).await?;
        info!(user = %id, granted_by = %granted_by, "User authorized");
        Ok(())
    }

    /// Revoke a grant. Fails with [`AccessError::NotFound`] if absent.
    pub async fn deauthorize(&self, id: &str) -> AccessResult<()> {
        let removed = self
            .store
            .delete(GRANTS, &Filter::all().eq("user_id", id))
            .await?;
        if removed == 0 {
            return Err(AccessError::NotFound(id.to_string()));
        }
        info!(user = %id, "User deauthorized");
        Ok(())
    }

    /// Whether `id` holds a grant, read straight from the store.
    ///
    /// Used by the token path as a defensive double-check against mirror
    /// staleness.
    pub async fn is_authorized(&self, id: &str) -> AccessResult<bool> {
        Ok(self
            .store
            .find_one(GRANTS, &Filter::all().eq("user_id", id))
            .await?
            .is_some())
    }

    /// All grants, ordered by `granted_at` ascending.
    pub async fn list_authorized(&self) -> AccessResult<Vec<AuthorizationGrant>> {
        let mut grants = self
            .store
            .find_all(GRANTS, &Filter::all())
            .await?
            .into_iter()
            .map(decode::<AuthorizationGrant>)
            .collect::<Result<Vec<_>, _>>()?;
        grants.sort_by_key(|grant| grant.granted_at);
        Ok(grants)
    }

    // ========== User population ==========

    /// Record a caller as known. Returns whether this is first contact.
    pub async fn register_user(&self, id: &str) -> AccessResult<bool> {
        let record = UserRecord {
            user_id: id.to_string(),
            registered_at: chrono::Utc::now().timestamp(),
        };
        let existed = self
            .store
            .upsert(USERS, &Filter::all().eq("user_id", id), encode(&record)?)
            .await?;
        Ok(!existed)
    }

    /// Every known user id, in registration order.
    pub async fn all_user_ids(&self) -> AccessResult<Vec<String>> {
        Ok(self
            .store
            .find_all(USERS, &Filter::all())
            .await?
            .into_iter()
            .map(decode::<UserRecord>)
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(|record| record.user_id)
            .collect())
    }

    /// Drop a user from the population (blocked/deactivated recipients).
    /// Returns whether a record was removed.
    pub async fn remove_user(&self, id: &str) -> AccessResult<bool> {
        let removed = self
            .store
            .delete(USERS, &Filter::all().eq("user_id", id))
            .await?;
        Ok(removed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn registry() -> AuthorizationRegistry {
        AuthorizationRegistry::new(Arc::new(MemoryStore::new()), "owner".into())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn owner_can_never_be_banned() {
        let registry = registry().await;
        let err = registry.ban_user("owner", "should fail").await.unwrap_err();
        assert!(matches!(err, AccessError::OwnerProtected));
        assert!(!registry.is_banned_user("owner"));
    }

    #[tokio::test]
    async fn ban_reports_prior_record() {
        let registry = registry().await;
        assert!(!registry.ban_user("u1", "spam").await.unwrap());
        assert!(registry.ban_user("u1", "spam again").await.unwrap());
        assert!(registry.is_banned_user("u1"));
        assert_eq!(registry.user_ban("u1").unwrap().reason, "spam again");
    }

    #[tokio::test]
    async fn unban_missing_user_is_not_found() {
        let registry = registry().await;
        let err = registry.unban_user("ghost").await.unwrap_err();
        assert!(matches!(err, AccessError::NotFound(_)));
    }

    #[tokio::test]
    async fn channel_bans_are_separate_from_user_bans() {
        let registry = registry().await;
        registry.ban_channel("c1", "piracy").await.unwrap();
        assert!(registry.is_banned_channel("c1"));
        assert!(!registry.is_banned_user("c1"));

        registry.unban_channel("c1").await.unwrap();
        assert!(!registry.is_banned_channel("c1"));
    }

    #[tokio::test]
    async fn authorize_is_idempotent() {
        let registry = registry().await;
        registry.authorize("u1", "owner").await.unwrap();
        let first = registry.list_authorized().await.unwrap();
        registry.authorize("u1", "someone-else").await.unwrap();
        let second = registry.list_authorized().await.unwrap();

        assert_eq!(second.len(), 1);
        assert_eq!(second[0].granted_by, first[0].granted_by);
        assert_eq!(second[0].granted_at, first[0].granted_at);
    }

    #[tokio::test]
    async fn deauthorize_missing_grant_is_not_found() {
        let registry = registry().await;
        let err = registry.deauthorize("ghost").await.unwrap_err();
        assert!(matches!(err, AccessError::NotFound(_)));
    }

    #[tokio::test]
    async fn mirror_reloads_from_store() {
        let store = Arc::new(MemoryStore::new());
        {
            let registry = AuthorizationRegistry::new(store.clone(), "owner".into())
                .await
                .unwrap();
            registry.ban_user("u1", "spam").await.unwrap();
        }
        let registry = AuthorizationRegistry::new(store, "owner".into())
            .await
            .unwrap();
        assert!(registry.is_banned_user("u1"));
    }

    #[tokio::test]
    async fn user_population_round_trip() {
        let registry = registry().await;
        assert!(registry.register_user("u1").await.unwrap());
        assert!(!registry.register_user("u1").await.unwrap());
        registry.register_user("u2").await.unwrap();

        assert_eq!(registry.all_user_ids().await.unwrap(), vec!["u1", "u2"]);
        assert!(registry.remove_user("u1").await.unwrap());
        assert!(!registry.remove_user("u1").await.unwrap());
        assert_eq!(registry.all_user_ids().await.unwrap(), vec!["u2"]);
    }
}

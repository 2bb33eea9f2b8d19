//! Time-limited access tokens: issue, validate, activate, expire.
//!
//! A token is minted unactivated by a privileged command, handed to the
//! caller out of band, and activated by an external event. Validation
//! short-circuits through the cheap bypasses first (system disabled, owner,
//! permanent grant) before touching the token collection.
//!
//! Invariant: at most one unactivated, unexpired token exists per caller.
//! Repeat generate requests return the existing value instead of minting a
//! duplicate.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::TokenConfig;
use crate::error::{AccessError, AccessResult};
use crate::registry::AuthorizationRegistry;
use crate::retry::RetryPolicy;
use crate::store::{Filter, Store, decode, encode};

const TOKENS: &str = "tokens";

/// Number of random bytes behind a token value (43 chars once encoded).
const TOKEN_BYTES: usize = 32;

/// A time-limited access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    /// Opaque unique value, URL-safe base64.
    pub value: String,
    pub user_id: String,
    /// Unix timestamp of creation.
    pub created_at: i64,
    /// Unix timestamp after which the token no longer validates.
    pub expires_at: i64,
    /// Set once by the external activation event.
    pub activated: bool,
}

impl Token {
    /// Whether the token is past its expiry at `now`.
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// Manager for the token lifecycle.
pub struct TokenManager {
    store: Arc<dyn Store>,
    registry: Arc<AuthorizationRegistry>,
    config: TokenConfig,
    retry: RetryPolicy,
    /// Per-caller critical sections so concurrent generate calls for the
    /// same caller cannot mint two unactivated tokens.
    mint_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl TokenManager {
    /// Create a token manager over the shared store and registry.
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<AuthorizationRegistry>,
        config: TokenConfig,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            registry,
            config,
            retry,
            mint_locks: DashMap::new(),
        }
    }

    /// Validate a caller. Evaluation order, cheapest first:
    /// 1. token system disabled
    /// 2. caller is the owner
    /// 3. caller holds a permanent grant (store read, guards against mirror
    ///    staleness)
    /// 4. caller holds an activated, unexpired token
    ///
    /// A negative result is `Ok(false)`; only store faults propagate.
    pub async fn check(&self, caller_id: &str) -> AccessResult<bool> {
        if !self.config.enabled {
            debug!(caller = %caller_id, "Token system disabled, access granted");
            return Ok(true);
        }
        if self.registry.is_owner(caller_id) {
            return Ok(true);
        }
        if self.registry.is_authorized(caller_id).await? {
            debug!(caller = %caller_id, "Permanent grant, access granted");
            return Ok(true);
        }

        let granted = self.has_active_token(caller_id).await?;
        debug!(caller = %caller_id, granted, "Token validation");
        Ok(granted)
    }

    /// Whether the caller holds an activated, unexpired token. Unlike
    /// [`check`](Self::check), this ignores the disabled flag and the
    /// owner/grant bypasses.
    pub async fn has_active_token(&self, caller_id: &str) -> AccessResult<bool> {
        let now = chrono::Utc::now().timestamp();
        let active = Filter::all()
            .eq("user_id", caller_id)
            .eq("activated", true)
            .gt("expires_at", now);
        Ok(self.store.find_one(TOKENS, &active).await?.is_some())
    }

    /// Admission pre-screen alias for [`check`](Self::check).
    pub async fn allowed(&self, caller_id: &str) -> AccessResult<bool> {
        self.check(caller_id).await
    }

    /// Mint (or re-issue) a token for a caller. Privileged: the command
    /// layer enforces that only the owner/admin reaches this.
    ///
    /// Idempotent while an unactivated, unexpired token exists for the
    /// caller: that token's value is returned unchanged. Persistence of a
    /// fresh token retries transient store faults with backoff and jitter;
    /// other faults propagate immediately.
    pub async fn manual_generate(&self, caller_id: &str) -> AccessResult<String> {
        let lock = self
            .mint_locks
            .entry(caller_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let _minting = lock.lock().await;

        let now = chrono::Utc::now().timestamp();
        let pending = Filter::all()
            .eq("user_id", caller_id)
            .eq("activated", false)
            .gt("expires_at", now);

        if let Some(doc) = self.store.find_one(TOKENS, &pending).await? {
            let existing: Token = decode(doc)?;
            debug!(caller = %caller_id, token = %masked(&existing.value), "Reusing unactivated token");
            return Ok(existing.value);
        }

        let token = Token {
            value: mint_value(),
            user_id: caller_id.to_string(),
            created_at: now,
            expires_at: now + self.config.ttl().num_seconds(),
            activated: false,
        };
        let doc = encode(&token)?;

        // Keyed on the caller's unactivated slot, so a concurrent writer
        // can never leave two pending tokens behind.
        let slot = Filter::all().eq("user_id", caller_id).eq("activated", false);
        self.retry
            .run("persist_token", || {
                let doc = doc.clone();
                let slot = slot.clone();
                async move { self.store.upsert(TOKENS, &slot, doc).await }
            })
            .await?;

        info!(caller = %caller_id, token = %masked(&token.value), "Token generated");
        Ok(token.value)
    }

    /// Flip a token to activated. Fails with [`AccessError::NotFound`] for
    /// unknown or expired values. Returns the remaining validity.
    pub async fn activate(&self, value: &str) -> AccessResult<chrono::Duration> {
        let by_value = Filter::all().eq("value", value);
        let Some(doc) = self.store.find_one(TOKENS, &by_value).await? else {
            return Err(AccessError::NotFound(masked(value)));
        };
        let mut token: Token = decode(doc)?;

        let now = chrono::Utc::now().timestamp();
        if token.is_expired(now) {
            return Err(AccessError::NotFound(masked(value)));
        }

        let remaining = chrono::Duration::seconds(token.expires_at - now);
        if !token.activated {
            token.activated = true;
            self.store.upsert(TOKENS, &by_value, encode(&token)?).await?;
            info!(caller = %token.user_id, token = %masked(value), "Token activated");
        }
        Ok(remaining)
    }

    /// Every token record, including expired ones awaiting the sweep.
    pub async fn list_tokens(&self) -> AccessResult<Vec<Token>> {
        Ok(self
            .store
            .find_all(TOKENS, &Filter::all())
            .await?
            .into_iter()
            .map(decode::<Token>)
            .collect::<Result<Vec<_>, _>>()?)
    }

    /// Maintenance sweep: delete every token past its expiry, regardless of
    /// activation state. Safe to run concurrently with validation and
    /// generation. Returns the count removed.
    pub async fn cleanup_expired_tokens(&self) -> AccessResult<u64> {
        let now = chrono::Utc::now().timestamp();
        let removed = self
            .store
            .delete(TOKENS, &Filter::all().lt("expires_at", now + 1))
            .await?;
        if removed > 0 {
            info!(count = removed, "Swept expired tokens");
        }
        Ok(removed)
    }
}

/// Mint a fresh token value from a cryptographically strong source.
fn mint_value() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill(&mut bytes[..]);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Mask a token value for logging: first and last four characters only.
/// Counts characters, not bytes: the value may be caller-supplied (an
/// activation attempt) and need not be ASCII.
fn masked(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 8 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreFault;
    use crate::store::{Document, MemoryStore};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    async fn harness() -> (Arc<MemoryStore>, Arc<AuthorizationRegistry>, TokenManager) {
        harness_with_config(TokenConfig::default()).await
    }

    async fn harness_with_config(
        config: TokenConfig,
    ) -> (Arc<MemoryStore>, Arc<AuthorizationRegistry>, TokenManager) {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(
            AuthorizationRegistry::new(store.clone(), "owner".into())
                .await
                .unwrap(),
        );
        let manager = TokenManager::new(
            store.clone(),
            registry.clone(),
            config,
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_jitter: Duration::ZERO,
            },
        );
        (store, registry, manager)
    }

    async fn insert_token(store: &MemoryStore, token: &Token) {
        store
            .upsert(TOKENS, &Filter::all().eq("value", token.value.clone()), encode(token).unwrap())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn disabled_system_grants_everyone() {
        let (_, _, manager) = harness_with_config(TokenConfig {
            enabled: false,
            ttl_hours: 24,
        })
        .await;
        assert!(manager.check("anyone").await.unwrap());
    }

    #[tokio::test]
    async fn owner_and_grants_bypass_tokens() {
        let (_, registry, manager) = harness().await;
        assert!(manager.check("owner").await.unwrap());

        assert!(!manager.check("u1").await.unwrap());
        registry.authorize("u1", "owner").await.unwrap();
        assert!(manager.check("u1").await.unwrap());
    }

    #[tokio::test]
    async fn check_requires_activated_unexpired_token() {
        let (store, _, manager) = harness().await;
        let now = chrono::Utc::now().timestamp();

        // Unactivated: no access.
        let value = manager.manual_generate("u1").await.unwrap();
        assert!(!manager.check("u1").await.unwrap());

        // Activated: access.
        manager.activate(&value).await.unwrap();
        assert!(manager.check("u1").await.unwrap());

        // Activated but expired: no access.
        insert_token(
            &store,
            &Token {
                value: "expired-token-value".into(),
                user_id: "u2".into(),
                created_at: now - 7200,
                expires_at: now - 3600,
                activated: true,
            },
        )
        .await;
        assert!(!manager.check("u2").await.unwrap());
    }

    #[tokio::test]
    async fn manual_generate_is_idempotent_until_activation() {
        let (_, _, manager) = harness().await;
        let first = manager.manual_generate("u1").await.unwrap();
        let second = manager.manual_generate("u1").await.unwrap();
        assert_eq!(first, second);

        // Activation consumes the pending slot; the next generate mints a
        // fresh value.
        manager.activate(&first).await.unwrap();
        let third = manager.manual_generate("u1").await.unwrap();
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn token_values_are_unique_and_url_safe() {
        let (_, _, manager) = harness().await;
        let a = manager.manual_generate("u1").await.unwrap();
        let b = manager.manual_generate("u2").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));

        let tokens = manager.list_tokens().await.unwrap();
        assert_eq!(tokens.len(), 2);
    }

    #[tokio::test]
    async fn activating_unknown_or_expired_token_fails() {
        let (store, _, manager) = harness().await;
        assert!(matches!(
            manager.activate("nope").await,
            Err(AccessError::NotFound(_))
        ));

        let now = chrono::Utc::now().timestamp();
        insert_token(
            &store,
            &Token {
                value: "stale-token-value".into(),
                user_id: "u1".into(),
                created_at: now - 7200,
                expires_at: now - 3600,
                activated: false,
            },
        )
        .await;
        assert!(matches!(
            manager.activate("stale-token-value").await,
            Err(AccessError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn sweep_deletes_expired_once() {
        let (store, _, manager) = harness().await;
        let now = chrono::Utc::now().timestamp();
        for (value, expires_at, activated) in [
            ("gone-activated-1", now - 10, true),
            ("gone-pending-22", now - 10, false),
            ("alive-token-333", now + 3600, true),
        ] {
            insert_token(
                &store,
                &Token {
                    value: value.into(),
                    user_id: "u1".into(),
                    created_at: now - 100,
                    expires_at,
                    activated,
                },
            )
            .await;
        }

        assert_eq!(manager.cleanup_expired_tokens().await.unwrap(), 2);
        assert_eq!(manager.cleanup_expired_tokens().await.unwrap(), 0);
        assert_eq!(manager.list_tokens().await.unwrap().len(), 1);
    }

    // ========== Retry behavior ==========

    /// Store wrapper that fails the first N upserts.
    struct FlakyStore {
        inner: MemoryStore,
        failures_left: AtomicU32,
        fault: StoreFault,
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn find_one(
            &self,
            collection: &str,
            filter: &Filter,
        ) -> Result<Option<Document>, StoreFault> {
            self.inner.find_one(collection, filter).await
        }

        async fn find_all(
            &self,
            collection: &str,
            filter: &Filter,
        ) -> Result<Vec<Document>, StoreFault> {
            self.inner.find_all(collection, filter).await
        }

        async fn upsert(
            &self,
            collection: &str,
            filter: &Filter,
            document: Document,
        ) -> Result<bool, StoreFault> {
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(self.fault.clone());
            }
            self.inner.upsert(collection, filter, document).await
        }

        async fn delete(&self, collection: &str, filter: &Filter) -> Result<u64, StoreFault> {
            self.inner.delete(collection, filter).await
        }
    }

    async fn flaky_manager(failures: u32, fault: StoreFault) -> TokenManager {
        let store = Arc::new(FlakyStore {
            inner: MemoryStore::new(),
            failures_left: AtomicU32::new(failures),
            fault,
        });
        let registry = Arc::new(
            AuthorizationRegistry::new(store.clone(), "owner".into())
                .await
                .unwrap(),
        );
        TokenManager::new(
            store,
            registry,
            TokenConfig::default(),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_jitter: Duration::ZERO,
            },
        )
    }

    #[tokio::test]
    async fn transient_persistence_faults_are_retried() {
        let manager = flaky_manager(2, StoreFault::Transient("busy".into())).await;
        let value = manager.manual_generate("u1").await.unwrap();
        // Persisted despite the two failures: the same value comes back.
        assert_eq!(manager.manual_generate("u1").await.unwrap(), value);
    }

    #[tokio::test]
    async fn upstream_protocol_faults_propagate_immediately() {
        let manager = flaky_manager(u32::MAX, StoreFault::UpstreamProtocol("bad frame".into())).await;
        let err = manager.manual_generate("u1").await.unwrap_err();
        assert_eq!(err.error_code(), "upstream_protocol_fault");
    }

    #[tokio::test]
    async fn activating_a_non_ascii_value_is_not_found() {
        // Activation takes arbitrary caller input; a value with multi-byte
        // characters must come back as NotFound, not panic in masking.
        let (_, _, manager) = harness().await;
        assert!(matches!(
            manager.activate("aaaé-definitely-long").await,
            Err(AccessError::NotFound(_))
        ));
    }

    #[test]
    fn masking_hides_the_middle() {
        assert_eq!(masked("abcdefghijklmnop"), "abcd...mnop");
        assert_eq!(masked("short"), "****");
        assert_eq!(masked("éééémiddleéééé"), "éééé...éééé");
        assert_eq!(masked("ééééèèèè"), "****");
    }
}

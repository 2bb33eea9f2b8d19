//! Integration test common infrastructure.
//!
//! Wires the full component graph over an in-memory store, the same way an
//! embedding command layer would.

use std::sync::{Arc, Once};

use tracing_subscriber::EnvFilter;
use turnstile::config::{AdmissionConfig, TokenConfig};
use turnstile::{
    AccessAuthority, AdmissionQueue, AuthorizationRegistry, MemoryStore, RetryPolicy, TokenManager,
};

pub const OWNER: &str = "owner";

static TRACING: Once = Once::new();

/// Route component logs through the test writer; `RUST_LOG` controls what
/// shows up on failure output.
fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    });
}

#[allow(dead_code)]
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub registry: Arc<AuthorizationRegistry>,
    pub tokens: Arc<TokenManager>,
    pub authority: AccessAuthority,
    pub queue: AdmissionQueue,
}

#[allow(dead_code)]
pub async fn harness() -> Harness {
    harness_with(TokenConfig::default(), AdmissionConfig::default()).await
}

#[allow(dead_code)]
pub async fn harness_with(tokens: TokenConfig, admission: AdmissionConfig) -> Harness {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(
        AuthorizationRegistry::new(store.clone(), OWNER.to_string())
            .await
            .expect("registry over an empty store"),
    );
    let manager = Arc::new(TokenManager::new(
        store.clone(),
        registry.clone(),
        tokens,
        RetryPolicy::default(),
    ));
    let authority = AccessAuthority::new(registry.clone(), manager.clone());
    let queue = AdmissionQueue::new(admission);

    Harness {
        store,
        registry,
        tokens: manager,
        authority,
        queue,
    }
}

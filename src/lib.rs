//! turnstile - access control and admission core
//!
//! Grants or denies access to a shared processing capability using a mix
//! of permanent authorization grants, time-limited tokens, and a ban list;
//! arbitrates scarce capacity through a tiered, rate-limited admission
//! queue; and fans owner-initiated broadcasts out to the known user
//! population with mid-flight cancellation.
//!
//! The transport layer (commands, wire protocol, rendering) lives outside
//! this crate. Embedders wire up a [`store::Store`], construct the
//! registry/token/queue/broadcast components, and drive them from their
//! own command surface.

pub mod admission;
pub mod authority;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod registry;
pub mod retry;
pub mod store;
pub mod tokens;

pub use admission::{AdmissionOutcome, AdmissionQueue, QueueItem, RejectReason, Tier};
pub use authority::{AccessAuthority, ScreenVerdict};
pub use broadcast::{BroadcastJob, BroadcastOrchestrator, Deliverer, DeliveryResult};
pub use config::Config;
pub use error::{AccessError, AccessResult, StoreFault};
pub use registry::AuthorizationRegistry;
pub use retry::RetryPolicy;
pub use store::{Filter, MemoryStore, SqliteStore, Store};
pub use tokens::{Token, TokenManager};

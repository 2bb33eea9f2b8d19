//! Persistent document store boundary.
//!
//! The core consumes a narrow read/write contract: point lookups, filtered
//! lookups, upsert, and delete-by-filter, each atomic per document. No
//! multi-document transactions are ever assumed.
//!
//! Two implementations ship:
//! - [`MemoryStore`]: in-process maps, for tests and non-durable embedders
//! - [`SqliteStore`]: SQLite-backed documents via SQLx

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreFault;

/// A stored document. Consumers serialize their record types through serde.
pub type Document = Value;

/// A single field condition within a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    /// Field equals the value.
    Eq(Value),
    /// Field is strictly greater than the value (numbers and strings).
    Gt(Value),
    /// Field is strictly less than the value (numbers and strings).
    Lt(Value),
}

/// Conjunction of field conditions. An empty filter matches everything.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    conds: Vec<(String, Cond)>,
}

impl Filter {
    /// Create an empty filter (matches all documents in a collection).
    pub fn all() -> Self {
        Self::default()
    }

    /// Require `field == value`.
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conds.push((field.to_string(), Cond::Eq(value.into())));
        self
    }

    /// Require `field > value`.
    pub fn gt(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conds.push((field.to_string(), Cond::Gt(value.into())));
        self
    }

    /// Require `field < value`.
    pub fn lt(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conds.push((field.to_string(), Cond::Lt(value.into())));
        self
    }

    /// Evaluate the filter against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        self.conds.iter().all(|(field, cond)| {
            let Some(actual) = doc.get(field) else {
                return false;
            };
            match cond {
                Cond::Eq(expected) => actual == expected,
                Cond::Gt(bound) => compare(actual, bound) == Some(std::cmp::Ordering::Greater),
                Cond::Lt(bound) => compare(actual, bound) == Some(std::cmp::Ordering::Less),
            }
        })
    }
}

/// Order two JSON scalars of the same kind. Mixed or non-scalar kinds do
/// not compare.
fn compare(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                Some(x.cmp(&y))
            } else {
                x.as_f64().partial_cmp(&y.as_f64())
            }
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Serialize a record into a document.
pub(crate) fn encode<T: serde::Serialize>(record: &T) -> Result<Document, StoreFault> {
    serde_json::to_value(record).map_err(|e| StoreFault::Fatal(format!("unencodable record: {e}")))
}

/// Deserialize a record out of a document.
pub(crate) fn decode<T: serde::de::DeserializeOwned>(doc: Document) -> Result<T, StoreFault> {
    serde_json::from_value(doc).map_err(|e| StoreFault::Fatal(format!("undecodable record: {e}")))
}

/// The store contract consumed by the core.
///
/// All operations must be atomic with respect to a single document;
/// concurrent callers may interleave freely between documents.
#[async_trait]
pub trait Store: Send + Sync {
    /// Find the first document matching the filter.
    async fn find_one(&self, collection: &str, filter: &Filter)
    -> Result<Option<Document>, StoreFault>;

    /// Find every document matching the filter, in insertion order.
    async fn find_all(&self, collection: &str, filter: &Filter)
    -> Result<Vec<Document>, StoreFault>;

    /// Replace the documents matching the filter with `document`, inserting
    /// it if nothing matched. Returns whether a prior document existed.
    async fn upsert(
        &self,
        collection: &str,
        filter: &Filter,
        document: Document,
    ) -> Result<bool, StoreFault>;

    /// Delete every document matching the filter, returning the count.
    async fn delete(&self, collection: &str, filter: &Filter) -> Result<u64, StoreFault>;
}

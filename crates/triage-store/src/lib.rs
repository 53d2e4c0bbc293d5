//! Document store boundary for triage persistence
//!
//! The pipeline only needs upsert-by-id, get-by-id (with not-found distinct
//! from other failures), filtered/sorted search and counting. Real backends
//! live behind the [`DocumentStore`] trait; [`MemoryStore`] is the in-process
//! implementation used by tests and the default runtime.

pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use triage_core::Result;

pub use memory::MemoryStore;

/// Filter/sort/limit query for a collection search
#[derive(Debug, Clone, Default)]
pub struct StoreQuery {
    /// Equality filter: every (key, value) pair must match the document
    pub filter: Option<Value>,
    /// Field to sort by
    pub sort_by: Option<String>,
    /// Sort direction, descending when true
    pub descending: bool,
    /// Page size; 0 means no limit
    pub limit: usize,
}

impl StoreQuery {
    pub fn with_filter(mut self, filter: Value) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn sorted_desc(mut self, field: impl Into<String>) -> Self {
        self.sort_by = Some(field.into());
        self.descending = true;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

/// Boundary trait for the document store collaborator
///
/// All writes are idempotent upserts, so concurrent partial-failure retries
/// cannot corrupt state: a later write for the same key overwrites an
/// earlier one.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace a document by id
    async fn upsert(&self, collection: &str, id: &str, doc: Value) -> Result<()>;

    /// Fetch a document; fails with `TriageError::NotFound` when absent
    async fn get(&self, collection: &str, id: &str) -> Result<Value>;

    /// Return a page of documents matching the query
    async fn search(&self, collection: &str, query: StoreQuery) -> Result<Vec<Value>>;

    /// Count documents matching the optional equality filter
    async fn count(&self, collection: &str, filter: Option<Value>) -> Result<usize>;
}

/// Whether a document satisfies an equality filter
pub(crate) fn matches_filter(doc: &Value, filter: &Value) -> bool {
    match filter.as_object() {
        Some(map) => map.iter().all(|(k, v)| doc.get(k) == Some(v)),
        None => true,
    }
}

//! In-memory document store
//!
//! Interior mutability behind a tokio `RwLock`; safe for concurrent ticket
//! runs since the orchestrator only ever upserts whole documents.

use crate::{matches_filter, DocumentStore, StoreQuery};
use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use triage_core::{Result, TriageError};

/// In-memory implementation of [`DocumentStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(&self, collection: &str, id: &str, doc: Value) -> Result<()> {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Value> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
            .ok_or_else(|| TriageError::NotFound(format!("{}/{}", collection, id)))
    }

    async fn search(&self, collection: &str, query: StoreQuery) -> Result<Vec<Value>> {
        let collections = self.collections.read().await;
        let mut results: Vec<Value> = collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| {
                        query
                            .filter
                            .as_ref()
                            .map(|f| matches_filter(doc, f))
                            .unwrap_or(true)
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        if let Some(field) = &query.sort_by {
            results.sort_by(|a, b| {
                let ordering = compare_fields(a.get(field), b.get(field));
                if query.descending {
                    ordering.reverse()
                } else {
                    ordering
                }
            });
        }

        if query.limit > 0 && results.len() > query.limit {
            results.truncate(query.limit);
        }

        Ok(results)
    }

    async fn count(&self, collection: &str, filter: Option<Value>) -> Result<usize> {
        let collections = self.collections.read().await;
        let count = collections
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| filter.as_ref().map(|f| matches_filter(doc, f)).unwrap_or(true))
                    .count()
            })
            .unwrap_or(0);
        Ok(count)
    }
}

/// Order two field values: numbers numerically, strings lexically,
/// missing fields last.
fn compare_fields(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
            _ => match (a.as_str(), b.as_str()) {
                (Some(x), Some(y)) => x.cmp(y),
                _ => a.to_string().cmp(&b.to_string()),
            },
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

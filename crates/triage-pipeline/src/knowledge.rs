//! Learned-resolution feedback loop
//!
//! High-quality completed resolutions are written back to the knowledge
//! collection so future context gathering can retrieve them. Writes are
//! gated on quality and deduplicated against recent entries for the same
//! category and action.

use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use triage_core::{Result, Ticket};
use triage_store::{DocumentStore, StoreQuery};
use uuid::Uuid;

pub const KNOWLEDGE_COLLECTION: &str = "knowledge";

/// Writes qualifying resolutions into the knowledge collection
pub struct KnowledgeWriter {
    store: Arc<dyn DocumentStore>,
    quality_threshold: f64,
    dedup_hours: i64,
}

impl KnowledgeWriter {
    pub fn new(store: Arc<dyn DocumentStore>, quality_threshold: f64, dedup_hours: i64) -> Self {
        Self {
            store,
            quality_threshold,
            dedup_hours,
        }
    }

    /// Record a resolution if it clears the quality bar and is not a recent
    /// duplicate. Returns whether a write happened.
    pub async fn maybe_record(
        &self,
        ticket: &Ticket,
        action: &str,
        quality: f64,
        resolution: &str,
    ) -> Result<bool> {
        if quality < self.quality_threshold {
            return Ok(false);
        }

        let category = ticket.category.as_str();

        // A same-category same-action entry inside the window is a duplicate
        let recent = self
            .store
            .search(
                KNOWLEDGE_COLLECTION,
                StoreQuery::default()
                    .with_filter(json!({"category": category, "action": action}))
                    .sorted_desc("recorded_at")
                    .with_limit(5),
            )
            .await?;

        let cutoff = Utc::now() - Duration::hours(self.dedup_hours);
        let duplicate = recent.iter().any(|doc| {
            doc.get("recorded_at")
                .and_then(|v| v.as_str())
                .and_then(|s| s.parse::<chrono::DateTime<Utc>>().ok())
                .is_some_and(|recorded| recorded > cutoff)
        });
        if duplicate {
            return Ok(false);
        }

        let id = Uuid::new_v4().to_string();
        let entry = json!({
            "id": id,
            "ticket_id": ticket.id,
            "category": category,
            "action": action,
            "resolution": resolution,
            "quality": quality,
            "recorded_at": Utc::now().to_rfc3339(),
        });
        self.store.upsert(KNOWLEDGE_COLLECTION, &id, entry).await?;

        info!(ticket_id = %ticket.id, category, action, quality, "knowledge entry recorded");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use triage_core::TicketRequest;
    use triage_store::MemoryStore;

    fn ticket(category: &str) -> Ticket {
        Ticket::from_request(TicketRequest {
            customer_id: "cust-1".to_string(),
            order_id: None,
            subject: "Broken mug".to_string(),
            description: "Arrived shattered".to_string(),
            category: Some(category.to_string()),
            priority: Default::default(),
        })
    }

    fn writer(store: Arc<MemoryStore>) -> KnowledgeWriter {
        KnowledgeWriter::new(store, 0.8, 24)
    }

    #[tokio::test]
    async fn test_low_quality_never_recorded() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(store.clone());

        let wrote = writer
            .maybe_record(&ticket("damaged"), "refund", 0.79, "refunded in full")
            .await
            .unwrap();

        assert!(!wrote);
        assert_eq!(store.count(KNOWLEDGE_COLLECTION, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let store = Arc::new(MemoryStore::new());
        let wrote = writer(store)
            .maybe_record(&ticket("damaged"), "refund", 0.8, "refunded in full")
            .await
            .unwrap();

        assert!(wrote);
    }

    #[tokio::test]
    async fn test_recent_duplicate_suppressed() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(store.clone());

        let first = writer
            .maybe_record(&ticket("damaged"), "refund", 0.9, "refunded in full")
            .await
            .unwrap();
        let second = writer
            .maybe_record(&ticket("damaged"), "refund", 0.95, "also refunded")
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(store.count(KNOWLEDGE_COLLECTION, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_different_action_is_not_a_duplicate() {
        let store = Arc::new(MemoryStore::new());
        let writer = writer(store.clone());

        writer
            .maybe_record(&ticket("damaged"), "refund", 0.9, "refunded")
            .await
            .unwrap();
        let wrote = writer
            .maybe_record(&ticket("damaged"), "replace", 0.9, "replaced")
            .await
            .unwrap();

        assert!(wrote);
        assert_eq!(store.count(KNOWLEDGE_COLLECTION, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stale_entry_does_not_suppress() {
        let store = Arc::new(MemoryStore::new());

        // Pre-seed an entry older than the window
        let old = (Utc::now() - Duration::hours(30)).to_rfc3339();
        store
            .upsert(
                KNOWLEDGE_COLLECTION,
                "old-entry",
                json!({
                    "id": "old-entry",
                    "category": "damaged",
                    "action": "refund",
                    "recorded_at": old,
                }),
            )
            .await
            .unwrap();

        let wrote = writer(store.clone())
            .maybe_record(&ticket("damaged"), "refund", 0.9, "refunded")
            .await
            .unwrap();

        assert!(wrote);
        assert_eq!(store.count(KNOWLEDGE_COLLECTION, None).await.unwrap(), 2);
    }
}

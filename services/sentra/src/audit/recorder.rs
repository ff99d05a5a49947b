//! Bounded queue and background persistence for audit entries.

use super::models::{AuditCategory, AuditEvent};
use crate::clock::Clock;
use crate::config::AuditConfig;
use crate::store::{GraphStore, NewNode, schema};
use chrono::Months;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, warn};

const MAX_WRITE_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);

enum WorkerMessage {
    Record(AuditEvent),
    Flush(oneshot::Sender<()>),
}

/// Handle used by the engines to emit audit events.
///
/// Cloneable; the background worker exits once every clone is dropped and the
/// queue has drained.
#[derive(Clone)]
pub struct AuditRecorder {
    tx: mpsc::Sender<WorkerMessage>,
    clock: Arc<dyn Clock>,
    dropped: Arc<AtomicU64>,
}

impl AuditRecorder {
    /// Start the persistence worker and return the emission handle.
    pub fn spawn(
        store: Arc<dyn GraphStore>,
        clock: Arc<dyn Clock>,
        config: AuditConfig,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(config.queue_capacity());
        let dropped = Arc::new(AtomicU64::new(0));
        let worker = Worker {
            rx,
            store,
            config,
            dropped: Arc::clone(&dropped),
        };
        let handle = tokio::spawn(worker.run());
        (
            Self {
                tx,
                clock,
                dropped,
            },
            handle,
        )
    }

    /// Queue an event. Never blocks and never fails the caller; a full queue
    /// drops the entry and bumps the dropped counter.
    pub fn emit(&self, mut event: AuditEvent) {
        event.timestamp = self.clock.now();
        if self.tx.try_send(WorkerMessage::Record(event)).is_err() {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(dropped_total = total, "audit queue full, entry dropped");
        }
    }

    /// Wait until every previously queued entry has been attempted.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WorkerMessage::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Entries dropped because the queue was full or writes kept failing.
    #[must_use]
    pub fn dropped_entries(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

struct Worker {
    rx: mpsc::Receiver<WorkerMessage>,
    store: Arc<dyn GraphStore>,
    config: AuditConfig,
    dropped: Arc<AtomicU64>,
}

impl Worker {
    async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            match message {
                WorkerMessage::Record(event) => self.persist(event).await,
                WorkerMessage::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
    }

    async fn persist(&self, event: AuditEvent) {
        let node = self.to_node(&event);
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            match self.store.insert(node.clone()).await {
                Ok(_) => return,
                Err(err) if attempt < MAX_WRITE_ATTEMPTS => {
                    warn!(
                        action = %event.action,
                        attempt,
                        "audit write failed, retrying: {err}"
                    );
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                }
                Err(err) => {
                    let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                    error!(
                        action = %event.action,
                        dropped_total = total,
                        "audit write failed permanently: {err}"
                    );
                }
            }
        }
    }

    fn retention_years(&self, category: AuditCategory) -> u32 {
        match category {
            AuditCategory::Authentication => self.config.authentication_retention_years(),
            AuditCategory::PiiAccess => self.config.pii_access_retention_years(),
            AuditCategory::General => self.config.general_retention_years(),
        }
    }

    fn to_node(&self, event: &AuditEvent) -> NewNode {
        let retention_date = event
            .timestamp
            .checked_add_months(Months::new(12 * self.retention_years(event.category)))
            .unwrap_or(event.timestamp);
        NewNode::new(schema::AUDIT_ENTRY)
            .set("id", event.entry_id())
            .set("category", event.category.as_str())
            .set("action", event.action.clone())
            .set("objectType", event.object_type.clone())
            .set("objectId", event.object_id.clone())
            .set("performedBy", event.performed_by.clone())
            .set_datetime("timestamp", event.timestamp)
            .set("details", event.details.to_string())
            .set("severity", event.severity.as_str())
            .set("source", event.source.clone())
            .set_datetime("retentionDate", retention_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::store::memory::MemoryGraphStore;
    use crate::store::{NodeQuery, Predicate, StoreError};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::atomic::AtomicU32;

    fn event(action: &str) -> AuditEvent {
        let mut event = AuditEvent::new(
            AuditCategory::Authentication,
            action,
            "ChannelOTP",
            "0x1",
            "otp-engine",
        )
        .with_details(json!({"channel": "email"}));
        event.source = "otp-engine".to_string();
        event
    }

    #[tokio::test]
    async fn emits_and_persists_entries() -> Result<()> {
        let store = Arc::new(MemoryGraphStore::new());
        let (recorder, _handle) = AuditRecorder::spawn(
            Arc::clone(&store) as Arc<dyn GraphStore>,
            Arc::new(SystemClock),
            AuditConfig::default(),
        );

        recorder.emit(event("otp.generated"));
        recorder.flush().await;

        let rows = store
            .find(&NodeQuery::new(schema::AUDIT_ENTRY).eq("action", "otp.generated"))
            .await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["severity"], Value::String("INFO".to_string()));
        assert_eq!(rows[0]["category"], Value::String("AUTHENTICATION".to_string()));
        assert!(rows[0]["id"].as_str().unwrap_or("").starts_with("audit_"));
        assert_eq!(recorder.dropped_entries(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn retention_follows_category_policy() -> Result<()> {
        let store = Arc::new(MemoryGraphStore::new());
        let (recorder, _handle) = AuditRecorder::spawn(
            Arc::clone(&store) as Arc<dyn GraphStore>,
            Arc::new(SystemClock),
            AuditConfig::default().with_general_retention_years(1),
        );

        let mut general = event("catalog.read");
        general.category = AuditCategory::General;
        recorder.emit(general);
        recorder.flush().await;

        let rows = store.find(&NodeQuery::new(schema::AUDIT_ENTRY)).await?;
        assert_eq!(rows.len(), 1);
        let timestamp: chrono::DateTime<chrono::Utc> =
            serde_json::from_value(rows[0]["timestamp"].clone())?;
        let retention: chrono::DateTime<chrono::Utc> =
            serde_json::from_value(rows[0]["retentionDate"].clone())?;
        let years = (retention - timestamp).num_days() / 365;
        assert_eq!(years, 1);
        Ok(())
    }

    struct FlakyStore {
        inner: MemoryGraphStore,
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl GraphStore for FlakyStore {
        async fn find(&self, query: &NodeQuery) -> Result<Vec<Value>, StoreError> {
            self.inner.find(query).await
        }

        async fn insert(&self, node: crate::store::NewNode) -> Result<String, StoreError> {
            let left = self.failures_left.load(Ordering::Relaxed);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::Relaxed);
                return Err(StoreError::Unavailable("injected failure".to_string()));
            }
            self.inner.insert(node).await
        }

        async fn update(&self, uid: &str, set: Vec<Predicate>) -> Result<(), StoreError> {
            self.inner.update(uid, set).await
        }

        async fn update_if(
            &self,
            uid: &str,
            guard: &[Predicate],
            set: Vec<Predicate>,
        ) -> Result<bool, StoreError> {
            self.inner.update_if(uid, guard, set).await
        }

        async fn delete(&self, uid: &str) -> Result<bool, StoreError> {
            self.inner.delete(uid).await
        }
    }

    #[tokio::test]
    async fn retries_transient_write_failures() -> Result<()> {
        let store = Arc::new(FlakyStore {
            inner: MemoryGraphStore::new(),
            failures_left: AtomicU32::new(2),
        });
        let (recorder, _handle) = AuditRecorder::spawn(
            Arc::clone(&store) as Arc<dyn GraphStore>,
            Arc::new(SystemClock),
            AuditConfig::default(),
        );

        recorder.emit(event("otp.verified"));
        // The worker is sequential, so flush only acks once retries finished.
        recorder.flush().await;

        let rows = store.find(&NodeQuery::new(schema::AUDIT_ENTRY)).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(recorder.dropped_entries(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn exhausted_retries_count_as_dropped() {
        let store = Arc::new(FlakyStore {
            inner: MemoryGraphStore::new(),
            failures_left: AtomicU32::new(u32::MAX),
        });
        let (recorder, _handle) = AuditRecorder::spawn(
            store as Arc<dyn GraphStore>,
            Arc::new(SystemClock),
            AuditConfig::default(),
        );

        recorder.emit(event("otp.verified"));
        recorder.flush().await;

        assert_eq!(recorder.dropped_entries(), 1);
    }
}

use crate::config::Config;
use crate::logging::LogRing;
use crate::relay::ChatRelay;
use crate::writer::{StoreHandle, WriterError};
use chrono::Utc;
use hookwatch_analysis::ModelSettings;
use hookwatch_core::{Diagnostic, NormalizedRecord};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info};

const FEED_BUFFER: usize = 128;

/// Live feed message pushed to every connected viewer.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    NewMessage {
        record: NormalizedRecord,
    },
    ClearMessages,
    #[serde(rename_all = "camelCase")]
    MessagesUpdated {
        deleted_ids: Vec<String>,
    },
}

pub struct HubState {
    pub config: Config,
    pub store: StoreHandle,
    pub relay: Option<ChatRelay>,
    pub model: RwLock<ModelSettings>,
    pub log_ring: LogRing,
    feed: broadcast::Sender<FeedEvent>,
    conn_counter: AtomicU64,
}

impl HubState {
    pub fn new(config: Config, store: StoreHandle, log_ring: LogRing) -> Self {
        let relay = config.relay_url.as_deref().and_then(|url| ChatRelay::new(url));
        let (feed, _) = broadcast::channel(FEED_BUFFER);
        Self {
            model: RwLock::new(config.model.clone()),
            config,
            store,
            relay,
            log_ring,
            feed,
            conn_counter: AtomicU64::new(0),
        }
    }

    pub fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("conn-{id}")
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.feed.subscribe()
    }

    /// Drops the event when nobody is listening.
    pub fn publish(&self, event: FeedEvent) {
        let receivers = self.feed.send(event).unwrap_or(0);
        debug!(event = "feed_publish", receivers = receivers);
    }

    /// Classify, store, relay, and announce one notification.
    pub async fn ingest(
        &self,
        hint: Option<&str>,
        payload: &Value,
    ) -> Result<NormalizedRecord, WriterError> {
        let record = hookwatch_core::classify_at(hint, payload, Utc::now());
        self.store_new(record).await
    }

    /// A failed snapshot rewrite is logged; the merged record is still relayed
    /// and announced.
    pub async fn store_new(&self, record: NormalizedRecord) -> Result<NormalizedRecord, WriterError> {
        match self.store.upsert(record.clone()).await {
            Ok(outcome) => info!(
                event = "record_ingested",
                id = %record.id,
                kind = %record.kind(),
                severity = %record.severity,
                outcome = ?outcome
            ),
            Err(WriterError::Storage(err)) => error!(
                event = "record_persist_failed",
                id = %record.id,
                kind = %record.kind(),
                error = %err
            ),
            Err(err) => return Err(err),
        }
        if let Some(relay) = &self.relay {
            relay.spawn_notify(&record);
        }
        let stored = self.store.get(&record.id).await?.unwrap_or(record);
        self.publish(FeedEvent::NewMessage {
            record: stored.clone(),
        });
        Ok(stored)
    }

    /// Attaches and announces the updated record. `None` when the record left
    /// the store while the analysis ran.
    pub async fn attach_diagnostic(
        &self,
        id: &str,
        diagnostic: Diagnostic,
    ) -> Result<Option<NormalizedRecord>, WriterError> {
        let attached = match self.store.attach(id, diagnostic).await {
            Ok(attached) => attached,
            Err(WriterError::Storage(err)) => {
                error!(event = "diagnostic_persist_failed", id = %id, error = %err);
                self.store
                    .get(id)
                    .await?
                    .filter(|record| record.diagnostic.is_some())
            }
            Err(err) => return Err(err),
        };
        if let Some(record) = &attached {
            self.publish(FeedEvent::NewMessage {
                record: record.clone(),
            });
        }
        Ok(attached)
    }
}

//! The task that owns the [`RecordStore`]. Request handlers and the flush
//! timer are producers on the same command channel, so mutations and
//! snapshot rewrites never interleave.

use hookwatch_core::{Diagnostic, NormalizedRecord};
use hookwatch_storage::{MergeOutcome, RecordStore, StorageError, StoreInfo};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const COMMAND_BUFFER: usize = 256;

#[derive(Debug, Error)]
pub enum WriterError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("store writer is not running")]
    Closed,
}

type Reply<T> = oneshot::Sender<Result<T, StorageError>>;

enum StoreCommand {
    Upsert {
        record: NormalizedRecord,
        reply: Reply<MergeOutcome>,
    },
    Attach {
        id: String,
        diagnostic: Diagnostic,
        reply: Reply<Option<NormalizedRecord>>,
    },
    Delete {
        ids: BTreeSet<String>,
        reply: Reply<usize>,
    },
    Clear {
        reply: Reply<usize>,
    },
    List {
        limit: Option<usize>,
        reply: oneshot::Sender<Vec<NormalizedRecord>>,
    },
    Get {
        id: String,
        reply: oneshot::Sender<Option<NormalizedRecord>>,
    },
    Info {
        reply: oneshot::Sender<StoreInfo>,
    },
    Snapshot {
        reply: Reply<Vec<u8>>,
    },
    Flush,
}

#[derive(Clone, Debug)]
pub struct StoreHandle {
    sender: mpsc::Sender<StoreCommand>,
}

impl std::fmt::Debug for StoreCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Upsert { .. } => "upsert",
            Self::Attach { .. } => "attach",
            Self::Delete { .. } => "delete",
            Self::Clear { .. } => "clear",
            Self::List { .. } => "list",
            Self::Get { .. } => "get",
            Self::Info { .. } => "info",
            Self::Snapshot { .. } => "snapshot",
            Self::Flush => "flush",
        };
        f.write_str(name)
    }
}

pub fn spawn_store_writer(store: RecordStore) -> (StoreHandle, JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel(COMMAND_BUFFER);
    let task = tokio::spawn(run_writer(store, receiver));
    (StoreHandle { sender }, task)
}

async fn run_writer(mut store: RecordStore, mut receiver: mpsc::Receiver<StoreCommand>) {
    info!(event = "store_writer_start", records = store.len());
    while let Some(command) = receiver.recv().await {
        debug!(event = "store_command", command = ?command);
        match command {
            StoreCommand::Upsert { record, reply } => {
                let _ = reply.send(store.append_or_merge(record));
            }
            StoreCommand::Attach {
                id,
                diagnostic,
                reply,
            } => {
                let result = store
                    .attach_diagnostic(&id, diagnostic)
                    .map(|attached| attached.then(|| store.get(&id).cloned()).flatten());
                let _ = reply.send(result);
            }
            StoreCommand::Delete { ids, reply } => {
                let _ = reply.send(store.delete(&ids));
            }
            StoreCommand::Clear { reply } => {
                let _ = reply.send(store.clear());
            }
            StoreCommand::List { limit, reply } => {
                let _ = reply.send(store.list(limit));
            }
            StoreCommand::Get { id, reply } => {
                let _ = reply.send(store.get(&id).cloned());
            }
            StoreCommand::Info { reply } => {
                let _ = reply.send(store.info());
            }
            StoreCommand::Snapshot { reply } => {
                let _ = reply.send(store.snapshot_bytes());
            }
            StoreCommand::Flush => {
                if let Err(err) = store.persist() {
                    error!(event = "flush_failed", error = %err);
                }
            }
        }
    }
    if let Err(err) = store.persist() {
        error!(event = "final_flush_failed", error = %err);
    }
    info!(event = "store_writer_stop", records = store.len());
}

impl StoreHandle {
    async fn request<T>(
        &self,
        command: StoreCommand,
        receiver: oneshot::Receiver<T>,
    ) -> Result<T, WriterError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| WriterError::Closed)?;
        receiver.await.map_err(|_| WriterError::Closed)
    }

    pub async fn upsert(&self, record: NormalizedRecord) -> Result<MergeOutcome, WriterError> {
        let (reply, receiver) = oneshot::channel();
        Ok(self
            .request(StoreCommand::Upsert { record, reply }, receiver)
            .await??)
    }

    /// The updated record, or `None` when it was deleted meanwhile.
    pub async fn attach(
        &self,
        id: &str,
        diagnostic: Diagnostic,
    ) -> Result<Option<NormalizedRecord>, WriterError> {
        let (reply, receiver) = oneshot::channel();
        let command = StoreCommand::Attach {
            id: id.to_string(),
            diagnostic,
            reply,
        };
        Ok(self.request(command, receiver).await??)
    }

    pub async fn delete(&self, ids: BTreeSet<String>) -> Result<usize, WriterError> {
        let (reply, receiver) = oneshot::channel();
        Ok(self
            .request(StoreCommand::Delete { ids, reply }, receiver)
            .await??)
    }

    pub async fn clear(&self) -> Result<usize, WriterError> {
        let (reply, receiver) = oneshot::channel();
        Ok(self.request(StoreCommand::Clear { reply }, receiver).await??)
    }

    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<NormalizedRecord>, WriterError> {
        let (reply, receiver) = oneshot::channel();
        self.request(StoreCommand::List { limit, reply }, receiver)
            .await
    }

    pub async fn get(&self, id: &str) -> Result<Option<NormalizedRecord>, WriterError> {
        let (reply, receiver) = oneshot::channel();
        let command = StoreCommand::Get {
            id: id.to_string(),
            reply,
        };
        self.request(command, receiver).await
    }

    pub async fn info(&self) -> Result<StoreInfo, WriterError> {
        let (reply, receiver) = oneshot::channel();
        self.request(StoreCommand::Info { reply }, receiver).await
    }

    pub async fn snapshot(&self) -> Result<Vec<u8>, WriterError> {
        let (reply, receiver) = oneshot::channel();
        Ok(self
            .request(StoreCommand::Snapshot { reply }, receiver)
            .await??)
    }

    pub async fn flush(&self) -> Result<(), WriterError> {
        self.sender
            .send(StoreCommand::Flush)
            .await
            .map_err(|_| WriterError::Closed)
    }

    /// Periodic snapshot rewrite; stops once the writer is gone.
    pub fn start_flush_timer(&self, interval: Duration) -> Option<JoinHandle<()>> {
        if interval.is_zero() {
            return None;
        }
        let handle = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if handle.flush().await.is_err() {
                    warn!(event = "flush_timer_stop");
                    return;
                }
                debug!(event = "flush_timer_tick");
            }
        }))
    }
}

//! Durable record of transactions whose ledger entry has not been written yet.
//!
//! An entry is created right after broadcast and moves through
//! `Submitted -> Confirmed -> Settled`, or ends as `Reverted` or `Abandoned`.
//! Anything still `Submitted` or `Confirmed` is picked up by the reconcile
//! sweep after a crash or a failed ledger write.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use escrow_lending_core::{DealRecord, Operation, RecordId, TxHash, UserId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OutboxState {
    Submitted,
    Confirmed,
    Settled,
    Reverted,
    Abandoned,
}

impl OutboxState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OutboxState::Settled | OutboxState::Reverted | OutboxState::Abandoned
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub tx_hash: TxHash,
    pub user_id: UserId,
    pub operation: Operation,
    /// Ledger record to append once the transaction is confirmed.
    pub draft: DealRecord,
    pub submitted_at: DateTime<Utc>,
    pub state: OutboxState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<RecordId>,
}

impl OutboxEntry {
    pub fn submitted(
        tx_hash: TxHash,
        user_id: UserId,
        operation: Operation,
        draft: DealRecord,
    ) -> Self {
        Self {
            draft: draft.with_tx_hash(tx_hash.clone()),
            tx_hash,
            user_id,
            operation,
            submitted_at: Utc::now(),
            state: OutboxState::Submitted,
            record_id: None,
        }
    }
}

#[derive(Error, Debug)]
pub enum OutboxError {
    #[error("outbox io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("outbox line {line} is corrupt: {source}")]
    Corrupt {
        line: usize,
        source: serde_json::Error,
    },
    #[error("failed to encode outbox event: {0}")]
    Encode(serde_json::Error),
    #[error("transaction {0} is not in the outbox")]
    UnknownTransaction(TxHash),
    #[error("transaction {0} is already in the outbox")]
    Duplicate(TxHash),
    #[error("transaction {tx_hash} is already {state:?}")]
    AlreadyTerminal {
        tx_hash: TxHash,
        state: OutboxState,
    },
}

#[async_trait::async_trait]
pub trait Outbox: Send + Sync {
    async fn record_submitted(&self, entry: OutboxEntry) -> Result<(), OutboxError>;

    async fn transition(
        &self,
        tx_hash: &TxHash,
        state: OutboxState,
        record_id: Option<RecordId>,
    ) -> Result<(), OutboxError>;

    async fn get(&self, tx_hash: &TxHash) -> Result<Option<OutboxEntry>, OutboxError>;

    /// Entries still `Submitted` or `Confirmed`, oldest first.
    async fn unsettled(&self) -> Result<Vec<OutboxEntry>, OutboxError>;

    async fn mark_confirmed(&self, tx_hash: &TxHash) -> Result<(), OutboxError> {
        self.transition(tx_hash, OutboxState::Confirmed, None).await
    }

    async fn mark_settled(
        &self,
        tx_hash: &TxHash,
        record_id: Option<RecordId>,
    ) -> Result<(), OutboxError> {
        self.transition(tx_hash, OutboxState::Settled, record_id)
            .await
    }

    async fn mark_reverted(&self, tx_hash: &TxHash) -> Result<(), OutboxError> {
        self.transition(tx_hash, OutboxState::Reverted, None).await
    }

    async fn mark_abandoned(&self, tx_hash: &TxHash) -> Result<(), OutboxError> {
        self.transition(tx_hash, OutboxState::Abandoned, None).await
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum OutboxEvent {
    Submitted {
        entry: OutboxEntry,
    },
    #[serde(rename_all = "camelCase")]
    Transition {
        tx_hash: TxHash,
        state: OutboxState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        record_id: Option<RecordId>,
    },
}

/// Current state of every entry, built by folding events in order.
#[derive(Default)]
struct OutboxBook {
    entries: HashMap<TxHash, OutboxEntry>,
    order: Vec<TxHash>,
}

impl OutboxBook {
    /// Checks `event` against the current state without changing anything.
    fn validate(&self, event: &OutboxEvent) -> Result<(), OutboxError> {
        match event {
            OutboxEvent::Submitted { entry } => {
                if self.entries.contains_key(&entry.tx_hash) {
                    return Err(OutboxError::Duplicate(entry.tx_hash.clone()));
                }
            }
            OutboxEvent::Transition { tx_hash, .. } => {
                let entry = self
                    .entries
                    .get(tx_hash)
                    .ok_or_else(|| OutboxError::UnknownTransaction(tx_hash.clone()))?;
                if entry.state.is_terminal() {
                    return Err(OutboxError::AlreadyTerminal {
                        tx_hash: tx_hash.clone(),
                        state: entry.state,
                    });
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, event: OutboxEvent) {
        match event {
            OutboxEvent::Submitted { entry } => {
                self.order.push(entry.tx_hash.clone());
                self.entries.insert(entry.tx_hash.clone(), entry);
            }
            OutboxEvent::Transition {
                tx_hash,
                state,
                record_id,
            } => {
                if let Some(entry) = self.entries.get_mut(&tx_hash) {
                    entry.state = state;
                    if record_id.is_some() {
                        entry.record_id = record_id;
                    }
                }
            }
        }
    }

    fn get(&self, tx_hash: &TxHash) -> Option<OutboxEntry> {
        self.entries.get(tx_hash).cloned()
    }

    fn unsettled(&self) -> Vec<OutboxEntry> {
        self.order
            .iter()
            .filter_map(|tx| self.entries.get(tx))
            .filter(|entry| !entry.state.is_terminal())
            .cloned()
            .collect()
    }
}

fn transition_event(
    tx_hash: &TxHash,
    state: OutboxState,
    record_id: Option<RecordId>,
) -> OutboxEvent {
    OutboxEvent::Transition {
        tx_hash: tx_hash.clone(),
        state,
        record_id,
    }
}

/// Outbox that lives only as long as the process.
#[derive(Default)]
pub struct MemoryOutbox {
    book: Mutex<OutboxBook>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self) -> MutexGuard<'_, OutboxBook> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn commit(&self, event: OutboxEvent) -> Result<(), OutboxError> {
        let mut book = self.book();
        book.validate(&event)?;
        book.apply(event);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Outbox for MemoryOutbox {
    async fn record_submitted(&self, entry: OutboxEntry) -> Result<(), OutboxError> {
        self.commit(OutboxEvent::Submitted { entry })
    }

    async fn transition(
        &self,
        tx_hash: &TxHash,
        state: OutboxState,
        record_id: Option<RecordId>,
    ) -> Result<(), OutboxError> {
        self.commit(transition_event(tx_hash, state, record_id))
    }

    async fn get(&self, tx_hash: &TxHash) -> Result<Option<OutboxEntry>, OutboxError> {
        Ok(self.book().get(tx_hash))
    }

    async fn unsettled(&self) -> Result<Vec<OutboxEntry>, OutboxError> {
        Ok(self.book().unsettled())
    }
}

struct FileOutboxInner {
    book: OutboxBook,
    file: tokio::fs::File,
}

/// Outbox backed by an append-only JSON-lines event log.
///
/// Every event is synced to disk before the call returns.
pub struct FileOutbox {
    path: PathBuf,
    inner: tokio::sync::Mutex<FileOutboxInner>,
}

impl FileOutbox {
    /// Opens `path`, creating it if missing, and replays its events.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, OutboxError> {
        let path = path.as_ref().to_path_buf();
        let mut book = OutboxBook::default();

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };

        let mut valid_len = 0;
        let mut torn = false;
        let mut lines = contents.split_inclusive('\n').enumerate().peekable();
        while let Some((index, line)) = lines.next() {
            let start = valid_len;
            valid_len += line.len();
            if line.trim().is_empty() {
                continue;
            }
            let event: OutboxEvent = match serde_json::from_str(line.trim_end()) {
                Ok(event) => event,
                // a crash mid-write can only tear the final, unterminated line
                Err(e) if lines.peek().is_none() && !line.ends_with('\n') => {
                    warn!(
                        "dropping torn final line {} of outbox {}: {e}",
                        index + 1,
                        path.display()
                    );
                    valid_len = start;
                    torn = true;
                    break;
                }
                Err(source) => {
                    return Err(OutboxError::Corrupt {
                        line: index + 1,
                        source,
                    })
                }
            };
            if let Err(e) = book.validate(&event) {
                warn!("skipping outbox line {}: {e}", index + 1);
                continue;
            }
            book.apply(event);
        }
        if torn {
            tokio::fs::write(&path, &contents[..valid_len]).await?;
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let kept = &contents[..valid_len];
        if !kept.is_empty() && !kept.ends_with('\n') {
            debug!("terminating last line of outbox {}", path.display());
            file.write_all(b"\n").await?;
            file.sync_data().await?;
        }

        let pending = book.unsettled().len();
        if pending > 0 {
            info!(
                "outbox {} has {pending} unsettled transaction(s)",
                path.display()
            );
        } else {
            debug!("opened outbox {}", path.display());
        }

        Ok(Self {
            path,
            inner: tokio::sync::Mutex::new(FileOutboxInner { book, file }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn commit(&self, event: OutboxEvent) -> Result<(), OutboxError> {
        let mut inner = self.inner.lock().await;
        inner.book.validate(&event)?;

        let mut line = serde_json::to_string(&event).map_err(OutboxError::Encode)?;
        line.push('\n');
        inner.file.write_all(line.as_bytes()).await?;
        inner.file.flush().await?;
        inner.file.sync_data().await?;

        inner.book.apply(event);
        Ok(())
    }
}

#[async_trait::async_trait]
impl Outbox for FileOutbox {
    async fn record_submitted(&self, entry: OutboxEntry) -> Result<(), OutboxError> {
        self.commit(OutboxEvent::Submitted { entry }).await
    }

    async fn transition(
        &self,
        tx_hash: &TxHash,
        state: OutboxState,
        record_id: Option<RecordId>,
    ) -> Result<(), OutboxError> {
        self.commit(transition_event(tx_hash, state, record_id))
            .await
    }

    async fn get(&self, tx_hash: &TxHash) -> Result<Option<OutboxEntry>, OutboxError> {
        Ok(self.inner.lock().await.book.get(tx_hash))
    }

    async fn unsettled(&self) -> Result<Vec<OutboxEntry>, OutboxError> {
        Ok(self.inner.lock().await.book.unsettled())
    }
}

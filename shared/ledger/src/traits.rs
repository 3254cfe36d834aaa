use escrow_lending_core::{DealRecord, RecordId, UserId};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[error("ledger storage unreachable: {0}")]
    Transport(String),
    #[error("ledger storage answered HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("ledger storage returned an unreadable response: {0}")]
    MalformedResponse(String),
    #[error("ledger storage unavailable: {0}")]
    Unavailable(String),
}

/// Append-only history of settled deals.
#[async_trait::async_trait]
pub trait DealLedger: Send + Sync {
    /// The entry exists only once this returns `Ok`.
    async fn append(&self, record: &DealRecord) -> Result<RecordId, PersistError>;

    /// Every deal of `user_id`, most recent first. Never cached.
    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<DealRecord>, PersistError>;
}

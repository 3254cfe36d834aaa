use escrow_lending_core::{QuantityError, TxHash};
use thiserror::Error;

/// Failure reported by a wallet provider or chain node.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("wallet provider unavailable: {0}")]
    Unavailable(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("rejected by wallet provider: {0}")]
    Rejected(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[derive(Error, Debug)]
pub enum ChainReadError {
    #[error("chain provider unavailable while reading {accessor}: {cause}")]
    Unavailable { accessor: &'static str, cause: String },

    #[error("reading {accessor} failed: {source}")]
    Network {
        accessor: &'static str,
        source: ChainError,
    },

    #[error("{accessor} returned {raw:?}, which is not a usable non-negative integer: {source}")]
    Parse {
        accessor: &'static str,
        raw: String,
        source: QuantityError,
    },
}

impl ChainReadError {
    pub(crate) fn from_chain(accessor: &'static str, err: ChainError) -> Self {
        match err {
            ChainError::Unavailable(cause) => ChainReadError::Unavailable { accessor, cause },
            other => ChainReadError::Network {
                accessor,
                source: other,
            },
        }
    }
}

/// Terminal outcome of one submission attempt. Never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("{operation} transaction was never sent: {cause}")]
    NotSent {
        operation: &'static str,
        cause: String,
    },

    #[error("{operation} transaction {tx_hash} reverted on chain (status {status})")]
    Reverted {
        operation: &'static str,
        tx_hash: TxHash,
        status: u64,
    },

    #[error("{operation} transaction {tx_hash} was sent but its outcome is unknown: {cause}")]
    Unconfirmed {
        operation: &'static str,
        tx_hash: TxHash,
        cause: String,
    },
}

impl SubmissionError {
    pub fn tx_hash(&self) -> Option<&TxHash> {
        match self {
            SubmissionError::NotSent { .. } => None,
            SubmissionError::Reverted { tx_hash, .. }
            | SubmissionError::Unconfirmed { tx_hash, .. } => Some(tx_hash),
        }
    }
}

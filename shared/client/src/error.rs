use escrow_lending_chain::{ChainError, ChainReadError, SubmissionError};
use escrow_lending_core::{DealRecord, TxHash, UserId, WalletAddress};
use escrow_lending_ledger::PersistError;
use thiserror::Error;

/// How far an operation got before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Refused before anything was sent.
    Rejected,
    NotSent,
    Reverted,
    /// Broadcast, outcome unknown.
    Unconfirmed,
    /// Settled on chain, deal record missing.
    LedgerWriteFailed,
    Cancelled,
}

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("amount must be greater than zero")]
    InvalidAmount,
    #[error("{user_id} has nothing to withdraw")]
    NothingToWithdraw { user_id: UserId },
    #[error("{address} is not the escrow administrator")]
    Unauthorized { address: WalletAddress },
    #[error("wallet unavailable: {0}")]
    Wallet(ChainError),
    #[error("no position known for {user_id}, refusing to withdraw: {source}")]
    PositionUnavailable {
        user_id: UserId,
        source: ChainReadError,
    },
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    #[error("transaction {tx_hash} settled but its {} record was not saved: {source}", .record.kind)]
    LedgerWriteFailed {
        tx_hash: TxHash,
        record: DealRecord,
        source: PersistError,
    },
    #[error("cancelled{}", .tx_hash.as_ref().map(|tx| format!(" after broadcasting {tx}")).unwrap_or_default())]
    Cancelled { tx_hash: Option<TxHash> },
}

impl ReconcileError {
    pub fn stage(&self) -> Stage {
        match self {
            ReconcileError::InvalidAmount
            | ReconcileError::NothingToWithdraw { .. }
            | ReconcileError::Unauthorized { .. } => Stage::Rejected,
            ReconcileError::Wallet(_) | ReconcileError::PositionUnavailable { .. } => {
                Stage::NotSent
            }
            ReconcileError::Submission(SubmissionError::NotSent { .. }) => Stage::NotSent,
            ReconcileError::Submission(SubmissionError::Reverted { .. }) => Stage::Reverted,
            ReconcileError::Submission(SubmissionError::Unconfirmed { .. }) => Stage::Unconfirmed,
            ReconcileError::LedgerWriteFailed { .. } => Stage::LedgerWriteFailed,
            ReconcileError::Cancelled { .. } => Stage::Cancelled,
        }
    }

    /// True when funds may have moved on chain even though the operation failed.
    pub fn money_may_have_moved(&self) -> bool {
        match self {
            ReconcileError::Cancelled { tx_hash } => tx_hash.is_some(),
            _ => matches!(
                self.stage(),
                Stage::Unconfirmed | Stage::LedgerWriteFailed
            ),
        }
    }

    pub fn tx_hash(&self) -> Option<&TxHash> {
        match self {
            ReconcileError::Submission(e) => e.tx_hash(),
            ReconcileError::LedgerWriteFailed { tx_hash, .. } => Some(tx_hash),
            ReconcileError::Cancelled { tx_hash } => tx_hash.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx() -> TxHash {
        format!("0x{:064x}", 1).parse().unwrap()
    }

    #[test]
    fn only_post_broadcast_failures_may_have_moved_money() {
        assert!(!ReconcileError::InvalidAmount.money_may_have_moved());
        assert!(!ReconcileError::Cancelled { tx_hash: None }.money_may_have_moved());
        assert!(ReconcileError::Cancelled {
            tx_hash: Some(tx())
        }
        .money_may_have_moved());

        let reverted = ReconcileError::from(SubmissionError::Reverted {
            operation: "deposit",
            tx_hash: tx(),
            status: 0,
        });
        assert_eq!(reverted.stage(), Stage::Reverted);
        assert!(!reverted.money_may_have_moved());

        let unconfirmed = ReconcileError::from(SubmissionError::Unconfirmed {
            operation: "withdraw",
            tx_hash: tx(),
            cause: "timeout".to_string(),
        });
        assert!(unconfirmed.money_may_have_moved());
        assert_eq!(unconfirmed.tx_hash(), Some(&tx()));
    }

    #[test]
    fn messages_are_distinguishable() {
        let cancelled = ReconcileError::Cancelled {
            tx_hash: Some(tx()),
        };
        assert!(cancelled.to_string().starts_with("cancelled after broadcasting 0x"));
        assert_eq!(
            ReconcileError::Cancelled { tx_hash: None }.to_string(),
            "cancelled"
        );
    }
}

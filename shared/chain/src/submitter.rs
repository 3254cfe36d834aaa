use std::time::Duration;

use escrow_lending_core::{Operation, Receipt, TxHash};
use tracing::{debug, info, warn};

use crate::{SubmissionError, Wallet};

const DEFAULT_CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

/// A transaction that has been broadcast but whose receipt we have not seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingTransaction {
    pub tx_hash: TxHash,
    pub operation: Operation,
}

/// Sends escrow operations through a wallet and classifies how they ended.
///
/// There is no deduplication and no resubmission: every call to
/// [`TransactionSubmitter::broadcast`] is a new transaction, and a failure is
/// handed back to the caller to decide what to do.
#[derive(Debug, Clone, Copy)]
pub struct TransactionSubmitter {
    confirmation_timeout: Duration,
}

impl Default for TransactionSubmitter {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIRMATION_TIMEOUT)
    }
}

impl TransactionSubmitter {
    pub fn new(confirmation_timeout: Duration) -> Self {
        Self {
            confirmation_timeout,
        }
    }

    pub async fn submit(
        &self,
        wallet: &dyn Wallet,
        operation: Operation,
    ) -> Result<Receipt, SubmissionError> {
        let pending = self.broadcast(wallet, operation).await?;
        self.confirm(wallet, &pending).await
    }

    pub async fn broadcast(
        &self,
        wallet: &dyn Wallet,
        operation: Operation,
    ) -> Result<PendingTransaction, SubmissionError> {
        let tx_hash = wallet.send_transaction(operation).await.map_err(|e| {
            warn!("{} transaction not sent: {e}", operation.name());
            SubmissionError::NotSent {
                operation: operation.name(),
                cause: e.to_string(),
            }
        })?;
        debug!("{} transaction broadcast as {tx_hash}", operation.name());
        Ok(PendingTransaction { tx_hash, operation })
    }

    /// Suspends until the transaction has a receipt or the confirmation timeout
    /// elapses.
    ///
    /// # Cancel safety
    ///
    /// Cancel safe. Dropping the future abandons tracking only; the transaction
    /// stays on chain.
    pub async fn confirm(
        &self,
        wallet: &dyn Wallet,
        pending: &PendingTransaction,
    ) -> Result<Receipt, SubmissionError> {
        let operation = pending.operation.name();
        let tx_hash = pending.tx_hash.clone();

        let receipt = match tokio::time::timeout(
            self.confirmation_timeout,
            wallet.wait_for_receipt(&pending.tx_hash),
        )
        .await
        {
            Err(_) => {
                return Err(SubmissionError::Unconfirmed {
                    operation,
                    tx_hash,
                    cause: format!("no receipt after {:?}", self.confirmation_timeout),
                })
            }
            Ok(Err(e)) => {
                return Err(SubmissionError::Unconfirmed {
                    operation,
                    tx_hash,
                    cause: e.to_string(),
                })
            }
            Ok(Ok(receipt)) => receipt,
        };

        if receipt.succeeded() {
            info!("{operation} transaction {tx_hash} confirmed");
            Ok(Receipt {
                success: true,
                tx_hash,
            })
        } else {
            warn!(
                "{operation} transaction {tx_hash} reverted with status {}",
                receipt.status
            );
            Err(SubmissionError::Reverted {
                operation,
                tx_hash,
                status: receipt.status,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{memnet::MemnetEscrow, ChainError};
    use escrow_lending_core::WalletAddress;

    const LENDER: &str = "0x2222222222222222222222222222222222222222";
    const ADMIN: &str = "0x00000000000000000000000000000000000000aa";

    fn lender() -> WalletAddress {
        LENDER.parse().unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn successful_deposit_is_confirmed() {
        let memnet = MemnetEscrow::new(ADMIN.parse().unwrap(), 500);
        let wallet = memnet.wallet(lender(), 5000);

        let receipt = TransactionSubmitter::default()
            .submit(&wallet, Operation::Deposit { amount: 1000 })
            .await
            .unwrap();
        assert!(receipt.success);
        assert_eq!(memnet.position_of(&lender()), (1000, 0));
    }

    #[test_log::test(tokio::test)]
    async fn provider_rejection_is_not_sent() {
        let memnet = MemnetEscrow::new(ADMIN.parse().unwrap(), 500);
        let wallet = memnet.wallet(lender(), 10);

        let err = TransactionSubmitter::default()
            .submit(&wallet, Operation::Deposit { amount: 1000 })
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::NotSent { .. }));
        assert!(err.tx_hash().is_none());
    }

    #[test_log::test(tokio::test)]
    async fn failed_status_is_reverted() {
        let memnet = MemnetEscrow::new(ADMIN.parse().unwrap(), 500);
        let wallet = memnet.wallet(lender(), 5000);
        memnet.revert_next(1);

        let err = TransactionSubmitter::default()
            .submit(&wallet, Operation::Deposit { amount: 1000 })
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::Reverted { status: 0, .. }));
        assert_eq!(memnet.position_of(&lender()), (0, 0));
    }

    #[test_log::test(tokio::test)]
    async fn missing_receipt_is_unconfirmed() {
        let memnet = MemnetEscrow::new(ADMIN.parse().unwrap(), 500);
        let wallet = memnet.wallet(lender(), 5000);
        memnet.hold_receipts(true);

        let err = TransactionSubmitter::new(Duration::from_millis(50))
            .submit(&wallet, Operation::Deposit { amount: 1000 })
            .await
            .unwrap_err();
        assert!(matches!(err, SubmissionError::Unconfirmed { .. }));
        assert!(err.tx_hash().is_some());
    }

    #[test_log::test(tokio::test)]
    async fn every_call_is_a_new_transaction() {
        let memnet = MemnetEscrow::new(ADMIN.parse().unwrap(), 500);
        let wallet = memnet.wallet(lender(), 5000);
        let submitter = TransactionSubmitter::default();

        let a = submitter
            .submit(&wallet, Operation::Deposit { amount: 100 })
            .await
            .unwrap();
        let b = submitter
            .submit(&wallet, Operation::Deposit { amount: 100 })
            .await
            .unwrap();
        assert_ne!(a.tx_hash, b.tx_hash);
        assert_eq!(memnet.position_of(&lender()), (200, 0));
        assert_eq!(memnet.sent_operations().len(), 2);
    }

    #[test_log::test(tokio::test)]
    async fn send_failures_carry_their_cause() {
        let memnet = MemnetEscrow::new(ADMIN.parse().unwrap(), 500);
        let wallet = memnet.wallet(lender(), 5000);
        memnet.fail_next_send(ChainError::Rejected("user rejected the request".into()));

        let err = TransactionSubmitter::default()
            .submit(&wallet, Operation::Withdraw)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("user rejected the request"));
    }
}

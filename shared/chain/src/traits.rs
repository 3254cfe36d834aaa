use escrow_lending_core::{Operation, TxHash, WalletAddress, RECEIPT_STATUS_SUCCESS};
use serde::{Deserialize, Serialize};

use crate::ChainError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub status: u64,
}

impl TxReceipt {
    pub fn succeeded(&self) -> bool {
        self.status == RECEIPT_STATUS_SUCCESS
    }
}

/// The connected wallet. Signs and sends; the core never sees keys.
#[async_trait::async_trait]
pub trait Wallet: Send + Sync {
    async fn address(&self) -> Result<WalletAddress, ChainError>;

    /// Signs and broadcasts `operation` against the escrow contract.
    async fn send_transaction(&self, operation: Operation) -> Result<TxHash, ChainError>;

    /// Suspends until `tx` has a receipt.
    ///
    /// # Cancel safety
    ///
    /// This method must be cancel safe.
    async fn wait_for_receipt(&self, tx: &TxHash) -> Result<TxReceipt, ChainError>;
}

/// Read accessors of the escrow and lender contracts.
///
/// Values are returned as raw quantity text so the caller decides how to
/// parse and what counts as malformed.
#[async_trait::async_trait]
pub trait EscrowContract: Send + Sync {
    /// `lenders(address).amount`
    async fn lender_amount(&self, lender: &WalletAddress) -> Result<String, ChainError>;
    /// `totalInterestGained(address)`
    async fn total_interest_gained(&self, lender: &WalletAddress) -> Result<String, ChainError>;
    /// `interestRate()`
    async fn interest_rate(&self) -> Result<String, ChainError>;
    /// Receipt of a previously broadcast transaction, if it has one yet.
    async fn transaction_receipt(&self, tx: &TxHash) -> Result<Option<TxReceipt>, ChainError>;
}

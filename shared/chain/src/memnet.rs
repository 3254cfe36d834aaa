//! In-memory escrow contract for tests and local dry runs.
//!
//! Transactions execute at send time, the way they would once mined; their
//! receipts can be held back to simulate confirmation latency.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use escrow_lending_core::{Operation, TxHash, WalletAddress, RECEIPT_STATUS_SUCCESS};
use tokio::sync::watch;

use crate::{ChainError, EscrowContract, TxReceipt, Wallet};

const RECEIPT_STATUS_FAILED: u64 = 0;

#[derive(Default)]
struct MemnetState {
    lenders: HashMap<WalletAddress, u128>,
    interest: HashMap<WalletAddress, u128>,
    funds: HashMap<WalletAddress, u128>,
    interest_rate: u64,
    receipts: HashMap<TxHash, TxReceipt>,
    sent: Vec<(WalletAddress, Operation)>,
    next_tx: u64,

    send_failures: VecDeque<ChainError>,
    reverts: usize,
    read_failure: Option<ChainError>,
    raw_interest_rate: Option<String>,
}

#[derive(Clone)]
pub struct MemnetEscrow {
    admin: WalletAddress,
    state: Arc<Mutex<MemnetState>>,
    receipts_held: Arc<watch::Sender<bool>>,
}

impl MemnetEscrow {
    pub fn new(admin: WalletAddress, interest_rate_bps: u64) -> Self {
        let (receipts_held, _) = watch::channel(false);
        Self {
            admin,
            state: Arc::new(Mutex::new(MemnetState {
                interest_rate: interest_rate_bps,
                ..Default::default()
            })),
            receipts_held: Arc::new(receipts_held),
        }
    }

    fn state(&self) -> MutexGuard<'_, MemnetState> {
        // a poisoned lock only means another test thread panicked mid-update
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A wallet for `address` holding `funds` of native currency.
    pub fn wallet(&self, address: WalletAddress, funds: u128) -> MemnetWallet {
        self.state().funds.insert(address.clone(), funds);
        MemnetWallet {
            escrow: self.clone(),
            address,
        }
    }

    pub fn funds_of(&self, address: &WalletAddress) -> u128 {
        self.state().funds.get(address).copied().unwrap_or_default()
    }

    /// `(deposit, interest)` as the contract currently sees it.
    pub fn position_of(&self, address: &WalletAddress) -> (u128, u128) {
        let state = self.state();
        (
            state.lenders.get(address).copied().unwrap_or_default(),
            state.interest.get(address).copied().unwrap_or_default(),
        )
    }

    pub fn set_position(&self, address: &WalletAddress, deposit: u128, interest: u128) {
        let mut state = self.state();
        state.lenders.insert(address.clone(), deposit);
        state.interest.insert(address.clone(), interest);
    }

    /// Interest accrual happens outside of any application transaction.
    pub fn accrue_interest(&self, address: &WalletAddress, amount: u128) {
        let mut state = self.state();
        if state.lenders.get(address).copied().unwrap_or_default() > 0 {
            *state.interest.entry(address.clone()).or_default() += amount;
        }
    }

    pub fn interest_rate(&self) -> u64 {
        self.state().interest_rate
    }

    pub fn sent_operations(&self) -> Vec<(WalletAddress, Operation)> {
        self.state().sent.clone()
    }

    pub fn fail_next_send(&self, error: ChainError) {
        self.state().send_failures.push_back(error);
    }

    /// The next `n` broadcast transactions are mined with a failed status.
    pub fn revert_next(&self, n: usize) {
        self.state().reverts = n;
    }

    pub fn fail_reads(&self, error: Option<ChainError>) {
        self.state().read_failure = error;
    }

    pub fn corrupt_interest_rate(&self, raw: Option<String>) {
        self.state().raw_interest_rate = raw;
    }

    /// While held, `wait_for_receipt` suspends and `transaction_receipt`
    /// reports nothing.
    pub fn hold_receipts(&self, held: bool) {
        self.receipts_held.send_replace(held);
    }

    fn read_failure(&self) -> Result<(), ChainError> {
        match &self.state().read_failure {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    fn execute(&self, from: &WalletAddress, operation: Operation) -> Result<TxHash, ChainError> {
        let mut state = self.state();
        if let Some(err) = state.send_failures.pop_front() {
            return Err(err);
        }

        let value = operation.value();
        let funds = state.funds.get(from).copied().unwrap_or_default();
        if value > funds {
            return Err(ChainError::Rejected(format!(
                "insufficient funds for transfer: have {funds}, want {value}"
            )));
        }

        state.next_tx += 1;
        let tx_hash: TxHash = format!("0x{:064x}", state.next_tx)
            .parse()
            .map_err(|e| ChainError::Malformed(format!("{e}")))?;
        state.sent.push((from.clone(), operation));

        let status = if state.reverts > 0 {
            state.reverts -= 1;
            RECEIPT_STATUS_FAILED
        } else {
            match operation {
                Operation::Deposit { amount } if amount > 0 => {
                    *state.funds.entry(from.clone()).or_default() -= amount;
                    *state.lenders.entry(from.clone()).or_default() += amount;
                    RECEIPT_STATUS_SUCCESS
                }
                Operation::Deposit { .. } => RECEIPT_STATUS_FAILED,
                Operation::Withdraw => {
                    let deposit = state.lenders.get(from).copied().unwrap_or_default();
                    if deposit == 0 {
                        RECEIPT_STATUS_FAILED
                    } else {
                        state.lenders.remove(from);
                        let interest = state.interest.remove(from).unwrap_or_default();
                        *state.funds.entry(from.clone()).or_default() += deposit + interest;
                        RECEIPT_STATUS_SUCCESS
                    }
                }
                Operation::ChangeRate { new_rate_bps } => {
                    if *from == self.admin {
                        state.interest_rate = new_rate_bps;
                        RECEIPT_STATUS_SUCCESS
                    } else {
                        RECEIPT_STATUS_FAILED
                    }
                }
            }
        };

        state.receipts.insert(
            tx_hash.clone(),
            TxReceipt {
                tx_hash: tx_hash.clone(),
                status,
            },
        );
        Ok(tx_hash)
    }

    fn receipt(&self, tx: &TxHash) -> Option<TxReceipt> {
        if *self.receipts_held.borrow() {
            return None;
        }
        self.state().receipts.get(tx).cloned()
    }
}

#[async_trait::async_trait]
impl EscrowContract for MemnetEscrow {
    async fn lender_amount(&self, lender: &WalletAddress) -> Result<String, ChainError> {
        self.read_failure()?;
        Ok(format!("{:#x}", self.position_of(lender).0))
    }

    async fn total_interest_gained(&self, lender: &WalletAddress) -> Result<String, ChainError> {
        self.read_failure()?;
        Ok(format!("{:#x}", self.position_of(lender).1))
    }

    async fn interest_rate(&self) -> Result<String, ChainError> {
        self.read_failure()?;
        let state = self.state();
        Ok(match &state.raw_interest_rate {
            Some(raw) => raw.clone(),
            None => format!("{:#x}", state.interest_rate),
        })
    }

    async fn transaction_receipt(&self, tx: &TxHash) -> Result<Option<TxReceipt>, ChainError> {
        self.read_failure()?;
        Ok(self.receipt(tx))
    }
}

pub struct MemnetWallet {
    escrow: MemnetEscrow,
    address: WalletAddress,
}

#[async_trait::async_trait]
impl Wallet for MemnetWallet {
    async fn address(&self) -> Result<WalletAddress, ChainError> {
        Ok(self.address.clone())
    }

    async fn send_transaction(&self, operation: Operation) -> Result<TxHash, ChainError> {
        self.escrow.execute(&self.address, operation)
    }

    async fn wait_for_receipt(&self, tx: &TxHash) -> Result<TxReceipt, ChainError> {
        let mut held = self.escrow.receipts_held.subscribe();
        held.wait_for(|held| !*held)
            .await
            .map_err(|_| ChainError::Unavailable("memnet shut down".to_string()))?;
        self.escrow
            .state()
            .receipts
            .get(tx)
            .cloned()
            .ok_or_else(|| ChainError::Rpc {
                code: -32000,
                message: format!("unknown transaction {tx}"),
            })
    }
}

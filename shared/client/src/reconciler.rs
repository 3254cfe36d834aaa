use std::sync::Arc;

use chrono::Utc;
use escrow_lending_chain::{
    ChainError, PendingTransaction, SubmissionError, TransactionSubmitter,
};
use escrow_lending_core::{
    DealRecord, LenderPosition, Operation, Receipt, RecordId, TxHash, UserId,
};
use escrow_lending_ledger::{DealLedger, Outbox, OutboxEntry, OutboxError, OutboxState, PersistError};
use escrow_lending_watcher::PositionWatcher;
use thiserror::Error;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{LenderAccount, ReconcileError, UserLocks};

/// A deposit or withdrawal that settled on chain and was recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DealOutcome {
    pub receipt: Receipt,
    pub record: DealRecord,
    pub record_id: RecordId,
    /// Position read right after settlement, `None` if that read failed.
    pub position: Option<LenderPosition>,
    /// The recorded amount came from the cached position because the chain
    /// could not be read, so interest accrued since then is missing.
    pub from_cached_position: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileReport {
    pub appended: usize,
    pub already_recorded: usize,
    pub reverted: usize,
    pub still_pending: usize,
    pub failed: usize,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.still_pending == 0 && self.failed == 0
    }
}

enum SweepOutcome {
    Appended,
    AlreadyRecorded,
    Reverted,
    StillPending,
    Skipped,
}

#[derive(Error, Debug)]
enum SweepError {
    #[error("receipt lookup failed: {0}")]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Ledger(#[from] PersistError),
    #[error(transparent)]
    Outbox(#[from] OutboxError),
}

/// Keeps the chain and the deal ledger in agreement for each lender.
///
/// Every operation for a user runs inside that user's exclusive section, from
/// the pre-operation read to the post-operation refresh.
#[derive(Clone)]
pub struct PositionReconciler {
    submitter: TransactionSubmitter,
    watcher: PositionWatcher,
    ledger: Arc<dyn DealLedger>,
    outbox: Arc<dyn Outbox>,
    locks: UserLocks,
}

impl PositionReconciler {
    pub fn new(
        submitter: TransactionSubmitter,
        watcher: PositionWatcher,
        ledger: Arc<dyn DealLedger>,
        outbox: Arc<dyn Outbox>,
    ) -> Self {
        Self {
            submitter,
            watcher,
            ledger,
            outbox,
            locks: UserLocks::new(),
        }
    }

    pub fn watcher(&self) -> &PositionWatcher {
        &self.watcher
    }

    /// Most recent first, fetched fresh on every call.
    pub async fn deals(&self, user_id: UserId) -> Result<Vec<DealRecord>, PersistError> {
        self.ledger.list_by_user(user_id).await
    }

    pub async fn deposit(
        &self,
        account: &LenderAccount,
        amount: u128,
        cancel: &CancellationToken,
    ) -> Result<DealOutcome, ReconcileError> {
        if amount == 0 {
            return Err(ReconcileError::InvalidAmount);
        }
        let _section = self.enter(account.user_id, cancel).await?;

        let draft = DealRecord::deposit(account.user_id, amount, None);
        self.settle(account, Operation::Deposit { amount }, draft, None, cancel)
            .await
    }

    /// Withdraws the whole balance. The recorded amount is principal plus
    /// interest as read just before sending.
    pub async fn withdraw(
        &self,
        account: &LenderAccount,
        cancel: &CancellationToken,
    ) -> Result<DealOutcome, ReconcileError> {
        let _section = self.enter(account.user_id, cancel).await?;

        let mut from_cached_position = false;
        let before = match self.watcher.refresh(account.user_id, &account.address).await {
            Ok((_, position)) => position,
            Err(source) => match self.watcher.cached(account.user_id) {
                Some(cached) => {
                    warn!("withdrawing against cached position {cached}");
                    from_cached_position = true;
                    cached
                }
                None => {
                    return Err(ReconcileError::PositionUnavailable {
                        user_id: account.user_id,
                        source,
                    })
                }
            },
        };
        if before.is_empty() {
            return Err(ReconcileError::NothingToWithdraw {
                user_id: account.user_id,
            });
        }

        let draft = DealRecord::withdrawal(&before, None);
        let emptied = LenderPosition {
            deposit_amount: 0,
            interest_earned: 0,
            ..before
        };
        let mut outcome = self
            .settle(account, Operation::Withdraw, draft, Some(emptied), cancel)
            .await?;
        if from_cached_position {
            warn!(
                user_id = %account.user_id,
                tx_hash = %outcome.receipt.tx_hash,
                "withdrawal recorded as {} from a cached position, interest accrued since may be missing",
                outcome.record.amount
            );
            outcome.from_cached_position = true;
        }
        Ok(outcome)
    }

    async fn enter(
        &self,
        user_id: UserId,
        cancel: &CancellationToken,
    ) -> Result<tokio::sync::OwnedMutexGuard<()>, ReconcileError> {
        select! {
            _ = cancel.cancelled() => Err(ReconcileError::Cancelled { tx_hash: None }),
            guard = self.locks.lock(user_id) => Ok(guard),
        }
    }

    async fn settle(
        &self,
        account: &LenderAccount,
        operation: Operation,
        draft: DealRecord,
        settled_position: Option<LenderPosition>,
        cancel: &CancellationToken,
    ) -> Result<DealOutcome, ReconcileError> {
        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled { tx_hash: None });
        }
        let pending = self
            .submitter
            .broadcast(account.wallet.as_ref(), operation)
            .await?;
        let entry = OutboxEntry::submitted(
            pending.tx_hash.clone(),
            account.user_id,
            operation,
            draft,
        );
        let record = entry.draft.clone();
        if let Err(e) = self.outbox.record_submitted(entry).await {
            error!(
                "transaction {} is not tracked in the outbox, record it by hand if it settles: {e}",
                pending.tx_hash
            );
        }

        let receipt = self.confirm(account, &pending, cancel).await?;
        self.outbox_step(self.outbox.mark_confirmed(&receipt.tx_hash).await);
        // the snapshot taken before sending is stale from here on
        if let Some(known) = settled_position {
            self.watcher.assume(known);
        }
        let record = record.with_timestamp(Utc::now());

        let record_id = match self.ledger.append(&record).await {
            Ok(id) => id,
            Err(source) => {
                error!(
                    user_id = %account.user_id,
                    tx_hash = %receipt.tx_hash,
                    "{} settled on chain but the deal record was not saved: {source}",
                    operation.name()
                );
                return Err(ReconcileError::LedgerWriteFailed {
                    tx_hash: receipt.tx_hash,
                    record,
                    source,
                });
            }
        };
        self.outbox_step(
            self.outbox
                .mark_settled(&receipt.tx_hash, Some(record_id))
                .await,
        );
        info!(
            user_id = %account.user_id,
            tx_hash = %receipt.tx_hash,
            record_id = %record_id,
            amount = %record.amount,
            "{} settled",
            operation.name()
        );

        let position = self
            .watcher
            .refresh(account.user_id, &account.address)
            .await
            .map(|(_, position)| position)
            .ok();

        Ok(DealOutcome {
            receipt,
            record,
            record_id,
            position,
            from_cached_position: false,
        })
    }

    async fn confirm(
        &self,
        account: &LenderAccount,
        pending: &PendingTransaction,
        cancel: &CancellationToken,
    ) -> Result<Receipt, ReconcileError> {
        let result = select! {
            _ = cancel.cancelled() => {
                warn!(
                    "stopped waiting for {} {}, the sweep will settle it",
                    pending.operation.name(),
                    pending.tx_hash
                );
                return Err(ReconcileError::Cancelled {
                    tx_hash: Some(pending.tx_hash.clone()),
                });
            }
            result = self.submitter.confirm(account.wallet.as_ref(), pending) => result,
        };
        match result {
            Ok(receipt) => Ok(receipt),
            Err(e @ SubmissionError::Reverted { .. }) => {
                self.outbox_step(self.outbox.mark_reverted(&pending.tx_hash).await);
                Err(e.into())
            }
            // unconfirmed stays Submitted for the sweep
            Err(e) => Err(e.into()),
        }
    }

    fn outbox_step(&self, result: Result<(), OutboxError>) {
        if let Err(e) = result {
            warn!("outbox update failed: {e}");
        }
    }

    /// Settles every outbox entry left behind by a crash, a cancelled wait or
    /// a failed ledger write.
    ///
    /// Safe to run repeatedly: a deal whose `tx_hash` is already in the ledger
    /// is not appended again.
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport, OutboxError> {
        let entries = self.outbox.unsettled().await?;
        let mut report = ReconcileReport::default();
        if entries.is_empty() {
            debug!("outbox is empty, nothing to reconcile");
            return Ok(report);
        }
        info!("reconciling {} unsettled transaction(s)", entries.len());

        for entry in entries {
            let _section = self.locks.lock(entry.user_id).await;
            match self.reconcile_entry(&entry.tx_hash).await {
                Ok(SweepOutcome::Appended) => report.appended += 1,
                Ok(SweepOutcome::AlreadyRecorded) => report.already_recorded += 1,
                Ok(SweepOutcome::Reverted) => report.reverted += 1,
                Ok(SweepOutcome::StillPending) => report.still_pending += 1,
                Ok(SweepOutcome::Skipped) => {}
                Err(e) => {
                    warn!("could not reconcile {}: {e}", entry.tx_hash);
                    report.failed += 1;
                }
            }
        }
        info!(?report, "reconciliation finished");
        Ok(report)
    }

    async fn reconcile_entry(&self, tx_hash: &TxHash) -> Result<SweepOutcome, SweepError> {
        // re-read under the section, an in-flight operation may have finished it
        let Some(entry) = self.outbox.get(tx_hash).await? else {
            return Ok(SweepOutcome::Skipped);
        };
        match entry.state {
            OutboxState::Submitted => {
                match self
                    .watcher
                    .reader()
                    .escrow()
                    .transaction_receipt(tx_hash)
                    .await?
                {
                    None => return Ok(SweepOutcome::StillPending),
                    Some(receipt) if !receipt.succeeded() => {
                        self.outbox.mark_reverted(tx_hash).await?;
                        info!("{} {tx_hash} reverted", entry.operation.name());
                        return Ok(SweepOutcome::Reverted);
                    }
                    Some(_) => self.outbox.mark_confirmed(tx_hash).await?,
                }
            }
            OutboxState::Confirmed => {}
            _ => return Ok(SweepOutcome::Skipped),
        }

        let recorded = self
            .ledger
            .list_by_user(entry.user_id)
            .await?
            .iter()
            .any(|deal| deal.tx_hash.as_ref() == Some(tx_hash));
        if recorded {
            self.outbox.mark_settled(tx_hash, None).await?;
            debug!("{tx_hash} was already recorded");
            return Ok(SweepOutcome::AlreadyRecorded);
        }

        let record = entry.draft.clone().with_timestamp(Utc::now());
        let record_id = self.ledger.append(&record).await?;
        self.outbox.mark_settled(tx_hash, Some(record_id)).await?;
        info!(
            user_id = %entry.user_id,
            tx_hash = %tx_hash,
            record_id = %record_id,
            "recorded {} after the fact",
            entry.operation.name()
        );
        Ok(SweepOutcome::Appended)
    }
}

use std::sync::Arc;
use std::time::Duration;

use escrow_lending_chain::Wallet;
use escrow_lending_core::{DealRecord, LenderPosition, Receipt, UserId, WalletAddress};
use escrow_lending_ledger::PersistError;
use escrow_lending_watcher::{RefreshHandle, RefreshScheduler};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{AdminRateController, DealOutcome, LenderAccount, PositionReconciler, ReconcileError};

/// One lender's view of the escrow for as long as they are connected.
///
/// Keeps the cached position fresh in the background and routes every action
/// through the reconciler. Dropping the session stops the background refresh;
/// [`LenderSession::end`] also waits for it.
pub struct LenderSession {
    account: LenderAccount,
    is_admin: bool,
    reconciler: PositionReconciler,
    admin: AdminRateController,
    cancel: CancellationToken,
    refresh: Option<RefreshHandle>,
}

impl LenderSession {
    pub async fn start(
        user_id: UserId,
        wallet: Arc<dyn Wallet>,
        reconciler: PositionReconciler,
        admin: AdminRateController,
        refresh_period: Duration,
    ) -> Result<Self, ReconcileError> {
        let account = LenderAccount::resolve(user_id, wallet)
            .await
            .map_err(ReconcileError::Wallet)?;
        let is_admin = admin.is_admin(&account.address);
        info!(
            user_id = %user_id,
            address = %account.address,
            is_admin,
            "starting lender session"
        );

        if let Ok((_, position)) = reconciler
            .watcher()
            .refresh(user_id, &account.address)
            .await
        {
            info!("{position}");
        }

        let cancel = CancellationToken::new();
        let refresh = RefreshScheduler::start(
            reconciler.watcher().clone(),
            user_id,
            account.address.clone(),
            refresh_period,
            cancel.clone(),
        );

        Ok(Self {
            account,
            is_admin,
            reconciler,
            admin,
            cancel,
            refresh: Some(refresh),
        })
    }

    pub fn user_id(&self) -> UserId {
        self.account.user_id
    }

    pub fn address(&self) -> &WalletAddress {
        &self.account.address
    }

    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    pub async fn deposit(&self, amount: u128) -> Result<DealOutcome, ReconcileError> {
        self.reconciler
            .deposit(&self.account, amount, &self.cancel)
            .await
    }

    pub async fn withdraw(&self) -> Result<DealOutcome, ReconcileError> {
        self.reconciler.withdraw(&self.account, &self.cancel).await
    }

    pub async fn change_rate(&self, new_rate_bps: u64) -> Result<Receipt, ReconcileError> {
        let receipt = self
            .admin
            .change_rate(self.account.wallet.as_ref(), new_rate_bps)
            .await?;
        // the rate is part of every cached position; a failed read is
        // logged by the watcher and the scheduler catches up
        self.reconciler
            .watcher()
            .refresh(self.account.user_id, &self.account.address)
            .await
            .ok();
        Ok(receipt)
    }

    /// Deal history, most recent first.
    pub async fn deals(&self) -> Result<Vec<DealRecord>, PersistError> {
        self.reconciler.deals(self.account.user_id).await
    }

    /// Last known position; `None` if no read has succeeded yet.
    pub fn position(&self) -> Option<LenderPosition> {
        self.reconciler.watcher().cached(self.account.user_id)
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<LenderPosition>> {
        self.reconciler.watcher().subscribe(self.account.user_id)
    }

    /// Stops the background refresh and abandons tracking of any in-flight
    /// confirmation; unsettled transactions stay in the outbox.
    pub async fn end(mut self) {
        self.cancel.cancel();
        if let Some(refresh) = self.refresh.take() {
            refresh.stop().await;
        }
        info!("ended lender session for {}", self.account.user_id);
    }
}

impl Drop for LenderSession {
    fn drop(&mut self) {
        if self.refresh.is_some() {
            warn!(
                "lender session for {} dropped without end()",
                self.account.user_id
            );
        }
        self.cancel.cancel();
    }
}

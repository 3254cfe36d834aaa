use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use escrow_lending_chain::{
    memnet::{MemnetEscrow, MemnetWallet},
    RetryPolicy,
};
use escrow_lending_cli::app::{App, AppParams, WalletSource};
use escrow_lending_client::LenderSession;
use escrow_lending_core::UserId;
use escrow_lending_ledger::{FileOutbox, MemoryDealLedger, MemoryOutbox, Outbox};
use tracing::debug;

use crate::{test_utils::address, ADMIN, INITIAL_RATE_BPS};

pub const REFRESH_INTERVAL: Duration = Duration::from_millis(50);
pub const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(2);

/// An in-memory escrow, ledger and outbox that any number of lender apps can
/// be pointed at.
pub struct EscrowHarness {
    pub memnet: MemnetEscrow,
    pub ledger: Arc<MemoryDealLedger>,
    pub outbox: Arc<dyn Outbox>,
    pub confirmation_timeout: Duration,
}

impl Default for EscrowHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl EscrowHarness {
    pub fn new() -> Self {
        Self {
            memnet: MemnetEscrow::new(address(ADMIN), INITIAL_RATE_BPS),
            ledger: Arc::new(MemoryDealLedger::new()),
            outbox: Arc::new(MemoryOutbox::new()),
            confirmation_timeout: CONFIRMATION_TIMEOUT,
        }
    }

    pub async fn with_file_outbox(path: &Path) -> Self {
        Self {
            outbox: Arc::new(FileOutbox::open(path).await.expect("outbox opens")),
            ..Self::new()
        }
    }

    /// Same chain and ledger, outbox reloaded from `path`, as after a restart.
    pub async fn restarted(&self, path: &Path) -> Self {
        Self {
            memnet: self.memnet.clone(),
            ledger: self.ledger.clone(),
            outbox: Arc::new(FileOutbox::open(path).await.expect("outbox reopens")),
            confirmation_timeout: self.confirmation_timeout,
        }
    }

    pub fn app(&self, wallet: MemnetWallet) -> App {
        App::new(AppParams {
            escrow: Arc::new(self.memnet.clone()),
            wallets: WalletSource::Fixed(Arc::new(wallet)),
            ledger: self.ledger.clone(),
            outbox: self.outbox.clone(),
            admin_address: address(ADMIN),
            retry: RetryPolicy::none(),
            confirmation_timeout: self.confirmation_timeout,
            refresh_interval: REFRESH_INTERVAL,
        })
    }

    pub async fn lender(&self, user_id: u64, wallet_address: &str, funds: u128) -> LenderSession {
        debug!("starting lender {user_id} at {wallet_address} with {funds} wei");
        let wallet = self.memnet.wallet(address(wallet_address), funds);
        self.app(wallet)
            .session(UserId::new(user_id), None)
            .await
            .expect("session starts")
    }
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use escrow_lending_chain::{
    ChainStateReader, EscrowContract, JsonRpcClient, JsonRpcEscrow, JsonRpcWallet, RetryPolicy,
    TransactionSubmitter, Wallet,
};
use escrow_lending_client::{AdminRateController, LenderSession, PositionReconciler};
use escrow_lending_core::{
    format_rate_percent, format_wei, DealRecord, LenderPosition, UserId, WalletAddress,
};
use escrow_lending_ledger::{DealLedger, FileOutbox, HttpDealLedger, Outbox};
use escrow_lending_watcher::{PositionCache, PositionWatcher};
use tracing::info;

use crate::config::LenderConfig;

/// Where wallets come from: a JSON-RPC node in production, anything
/// implementing [`Wallet`] in tests.
pub enum WalletSource {
    Node {
        rpc: Arc<JsonRpcClient>,
        escrow: WalletAddress,
        receipt_poll_interval: Duration,
    },
    Fixed(Arc<dyn Wallet>),
}

pub struct AppParams {
    pub escrow: Arc<dyn EscrowContract>,
    pub wallets: WalletSource,
    pub ledger: Arc<dyn DealLedger>,
    pub outbox: Arc<dyn Outbox>,
    pub admin_address: WalletAddress,
    pub retry: RetryPolicy,
    pub confirmation_timeout: Duration,
    pub refresh_interval: Duration,
}

pub struct App {
    wallets: WalletSource,
    reconciler: PositionReconciler,
    admin: AdminRateController,
    refresh_interval: Duration,
}

impl App {
    pub fn new(params: AppParams) -> Self {
        let submitter = TransactionSubmitter::new(params.confirmation_timeout);
        let watcher = PositionWatcher::new(
            ChainStateReader::new(params.escrow, params.retry),
            PositionCache::new(),
        );
        Self {
            wallets: params.wallets,
            reconciler: PositionReconciler::new(
                submitter,
                watcher,
                params.ledger,
                params.outbox,
            ),
            admin: AdminRateController::new(params.admin_address, submitter),
            refresh_interval: params.refresh_interval,
        }
    }

    pub async fn from_config(config: &LenderConfig) -> Result<Self> {
        let rpc = Arc::new(JsonRpcClient::new(config.rpc_url.clone()));
        let escrow = Arc::new(JsonRpcEscrow::new(
            rpc.clone(),
            config.escrow_address.clone(),
        ));
        let ledger = Arc::new(HttpDealLedger::new(config.ledger_url.clone())?);
        let outbox = Arc::new(
            FileOutbox::open(&config.outbox_path)
                .await
                .with_context(|| format!("failed to open outbox {:?}", config.outbox_path))?,
        );
        info!(
            rpc_url = %config.rpc_url,
            escrow = %config.escrow_address,
            ledger_url = %config.ledger_url,
            outbox = %outbox.path().display(),
            "connected"
        );
        Ok(Self::new(AppParams {
            escrow,
            wallets: WalletSource::Node {
                rpc,
                escrow: config.escrow_address.clone(),
                receipt_poll_interval: config.receipt_poll_interval,
            },
            ledger,
            outbox,
            admin_address: config.admin_address.clone(),
            retry: RetryPolicy::default(),
            confirmation_timeout: config.confirmation_timeout,
            refresh_interval: config.refresh_interval,
        }))
    }

    pub fn reconciler(&self) -> &PositionReconciler {
        &self.reconciler
    }

    pub async fn wallet(&self, from: Option<WalletAddress>) -> Result<Arc<dyn Wallet>> {
        Ok(match &self.wallets {
            WalletSource::Node {
                rpc,
                escrow,
                receipt_poll_interval,
            } => Arc::new(
                JsonRpcWallet::connect(rpc.clone(), escrow.clone(), from, *receipt_poll_interval)
                    .await
                    .context("failed to connect to the wallet provider")?,
            ),
            WalletSource::Fixed(wallet) => wallet.clone(),
        })
    }

    pub async fn session(
        &self,
        user_id: UserId,
        from: Option<WalletAddress>,
    ) -> Result<LenderSession> {
        let wallet = self.wallet(from).await?;
        Ok(LenderSession::start(
            user_id,
            wallet,
            self.reconciler.clone(),
            self.admin.clone(),
            self.refresh_interval,
        )
        .await?)
    }
}

pub fn render_position(position: Option<&LenderPosition>) -> String {
    match position {
        Some(p) => format!(
            "Deposit Amount:  {}\nInterest Earned: {}\nInterest Rate:   {}\nTotal Balance:   {}",
            format_wei(p.deposit_amount),
            format_wei(p.interest_earned),
            format_rate_percent(p.interest_rate_bps),
            format_wei(p.total_balance()),
        ),
        None => "position unknown: the chain could not be read".to_string(),
    }
}

/// One row per deal, in the order given.
pub fn render_deals(deals: &[DealRecord]) -> String {
    if deals.is_empty() {
        return "no deals yet".to_string();
    }
    let mut out = format!(
        "{:<10} {:>24} {:>24}  {}",
        "TYPE", "AMOUNT", "INTEREST GAINED", "DATE"
    );
    for deal in deals {
        out.push('\n');
        out.push_str(&format!(
            "{:<10} {:>24} {:>24}  {}",
            deal.kind.to_string(),
            format_wei(deal.amount),
            format_wei(deal.interest_gained),
            deal.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn renders_deals_in_given_order() {
        let user = UserId::new(1);
        let mut first = DealRecord::deposit(user, 1000, None);
        first.timestamp = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut second = DealRecord::withdrawal(
            &LenderPosition {
                user_id: user,
                deposit_amount: 1000,
                interest_earned: 25,
                interest_rate_bps: 500,
            },
            None,
        );
        second.timestamp = Utc.with_ymd_and_hms(2024, 3, 2, 12, 0, 0).unwrap();

        let table = render_deals(&[second, first]);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("withdraw"));
        assert!(lines[1].contains("1025 Wei"));
        assert!(lines[2].contains("2024-03-01 12:00:00 UTC"));
        assert_eq!(render_deals(&[]), "no deals yet");
    }

    #[test]
    fn renders_position() {
        let text = render_position(Some(&LenderPosition {
            user_id: UserId::new(1),
            deposit_amount: 1000,
            interest_earned: 5,
            interest_rate_bps: 525,
        }));
        assert!(text.contains("5.25 %"));
        assert!(text.contains("1005 Wei"));
    }
}

use escrow_lending_chain::{TransactionSubmitter, Wallet};
use escrow_lending_core::{format_rate_percent, Operation, Receipt, WalletAddress};
use tracing::{info, warn};

use crate::ReconcileError;

/// Changes the global lender interest rate on behalf of the administrator.
///
/// The check here only saves a doomed transaction: the contract enforces the
/// same rule on its side.
#[derive(Debug, Clone)]
pub struct AdminRateController {
    admin: WalletAddress,
    submitter: TransactionSubmitter,
}

impl AdminRateController {
    pub fn new(admin: WalletAddress, submitter: TransactionSubmitter) -> Self {
        Self { admin, submitter }
    }

    /// Case-insensitive.
    pub fn is_admin(&self, address: &WalletAddress) -> bool {
        *address == self.admin
    }

    /// `new_rate_bps` is the rate multiplied by 100. No deal is recorded.
    pub async fn change_rate(
        &self,
        wallet: &dyn Wallet,
        new_rate_bps: u64,
    ) -> Result<Receipt, ReconcileError> {
        let caller = wallet.address().await.map_err(ReconcileError::Wallet)?;
        if !self.is_admin(&caller) {
            warn!("{caller} tried to change the interest rate");
            return Err(ReconcileError::Unauthorized { address: caller });
        }
        let receipt = self
            .submitter
            .submit(wallet, Operation::ChangeRate { new_rate_bps })
            .await?;
        info!(
            tx_hash = %receipt.tx_hash,
            "interest rate changed to {}",
            format_rate_percent(new_rate_bps)
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stage;
    use escrow_lending_chain::memnet::MemnetEscrow;

    const ADMIN: &str = "0x00000000000000000000000000000000000000aA";

    fn controller() -> (MemnetEscrow, AdminRateController) {
        let memnet = MemnetEscrow::new(ADMIN.parse().unwrap(), 500);
        let controller =
            AdminRateController::new(ADMIN.parse().unwrap(), TransactionSubmitter::default());
        (memnet, controller)
    }

    #[test_log::test(tokio::test)]
    async fn non_admin_never_reaches_the_chain() {
        let (memnet, controller) = controller();
        let stranger = memnet.wallet(
            "0x1111111111111111111111111111111111111111".parse().unwrap(),
            0,
        );

        let err = controller.change_rate(&stranger, 900).await.unwrap_err();
        assert!(matches!(err, ReconcileError::Unauthorized { .. }));
        assert_eq!(err.stage(), Stage::Rejected);
        assert!(memnet.sent_operations().is_empty());
        assert_eq!(memnet.interest_rate(), 500);
    }

    #[test_log::test(tokio::test)]
    async fn admin_match_ignores_case() {
        let (memnet, controller) = controller();
        let admin = memnet.wallet(
            "0x00000000000000000000000000000000000000AA".parse().unwrap(),
            0,
        );
        assert!(controller.is_admin(&"0x00000000000000000000000000000000000000aa".parse().unwrap()));

        let receipt = controller.change_rate(&admin, 725).await.unwrap();
        assert!(receipt.success);
        assert_eq!(memnet.interest_rate(), 725);
    }
}

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use escrow_lending_chain::{ChainError, Wallet};
use escrow_lending_core::{UserId, WalletAddress};
use tokio::sync::OwnedMutexGuard;

/// An application user together with the wallet acting for them.
#[derive(Clone)]
pub struct LenderAccount {
    pub user_id: UserId,
    pub address: WalletAddress,
    pub wallet: Arc<dyn Wallet>,
}

impl LenderAccount {
    pub async fn resolve(user_id: UserId, wallet: Arc<dyn Wallet>) -> Result<Self, ChainError> {
        let address = wallet.address().await?;
        Ok(Self {
            user_id,
            address,
            wallet,
        })
    }
}

impl fmt::Debug for LenderAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LenderAccount")
            .field("user_id", &self.user_id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// One exclusive section per user. Different users never contend.
#[derive(Clone, Default)]
pub struct UserLocks {
    locks: Arc<Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl UserLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, user_id: UserId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(user_id)
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn sections_are_per_user() {
        let locks = UserLocks::new();
        let _alice = locks.lock(UserId::new(1)).await;

        // another user is not blocked
        tokio::time::timeout(Duration::from_secs(1), locks.lock(UserId::new(2)))
            .await
            .unwrap();

        // the same user is
        assert!(
            tokio::time::timeout(Duration::from_millis(20), locks.lock(UserId::new(1)))
                .await
                .is_err()
        );
    }
}

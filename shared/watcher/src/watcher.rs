use escrow_lending_chain::{ChainReadError, ChainStateReader};
use escrow_lending_core::{LenderPosition, UserId, WalletAddress};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::PositionCache;

/// Reads positions from chain into the shared cache.
#[derive(Clone)]
pub struct PositionWatcher {
    reader: ChainStateReader,
    cache: PositionCache,
}

impl PositionWatcher {
    pub fn new(reader: ChainStateReader, cache: PositionCache) -> Self {
        Self { reader, cache }
    }

    pub fn reader(&self) -> &ChainStateReader {
        &self.reader
    }

    pub fn cached(&self, user_id: UserId) -> Option<LenderPosition> {
        self.cache.get(user_id)
    }

    pub fn subscribe(&self, user_id: UserId) -> watch::Receiver<Option<LenderPosition>> {
        self.cache.subscribe(user_id)
    }

    /// Overwrites the cached snapshot with a position known without reading
    /// the chain, such as the empty position after a settled withdrawal.
    pub fn assume(&self, position: LenderPosition) -> Option<LenderPosition> {
        debug!(user_id = %position.user_id, position = %position, "position_assumed");
        self.cache.replace(position)
    }

    /// Re-reads `address` and replaces the cached snapshot, returning the
    /// previous and the new position. On failure the cache is left alone.
    pub async fn refresh(
        &self,
        user_id: UserId,
        address: &WalletAddress,
    ) -> Result<(Option<LenderPosition>, LenderPosition), ChainReadError> {
        let position = self
            .reader
            .read_position(user_id, address)
            .await
            .inspect_err(|e| warn!("keeping last known position of {user_id}: {e}"))?;
        let prev = self.cache.replace(position);
        if prev != Some(position) {
            debug!(
                user_id = %user_id,
                old_position = prev.map(|p| p.to_string()).unwrap_or_else(|| String::from(" - ")),
                new_position = %position,
                "position_changed"
            );
        }
        Ok((prev, position))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_lending_chain::{memnet::MemnetEscrow, ChainError, RetryPolicy};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    const LENDER: &str = "0x1111111111111111111111111111111111111111";
    const ADMIN: &str = "0x00000000000000000000000000000000000000aa";

    #[test_log::test(tokio::test)]
    async fn failed_refresh_keeps_last_snapshot() {
        let memnet = MemnetEscrow::new(ADMIN.parse().unwrap(), 500);
        let lender: WalletAddress = LENDER.parse().unwrap();
        let user = UserId::new(3);
        memnet.set_position(&lender, 1000, 20);

        let watcher = PositionWatcher::new(
            ChainStateReader::new(Arc::new(memnet.clone()), RetryPolicy::none()),
            PositionCache::new(),
        );
        let (prev, current) = watcher.refresh(user, &lender).await.unwrap();
        assert_eq!(prev, None);
        assert_eq!(current.total_balance(), 1020);

        memnet.set_position(&lender, 0, 0);
        memnet.fail_reads(Some(ChainError::Transport("connection reset".into())));
        assert!(watcher.refresh(user, &lender).await.is_err());
        assert_eq!(watcher.cached(user), Some(current));

        memnet.fail_reads(None);
        let (prev, current) = watcher.refresh(user, &lender).await.unwrap();
        assert_eq!(prev.map(|p| p.deposit_amount), Some(1000));
        assert!(current.is_empty());
    }
}

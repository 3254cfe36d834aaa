use std::time::Duration;

use escrow_lending_core::{UserId, WalletAddress};
use tokio::{
    select,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::PositionWatcher;

pub const DEFAULT_REFRESH_PERIOD: Duration = Duration::from_secs(10);

/// Periodic re-read of one lender's position, so that changes made outside
/// this process (interest accrual, other clients) reach the cache.
pub struct RefreshScheduler;

impl RefreshScheduler {
    /// The first read happens immediately. Cancelling `cancel` stops the task
    /// as well, but only [`RefreshHandle::stop`] waits for it to finish.
    pub fn start(
        watcher: PositionWatcher,
        user_id: UserId,
        address: WalletAddress,
        period: Duration,
        cancel: CancellationToken,
    ) -> RefreshHandle {
        let cancel = cancel.child_token();
        let join = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                info!("refreshing position of {user_id} every {period:?}");
                loop {
                    select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    trace!("refresh tick for {user_id}");
                    select! {
                        _ = cancel.cancelled() => break,
                        // failures are logged by the watcher and the last snapshot stays
                        _ = watcher.refresh(user_id, &address) => {}
                    }
                }
                debug!("stopped refreshing position of {user_id}");
            }
        });
        RefreshHandle { cancel, join }
    }
}

pub struct RefreshHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

impl RefreshHandle {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancels the refresh task and waits until it has exited.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            error!("refresh task ended abnormally: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PositionCache;
    use escrow_lending_chain::{memnet::MemnetEscrow, ChainStateReader, RetryPolicy};
    use std::sync::Arc;

    const LENDER: &str = "0x1111111111111111111111111111111111111111";
    const ADMIN: &str = "0x00000000000000000000000000000000000000aa";

    fn setup() -> (MemnetEscrow, PositionWatcher, WalletAddress) {
        let memnet = MemnetEscrow::new(ADMIN.parse().unwrap(), 500);
        let watcher = PositionWatcher::new(
            ChainStateReader::new(Arc::new(memnet.clone()), RetryPolicy::none()),
            PositionCache::new(),
        );
        (memnet, watcher, LENDER.parse().unwrap())
    }

    #[test_log::test(tokio::test)]
    async fn first_refresh_is_immediate() {
        let (memnet, watcher, lender) = setup();
        memnet.set_position(&lender, 700, 0);
        let user = UserId::new(1);
        let mut rx = watcher.subscribe(user);

        let handle = RefreshScheduler::start(
            watcher.clone(),
            user,
            lender,
            Duration::from_secs(3600),
            CancellationToken::new(),
        );
        let position = *tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|p| p.is_some()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(position.map(|p| p.deposit_amount), Some(700));
        handle.stop().await;
    }

    #[test_log::test(tokio::test)]
    async fn picks_up_external_accrual() {
        let (memnet, watcher, lender) = setup();
        memnet.set_position(&lender, 1000, 0);
        let user = UserId::new(1);
        let mut rx = watcher.subscribe(user);

        let handle = RefreshScheduler::start(
            watcher.clone(),
            user,
            lender.clone(),
            Duration::from_millis(10),
            CancellationToken::new(),
        );
        memnet.accrue_interest(&lender, 50);
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|p| p.is_some_and(|p| p.interest_earned == 50)),
        )
        .await
        .unwrap()
        .unwrap();
        handle.stop().await;
    }

    #[test_log::test(tokio::test)]
    async fn stop_leaves_no_running_task() {
        let (memnet, watcher, lender) = setup();
        let user = UserId::new(1);
        memnet.set_position(&lender, 1000, 0);

        let handle = RefreshScheduler::start(
            watcher.clone(),
            user,
            lender.clone(),
            Duration::from_millis(10),
            CancellationToken::new(),
        );
        let mut rx = watcher.subscribe(user);
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|p| p.is_some()))
            .await
            .unwrap()
            .unwrap();
        handle.stop().await;

        memnet.set_position(&lender, 5, 0);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(watcher.cached(user).map(|p| p.deposit_amount), Some(1000));
    }

    #[test_log::test(tokio::test)]
    async fn parent_cancellation_stops_the_task() {
        let (_memnet, watcher, lender) = setup();
        let parent = CancellationToken::new();
        let handle = RefreshScheduler::start(
            watcher,
            UserId::new(1),
            lender,
            Duration::from_millis(10),
            parent.clone(),
        );
        parent.cancel();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !handle.is_finished() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}

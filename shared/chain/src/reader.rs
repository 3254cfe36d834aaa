use std::future::Future;
use std::sync::Arc;

use escrow_lending_core::{parse_quantity, LenderPosition, QuantityError, UserId, WalletAddress};
use tracing::trace;

use crate::{retry_function, ChainError, ChainReadError, EscrowContract, RetryError, RetryPolicy};

/// Reads a lender's position from the escrow contract.
///
/// The three accessors are queried one after another and are not a consistent
/// snapshot: the rate or balance may change between reads. Nothing here checks
/// them against each other.
#[derive(Clone)]
pub struct ChainStateReader {
    escrow: Arc<dyn EscrowContract>,
    retry: RetryPolicy,
}

impl ChainStateReader {
    pub fn new(escrow: Arc<dyn EscrowContract>, retry: RetryPolicy) -> Self {
        Self { escrow, retry }
    }

    pub fn escrow(&self) -> &Arc<dyn EscrowContract> {
        &self.escrow
    }

    pub async fn read_position(
        &self,
        user_id: UserId,
        address: &WalletAddress,
    ) -> Result<LenderPosition, ChainReadError> {
        let deposit_amount = self
            .read_quantity("lenders", || self.escrow.lender_amount(address))
            .await?;
        let interest_earned = self
            .read_quantity("totalInterestGained", || {
                self.escrow.total_interest_gained(address)
            })
            .await?;
        let rate = self
            .read_quantity("interestRate", || self.escrow.interest_rate())
            .await?;
        let interest_rate_bps = u64::try_from(rate).map_err(|_| ChainReadError::Parse {
            accessor: "interestRate",
            raw: rate.to_string(),
            source: QuantityError::Overflow(rate.to_string()),
        })?;

        let position = LenderPosition {
            user_id,
            deposit_amount,
            interest_earned,
            interest_rate_bps,
        };
        trace!("read position {position}");
        Ok(position)
    }

    async fn read_quantity<F, Fut>(
        &self,
        accessor: &'static str,
        mut read: F,
    ) -> Result<u128, ChainReadError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<String, ChainError>>,
    {
        let raw = retry_function(accessor, self.retry, || {
            let fut = read();
            async move { fut.await.map_err(RetryError::from) }
        })
        .await
        .map_err(|e| ChainReadError::from_chain(accessor, e.into_inner()))?;

        parse_quantity(&raw).map_err(|source| ChainReadError::Parse {
            accessor,
            raw,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memnet::MemnetEscrow;
    use pretty_assertions::assert_eq;

    const LENDER: &str = "0x1111111111111111111111111111111111111111";
    const ADMIN: &str = "0x00000000000000000000000000000000000000aa";

    fn setup() -> (MemnetEscrow, ChainStateReader, WalletAddress) {
        let memnet = MemnetEscrow::new(ADMIN.parse().unwrap(), 500);
        let reader = ChainStateReader::new(Arc::new(memnet.clone()), RetryPolicy::none());
        (memnet, reader, LENDER.parse().unwrap())
    }

    #[tokio::test]
    async fn reads_all_three_accessors() {
        let (memnet, reader, lender) = setup();
        memnet.set_position(&lender, 1000, 25);

        let position = reader.read_position(UserId::new(1), &lender).await.unwrap();
        assert_eq!(
            position,
            LenderPosition {
                user_id: UserId::new(1),
                deposit_amount: 1000,
                interest_earned: 25,
                interest_rate_bps: 500,
            }
        );
    }

    #[tokio::test]
    async fn unknown_lender_reads_as_empty() {
        let (_memnet, reader, lender) = setup();
        let position = reader.read_position(UserId::new(1), &lender).await.unwrap();
        assert!(position.is_empty());
    }

    #[tokio::test]
    async fn malformed_values_are_parse_errors() {
        let (memnet, reader, lender) = setup();
        memnet.corrupt_interest_rate(Some("-12".to_string()));

        let err = reader
            .read_position(UserId::new(1), &lender)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChainReadError::Parse {
                accessor: "interestRate",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn provider_outage_is_unavailable() {
        let (memnet, reader, lender) = setup();
        memnet.fail_reads(Some(ChainError::Unavailable("no injected provider".into())));

        let err = reader
            .read_position(UserId::new(1), &lender)
            .await
            .unwrap_err();
        assert!(matches!(err, ChainReadError::Unavailable { .. }));
    }
}

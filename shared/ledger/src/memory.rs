use std::sync::{Mutex, MutexGuard};

use escrow_lending_core::{DealRecord, RecordId, UserId};

use crate::{DealLedger, PersistError};

#[derive(Default)]
struct MemoryLedgerState {
    records: Vec<(RecordId, DealRecord)>,
    next_id: u64,
    append_failures: usize,
}

/// Process-local ledger. Used by tests and dry runs.
#[derive(Default)]
pub struct MemoryDealLedger {
    state: Mutex<MemoryLedgerState>,
}

impl MemoryDealLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryLedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The next `n` appends fail without storing anything.
    pub fn fail_next_appends(&self, n: usize) {
        self.state().append_failures = n;
    }

    pub fn len(&self) -> usize {
        self.state().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl DealLedger for MemoryDealLedger {
    async fn append(&self, record: &DealRecord) -> Result<RecordId, PersistError> {
        let mut state = self.state();
        if state.append_failures > 0 {
            state.append_failures -= 1;
            return Err(PersistError::Unavailable(
                "simulated ledger outage".to_string(),
            ));
        }
        state.next_id += 1;
        let id = RecordId::new(state.next_id);
        state.records.push((id, record.clone()));
        Ok(id)
    }

    async fn list_by_user(&self, user_id: UserId) -> Result<Vec<DealRecord>, PersistError> {
        Ok(self
            .state()
            .records
            .iter()
            .rev()
            .filter(|(_, record)| record.user_id == user_id)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use escrow_lending_core::DealKind;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn lists_most_recent_first_per_user() {
        let ledger = MemoryDealLedger::new();
        let alice = UserId::new(1);
        let bob = UserId::new(2);

        for amount in [10, 20, 30] {
            ledger
                .append(&DealRecord::deposit(alice, amount, None))
                .await
                .unwrap();
        }
        ledger
            .append(&DealRecord::deposit(bob, 99, None))
            .await
            .unwrap();

        let amounts: Vec<u128> = ledger
            .list_by_user(alice)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.amount)
            .collect();
        assert_eq!(amounts, vec![30, 20, 10]);

        let bobs = ledger.list_by_user(bob).await.unwrap();
        assert_eq!(bobs.len(), 1);
        assert_eq!(bobs[0].kind, DealKind::Deposit);
    }

    #[tokio::test]
    async fn failed_appends_store_nothing() {
        let ledger = MemoryDealLedger::new();
        ledger.fail_next_appends(1);
        let record = DealRecord::deposit(UserId::new(1), 5, None);

        assert!(ledger.append(&record).await.is_err());
        assert!(ledger.is_empty());
        assert!(ledger.append(&record).await.is_ok());
        assert_eq!(ledger.len(), 1);
    }
}

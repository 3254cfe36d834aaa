use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    serde_utils::{serde_deserialize_wei, serde_serialize_wei},
    LenderPosition, TxHash, UserId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DealKind {
    Deposit,
    Withdraw,
}

impl fmt::Display for DealKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DealKind::Deposit => write!(f, "deposit"),
            DealKind::Withdraw => write!(f, "withdraw"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(u64);

impl RecordId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

/// A settled deposit or withdrawal, as stored in the deal ledger.
///
/// Field names on the wire follow the ledger storage API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealRecord {
    #[serde(rename = "type")]
    pub kind: DealKind,
    #[serde(
        serialize_with = "serde_serialize_wei",
        deserialize_with = "serde_deserialize_wei"
    )]
    pub amount: u128,
    #[serde(
        rename = "interestGained",
        serialize_with = "serde_serialize_wei",
        deserialize_with = "serde_deserialize_wei"
    )]
    pub interest_gained: u128,
    #[serde(rename = "dateTime")]
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "userId")]
    pub user_id: UserId,
    #[serde(rename = "txHash", default, skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<TxHash>,
}

impl DealRecord {
    pub fn deposit(user_id: UserId, amount: u128, tx_hash: Option<TxHash>) -> Self {
        Self {
            kind: DealKind::Deposit,
            amount,
            interest_gained: 0,
            timestamp: Utc::now(),
            user_id,
            tx_hash,
        }
    }

    /// The contract only supports full withdrawal, so the record carries the
    /// whole pre-withdrawal balance.
    pub fn withdrawal(before: &LenderPosition, tx_hash: Option<TxHash>) -> Self {
        Self {
            kind: DealKind::Withdraw,
            amount: before.total_balance(),
            interest_gained: before.interest_earned,
            timestamp: Utc::now(),
            user_id: before.user_id,
            tx_hash,
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: TxHash) -> Self {
        self.tx_hash = Some(tx_hash);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn withdrawal_carries_principal_and_interest() {
        let before = LenderPosition {
            user_id: UserId::new(3),
            deposit_amount: 1000,
            interest_earned: 37,
            interest_rate_bps: 500,
        };
        let record = DealRecord::withdrawal(&before, None);
        assert_eq!(record.kind, DealKind::Withdraw);
        assert_eq!(record.amount, 1037);
        assert_eq!(record.interest_gained, 37);
    }

    #[test]
    fn serializes_with_ledger_field_names() {
        let record = DealRecord::deposit(UserId::new(9), 1000, None);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["type"], "deposit");
        assert_eq!(json["amount"], "1000");
        assert_eq!(json["interestGained"], "0");
        assert_eq!(json["userId"], 9);
        assert!(json.get("txHash").is_none());
        assert!(json["dateTime"].as_str().is_some());

        let back: DealRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}

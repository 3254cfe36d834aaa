use serde::{Deserialize, Serialize};

use crate::{
    serde_utils::{serde_deserialize_wei, serde_serialize_wei},
    TxHash,
};

/// Something we can ask the escrow contract to do on a lender's behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Operation {
    Deposit {
        #[serde(
            serialize_with = "serde_serialize_wei",
            deserialize_with = "serde_deserialize_wei"
        )]
        amount: u128,
    },
    Withdraw,
    ChangeRate { new_rate_bps: u64 },
}

impl Operation {
    /// Native value attached to the transaction.
    pub fn value(&self) -> u128 {
        match self {
            Operation::Deposit { amount } => *amount,
            Operation::Withdraw | Operation::ChangeRate { .. } => 0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Deposit { .. } => "deposit",
            Operation::Withdraw => "withdraw",
            Operation::ChangeRate { .. } => "change-rate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub success: bool,
    pub tx_hash: TxHash,
}

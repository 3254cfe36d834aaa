use serde::{Deserialize, Serialize};

use crate::{format_rate_percent, format_wei, UserId};

/// A lender's view of the escrow, as last read from chain.
///
/// The chain owns this state. The application only ever holds snapshots and
/// replaces them wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LenderPosition {
    pub user_id: UserId,
    pub deposit_amount: u128,
    pub interest_earned: u128,
    /// Global rate, multiplied by 100.
    pub interest_rate_bps: u64,
}

impl LenderPosition {
    pub fn empty(user_id: UserId) -> Self {
        Self {
            user_id,
            deposit_amount: 0,
            interest_earned: 0,
            interest_rate_bps: 0,
        }
    }

    /// What a full withdrawal would pay out right now.
    pub fn total_balance(&self) -> u128 {
        self.deposit_amount.saturating_add(self.interest_earned)
    }

    pub fn is_empty(&self) -> bool {
        self.total_balance() == 0
    }
}

impl std::fmt::Display for LenderPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: deposit {}, interest earned {}, interest rate {}",
            self.user_id,
            format_wei(self.deposit_amount),
            format_wei(self.interest_earned),
            format_rate_percent(self.interest_rate_bps)
        )
    }
}

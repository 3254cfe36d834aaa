mod deal;
mod identity;
mod operation;
mod position;
mod quantity;
pub mod serde_utils;

pub use deal::{DealKind, DealRecord, RecordId};
pub use identity::{IdentityParseError, TxHash, UserId, WalletAddress};
pub use operation::{Operation, Receipt};
pub use position::LenderPosition;
pub use quantity::{format_rate_percent, format_wei, parse_quantity, QuantityError};

/// Receipt status reported by the chain for a successfully executed transaction.
pub const RECEIPT_STATUS_SUCCESS: u64 = 1;

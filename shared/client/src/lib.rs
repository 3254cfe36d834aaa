mod account;
mod admin;
mod error;
mod reconciler;
mod session;

pub use account::{LenderAccount, UserLocks};
pub use admin::AdminRateController;
pub use error::{ReconcileError, Stage};
pub use reconciler::{DealOutcome, PositionReconciler, ReconcileReport};
pub use session::LenderSession;

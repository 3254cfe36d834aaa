mod http;
mod memory;
mod outbox;
mod traits;

pub use http::HttpDealLedger;
pub use memory::MemoryDealLedger;
pub use outbox::{FileOutbox, MemoryOutbox, Outbox, OutboxEntry, OutboxError, OutboxState};
pub use traits::{DealLedger, PersistError};

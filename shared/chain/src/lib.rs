mod abi;
mod error;
pub mod memnet;
mod reader;
mod retry;
mod rpc;
mod submitter;
mod traits;

pub use error::{ChainError, ChainReadError, SubmissionError};
pub use reader::ChainStateReader;
pub use retry::{retry_function, RetryError, RetryPolicy};
pub use rpc::{JsonRpcClient, JsonRpcEscrow, JsonRpcWallet};
pub use submitter::{PendingTransaction, TransactionSubmitter};
pub use traits::{EscrowContract, TxReceipt, Wallet};

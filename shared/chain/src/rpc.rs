use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use escrow_lending_core::{parse_quantity, Operation, TxHash, WalletAddress};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info, trace};

use crate::{abi, ChainError, EscrowContract, TxReceipt, Wallet};

// EIP-1193 "user rejected request"
const USER_REJECTED: i64 = 4001;

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    status: Option<String>,
}

impl TryFrom<RawReceipt> for TxReceipt {
    type Error = ChainError;

    fn try_from(raw: RawReceipt) -> Result<Self, Self::Error> {
        let tx_hash: TxHash = raw
            .transaction_hash
            .parse()
            .map_err(|e| ChainError::Malformed(format!("{e}")))?;
        let status = raw
            .status
            .as_deref()
            .ok_or_else(|| ChainError::Malformed(format!("receipt for {tx_hash} has no status")))
            .and_then(|s| {
                parse_quantity(s).map_err(|e| ChainError::Malformed(format!("receipt status: {e}")))
            })?;
        Ok(TxReceipt {
            tx_hash,
            status: u64::try_from(status)
                .map_err(|_| ChainError::Malformed(format!("receipt status {status} too large")))?,
        })
    }
}

/// Minimal JSON-RPC 2.0 client for an Ethereum-compatible node.
pub struct JsonRpcClient {
    http: reqwest::Client,
    url: reqwest::Url,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: reqwest::Url) -> Self {
        Self {
            http: reqwest::Client::new(),
            url,
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, ChainError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        trace!("rpc #{id} {method} {params}");

        let response = self
            .http
            .post(self.url.clone())
            .json(&json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": method,
                "params": params,
            }))
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ChainError::Unavailable(format!("cannot reach {}: {e}", self.url))
                } else {
                    ChainError::Transport(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ChainError::Transport(format!(
                "{method} returned HTTP {}",
                response.status()
            )));
        }

        let body: RpcResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Malformed(format!("{method}: {e}")))?;
        if let Some(err) = body.error {
            return Err(match err.code {
                USER_REJECTED => ChainError::Rejected(err.message),
                _ if err.message.contains("insufficient funds") => {
                    ChainError::Rejected(err.message)
                }
                code => ChainError::Rpc {
                    code,
                    message: err.message,
                },
            });
        }
        serde_json::from_value(body.result)
            .map_err(|e| ChainError::Malformed(format!("{method} result: {e}")))
    }

    async fn receipt(&self, tx: &TxHash) -> Result<Option<TxReceipt>, ChainError> {
        let raw: Option<RawReceipt> = self
            .request("eth_getTransactionReceipt", json!([tx.as_str()]))
            .await?;
        raw.map(TxReceipt::try_from).transpose()
    }

    async fn call(&self, to: &WalletAddress, data: String) -> Result<String, ChainError> {
        let raw: String = self
            .request(
                "eth_call",
                json!([{ "to": to.as_str(), "data": data }, "latest"]),
            )
            .await?;
        abi::first_word(&raw)
    }
}

/// A node-managed account: the node signs via `eth_sendTransaction`, so no key
/// material passes through this process.
pub struct JsonRpcWallet {
    rpc: Arc<JsonRpcClient>,
    escrow: WalletAddress,
    from: WalletAddress,
    receipt_poll_interval: Duration,
}

impl JsonRpcWallet {
    /// Picks `from` among the node's accounts, or the first account if `None`.
    pub async fn connect(
        rpc: Arc<JsonRpcClient>,
        escrow: WalletAddress,
        from: Option<WalletAddress>,
        receipt_poll_interval: Duration,
    ) -> Result<Self, ChainError> {
        let accounts: Vec<WalletAddress> = rpc.request("eth_accounts", json!([])).await?;
        let from = match from {
            Some(from) if accounts.contains(&from) => from,
            Some(from) => {
                return Err(ChainError::Unavailable(format!(
                    "account {from} is not managed by the connected node"
                )))
            }
            None => accounts.into_iter().next().ok_or_else(|| {
                ChainError::Unavailable("the connected node exposes no accounts".to_string())
            })?,
        };
        info!("using wallet account {from}");
        Ok(Self {
            rpc,
            escrow,
            from,
            receipt_poll_interval,
        })
    }
}

#[async_trait::async_trait]
impl Wallet for JsonRpcWallet {
    async fn address(&self) -> Result<WalletAddress, ChainError> {
        Ok(self.from.clone())
    }

    async fn send_transaction(&self, operation: Operation) -> Result<TxHash, ChainError> {
        let hash: String = self
            .rpc
            .request(
                "eth_sendTransaction",
                json!([{
                    "from": self.from.as_str(),
                    "to": self.escrow.as_str(),
                    "data": abi::operation_calldata(&operation),
                    "value": abi::hex_quantity(operation.value()),
                }]),
            )
            .await?;
        hash.parse()
            .map_err(|e| ChainError::Malformed(format!("{e}")))
    }

    async fn wait_for_receipt(&self, tx: &TxHash) -> Result<TxReceipt, ChainError> {
        loop {
            if let Some(receipt) = self.rpc.receipt(tx).await? {
                return Ok(receipt);
            }
            trace!("no receipt yet for {tx}");
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}

/// Reads from the escrow's lender contract, whose address is looked up once
/// through `lenderContract()`.
pub struct JsonRpcEscrow {
    rpc: Arc<JsonRpcClient>,
    escrow: WalletAddress,
    lender_contract: OnceCell<WalletAddress>,
}

impl JsonRpcEscrow {
    pub fn new(rpc: Arc<JsonRpcClient>, escrow: WalletAddress) -> Self {
        Self {
            rpc,
            escrow,
            lender_contract: OnceCell::new(),
        }
    }

    async fn lender_contract(&self) -> Result<&WalletAddress, ChainError> {
        self.lender_contract
            .get_or_try_init(|| async {
                let word = self
                    .rpc
                    .call(&self.escrow, abi::call_without_args(abi::LENDER_CONTRACT))
                    .await?;
                let address = abi::address_from_word(&word)?;
                debug!("escrow {} uses lender contract {address}", self.escrow);
                Ok::<_, ChainError>(address)
            })
            .await
    }
}

#[async_trait::async_trait]
impl EscrowContract for JsonRpcEscrow {
    async fn lender_amount(&self, lender: &WalletAddress) -> Result<String, ChainError> {
        let contract = self.lender_contract().await?;
        self.rpc
            .call(contract, abi::call_with_address(abi::LENDERS, lender))
            .await
    }

    async fn total_interest_gained(&self, lender: &WalletAddress) -> Result<String, ChainError> {
        let contract = self.lender_contract().await?;
        self.rpc
            .call(
                contract,
                abi::call_with_address(abi::TOTAL_INTEREST_GAINED, lender),
            )
            .await
    }

    async fn interest_rate(&self) -> Result<String, ChainError> {
        let contract = self.lender_contract().await?;
        self.rpc
            .call(contract, abi::call_without_args(abi::INTEREST_RATE))
            .await
    }

    async fn transaction_receipt(&self, tx: &TxHash) -> Result<Option<TxReceipt>, ChainError> {
        self.rpc.receipt(tx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_raw_receipts() {
        let raw: RawReceipt = serde_json::from_value(json!({
            "transactionHash": format!("0x{}", "cd".repeat(32)),
            "status": "0x1",
            "blockNumber": "0x10",
        }))
        .unwrap();
        let receipt = TxReceipt::try_from(raw).unwrap();
        assert!(receipt.succeeded());

        let raw: RawReceipt = serde_json::from_value(json!({
            "transactionHash": format!("0x{}", "cd".repeat(32)),
        }))
        .unwrap();
        assert!(matches!(
            TxReceipt::try_from(raw),
            Err(ChainError::Malformed(_))
        ));
    }

    #[test]
    fn null_result_decodes_as_none() {
        let body: RpcResponse = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": null,
        }))
        .unwrap();
        let receipt: Option<RawReceipt> = serde_json::from_value(body.result).unwrap();
        assert!(receipt.is_none());
    }
}

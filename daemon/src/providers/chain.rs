use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use primitive_types::U256;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use super::ProviderError;

/// A transaction as fetched from the chain provider.
#[derive(Debug, Clone)]
pub struct ChainTransaction {
    pub hash: String,
    pub from: String,
    pub to: Option<String>,
    pub value: U256,
}

/// Execution receipt of a mined transaction. A transaction without a
/// receipt exists in the mempool but is not yet confirmed.
#[derive(Debug, Clone)]
pub struct TransactionReceipt {
    pub tx_hash: String,
    pub success: bool,
}

/// Chain RPC provider: transaction and receipt lookup by hash.
#[async_trait]
pub trait ChainProvider: Send + Sync {
    async fn get_transaction(
        &self,
        tx_hash: &str,
    ) -> Result<Option<ChainTransaction>, ProviderError>;

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionReceipt>, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct RawTransaction {
    hash: String,
    from: String,
    #[serde(default)]
    to: Option<String>,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

fn parse_quantity(value: &str) -> Result<U256, ProviderError> {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    U256::from_str_radix(trimmed, 16)
        .map_err(|_| ProviderError::Malformed(format!("invalid quantity: {}", value)))
}

/// JSON-RPC chain provider speaking the standard `eth_*` namespace.
pub struct HttpChainProvider {
    http: Client,
    url: String,
    next_id: AtomicU64,
}

impl HttpChainProvider {
    pub fn new(url: String) -> Self {
        Self {
            http: Client::new(),
            url,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Option<Value>, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": id,
        });

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;

        if let Some(error) = envelope.error {
            return Err(ProviderError::Request(error.to_string()));
        }
        match envelope.result {
            Some(Value::Null) | None => Ok(None),
            Some(result) => Ok(Some(result)),
        }
    }
}

#[async_trait]
impl ChainProvider for HttpChainProvider {
    async fn get_transaction(
        &self,
        tx_hash: &str,
    ) -> Result<Option<ChainTransaction>, ProviderError> {
        let Some(result) = self
            .call("eth_getTransactionByHash", json!([tx_hash]))
            .await?
        else {
            return Ok(None);
        };
        let raw: RawTransaction = serde_json::from_value(result)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        Ok(Some(ChainTransaction {
            value: parse_quantity(&raw.value)?,
            hash: raw.hash,
            from: raw.from,
            to: raw.to,
        }))
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionReceipt>, ProviderError> {
        let Some(result) = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?
        else {
            return Ok(None);
        };
        let raw: RawReceipt = serde_json::from_value(result)
            .map_err(|e| ProviderError::Malformed(e.to_string()))?;
        let success = match raw.status.as_deref() {
            Some(status) => !parse_quantity(status)?.is_zero(),
            // Pre-Byzantium receipts carry no status; treat them as failed
            // rather than trusting an unverifiable execution
            None => false,
        };
        Ok(Some(TransactionReceipt {
            tx_hash: raw.transaction_hash,
            success,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity_handles_prefixes() {
        assert_eq!(parse_quantity("0x1").expect("valid"), U256::from(1));
        assert_eq!(parse_quantity("ff").expect("valid"), U256::from(255));
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_raw_receipt_status_decoding() {
        let raw: RawReceipt = serde_json::from_value(json!({
            "transactionHash": "0xabc",
            "status": "0x0",
        }))
        .expect("valid receipt");
        assert!(parse_quantity(raw.status.as_deref().expect("status")).expect("valid").is_zero());
    }
}

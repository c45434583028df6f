// JSON-RPC transport layer implementation
// Per-chain Ethereum JSON-RPC clients: read-only calls, gas-estimation
// simulations (with revert payload extraction), transaction submission and
// signing requests. Endpoint resolution is registry defaults plus caller
// overrides keyed by chain id.

use std::collections::HashMap;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use reqwest::Client;
use serde_json::{json, Value};
use url::Url;

use crate::config::{AppConfig, ChainId, CHAINS};
use crate::errors::{RouteError, TransportError};
use crate::metrics::{REQ_ERRORS, REQ_LATENCY};

const SERVICE: &str = "jsonrpc";

/// Resolves a chain id to a connected [`EthRpc`] client.
#[derive(Debug, Clone)]
pub struct RpcRegistry {
    endpoints: HashMap<ChainId, Url>,
    http: Client,
}

impl Default for RpcRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcRegistry {
    pub fn new() -> Self {
        let endpoints = CHAINS
            .iter()
            .filter_map(|c| Url::parse(c.rpc_url).ok().map(|u| (c.chain_id, u)))
            .collect();
        Self { endpoints, http: Client::new() }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        let mut registry = Self::new();
        if let Some(timeout) = cfg.http_timeout_ms {
            registry.http = Client::builder()
                .timeout(Duration::from_millis(timeout))
                .build()
                .unwrap_or_else(|_| Client::new());
        }
        for (chain, url) in AppConfig::parsed_overrides(&cfg.rpc_endpoints) {
            registry.endpoints.insert(chain, url);
        }
        registry
    }

    pub fn with_endpoint(mut self, chain: ChainId, url: Url) -> Self {
        self.endpoints.insert(chain, url);
        self
    }

    pub fn client(&self, chain: ChainId) -> Result<EthRpc, RouteError> {
        let url = self
            .endpoints
            .get(&chain)
            .ok_or(RouteError::UnsupportedChain(chain))?;
        Ok(EthRpc { http: self.http.clone(), url: url.clone() })
    }
}

#[derive(Debug, Clone)]
pub struct EthRpc {
    http: Client,
    url: Url,
}

impl EthRpc {
    pub fn endpoint(&self) -> &str {
        self.url.as_str()
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let timer = REQ_LATENCY.with_label_values(&[SERVICE, method]).start_timer();
        let payload = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let result = self.request_inner(&payload).await;
        timer.observe_duration();
        if result.is_err() {
            REQ_ERRORS.with_label_values(&[SERVICE, method]).inc();
        }
        result
    }

    async fn request_inner(&self, payload: &Value) -> Result<Value, TransportError> {
        let resp = self
            .http
            .post(self.url.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("rpc send: {e}")))?;
        if !resp.status().is_success() {
            return Err(TransportError::Http(format!("http {}", resp.status())));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| TransportError::Http(format!("json parse: {e}")))?;
        if let Some(err) = body.get("error") {
            return Err(TransportError::Rpc {
                code: err.get("code").and_then(Value::as_i64).unwrap_or(0),
                message: err
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown rpc error")
                    .to_string(),
                data: extract_revert_data(err),
            });
        }
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }

    /// `eth_call` against latest state.
    pub async fn call(&self, to: Address, data: &Bytes) -> Result<Bytes, TransportError> {
        let result = self
            .request(
                "eth_call",
                json!([{ "to": format!("{to:#x}"), "data": format!("{data:#x}") }, "latest"]),
            )
            .await?;
        decode_hex_value(&result)
    }

    /// `eth_estimateGas`; a revert surfaces as [`TransportError::Rpc`] with
    /// the raw revert payload attached when the node provides one.
    pub async fn estimate_gas(
        &self,
        from: Address,
        to: Address,
        value: U256,
        data: &Bytes,
    ) -> Result<u64, TransportError> {
        let result = self
            .request(
                "eth_estimateGas",
                json!([{
                    "from": format!("{from:#x}"),
                    "to": format!("{to:#x}"),
                    "value": format!("{value:#x}"),
                    "data": format!("{data:#x}"),
                }]),
            )
            .await?;
        let text = result
            .as_str()
            .ok_or_else(|| TransportError::Decode("estimateGas: expected hex string".into()))?;
        u64::from_str_radix(text.trim_start_matches("0x"), 16)
            .map_err(|e| TransportError::Decode(format!("estimateGas: {e}")))
    }

    /// `eth_sendTransaction` through the node's managed account.
    pub async fn send_transaction(
        &self,
        from: Address,
        to: Address,
        value: U256,
        data: &Bytes,
    ) -> Result<B256, TransportError> {
        let result = self
            .request(
                "eth_sendTransaction",
                json!([{
                    "from": format!("{from:#x}"),
                    "to": format!("{to:#x}"),
                    "value": format!("{value:#x}"),
                    "data": format!("{data:#x}"),
                }]),
            )
            .await?;
        let text = result
            .as_str()
            .ok_or_else(|| TransportError::Decode("sendTransaction: expected hash".into()))?;
        text.parse::<B256>()
            .map_err(|e| TransportError::Decode(format!("sendTransaction: {e}")))
    }

    /// `eth_signTypedData_v4` over an EIP-712 payload.
    pub async fn sign_typed_data(
        &self,
        from: Address,
        typed_data: &Value,
    ) -> Result<Bytes, TransportError> {
        let result = self
            .request(
                "eth_signTypedData_v4",
                json!([format!("{from:#x}"), typed_data.to_string()]),
            )
            .await?;
        decode_hex_value(&result)
    }
}

fn decode_hex_value(value: &Value) -> Result<Bytes, TransportError> {
    let text = value
        .as_str()
        .ok_or_else(|| TransportError::Decode("expected hex string result".into()))?;
    hex::decode(text.trim_start_matches("0x"))
        .map(Bytes::from)
        .map_err(|e| TransportError::Decode(format!("hex: {e}")))
}

/// Nodes attach revert payloads in slightly different envelopes: a bare hex
/// string under `data`, or an object with a nested `data` field.
fn extract_revert_data(err: &Value) -> Option<Vec<u8>> {
    let raw = match err.get("data") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Object(obj)) => obj.get("data")?.as_str()?.to_string(),
        _ => return None,
    };
    hex::decode(raw.trim_start_matches("0x")).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_every_registered_chain() {
        let registry = RpcRegistry::new();
        for chain in CHAINS {
            assert!(registry.client(chain.chain_id).is_ok());
        }
        assert!(matches!(
            registry.client(424242),
            Err(RouteError::UnsupportedChain(424242))
        ));
    }

    #[test]
    fn revert_data_extraction_handles_both_envelopes() {
        let flat = json!({ "code": 3, "message": "execution reverted", "data": "0xdeadbeef" });
        assert_eq!(extract_revert_data(&flat), Some(vec![0xde, 0xad, 0xbe, 0xef]));

        let nested = json!({ "code": 3, "message": "reverted", "data": { "data": "0x01" } });
        assert_eq!(extract_revert_data(&nested), Some(vec![0x01]));

        let missing = json!({ "code": -32000, "message": "out of gas" });
        assert_eq!(extract_revert_data(&missing), None);
    }
}

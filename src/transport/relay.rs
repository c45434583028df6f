// Safe transaction service client
// The relay collaborator: queue-nonce reads and multisig transaction
// proposals. One service instance per chain, resolved like RPC endpoints.

use std::collections::HashMap;
use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use url::Url;

use crate::config::{AppConfig, ChainId, CHAINS};
use crate::encoding::SafeTransactionData;
use crate::errors::{RouteError, TransportError};
use crate::metrics::{REQ_ERRORS, REQ_LATENCY};

const SERVICE: &str = "relay";

#[derive(Debug, Clone)]
pub struct RelayClient {
    services: HashMap<ChainId, Url>,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct SafeInfo {
    nonce: u64,
}

#[derive(Debug, Deserialize)]
struct QueuePage {
    results: Vec<QueueEntry>,
}

#[derive(Debug, Deserialize)]
struct QueueEntry {
    nonce: u64,
}

impl Default for RelayClient {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayClient {
    pub fn new() -> Self {
        let services = CHAINS
            .iter()
            .filter_map(|c| {
                Url::parse(c.transaction_service)
                    .ok()
                    .map(|u| (c.chain_id, u))
            })
            .collect();
        Self { services, http: Client::new() }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        let mut client = Self::new();
        if let Some(timeout) = cfg.http_timeout_ms {
            client.http = Client::builder()
                .timeout(Duration::from_millis(timeout))
                .build()
                .unwrap_or_else(|_| Client::new());
        }
        for (chain, url) in AppConfig::parsed_overrides(&cfg.transaction_services) {
            client.services.insert(chain, url);
        }
        client
    }

    pub fn with_endpoint(mut self, chain: ChainId, url: Url) -> Self {
        self.services.insert(chain, url);
        self
    }

    fn service(&self, chain: ChainId) -> Result<&Url, RouteError> {
        self.services
            .get(&chain)
            .ok_or(RouteError::UnsupportedChain(chain))
    }

    /// Next free nonce for a Safe: the larger of the on-chain counter and
    /// one past the highest still-queued proposal.
    pub async fn next_nonce(&self, chain: ChainId, safe: Address) -> Result<u64, RouteError> {
        let base = self.service(chain)?;
        let timer = REQ_LATENCY
            .with_label_values(&[SERVICE, "next_nonce"])
            .start_timer();
        let result = self.next_nonce_inner(base, safe).await;
        timer.observe_duration();
        if result.is_err() {
            REQ_ERRORS.with_label_values(&[SERVICE, "next_nonce"]).inc();
        }
        Ok(result?)
    }

    async fn next_nonce_inner(&self, base: &Url, safe: Address) -> Result<u64, TransportError> {
        let safe_checksummed = safe.to_checksum(None);
        let info_url = format!("{}api/v1/safes/{}/", ensure_slash(base), safe_checksummed);
        let info: SafeInfo = self.get_json(&info_url).await?;

        let queue_url = format!(
            "{}api/v1/safes/{}/multisig-transactions/?executed=false&limit=1&ordering=-nonce",
            ensure_slash(base),
            safe_checksummed
        );
        let queue: QueuePage = self.get_json(&queue_url).await?;
        let queued_next = queue.results.first().map(|e| e.nonce + 1).unwrap_or(0);
        Ok(info.nonce.max(queued_next))
    }

    /// Proposes a Safe transaction to the service for confirmation and
    /// eventual execution.
    pub async fn propose(
        &self,
        chain: ChainId,
        safe: Address,
        tx: &SafeTransactionData,
        hash: B256,
        sender: Address,
        signature: &Bytes,
    ) -> Result<(), RouteError> {
        let base = self.service(chain)?.clone();
        let timer = REQ_LATENCY
            .with_label_values(&[SERVICE, "propose"])
            .start_timer();
        let result = self
            .propose_inner(&base, safe, tx, hash, sender, signature)
            .await;
        timer.observe_duration();
        if result.is_err() {
            REQ_ERRORS.with_label_values(&[SERVICE, "propose"]).inc();
        }
        Ok(result?)
    }

    async fn propose_inner(
        &self,
        base: &Url,
        safe: Address,
        tx: &SafeTransactionData,
        hash: B256,
        sender: Address,
        signature: &Bytes,
    ) -> Result<(), TransportError> {
        let safe_checksummed = safe.to_checksum(None);
        let url = format!(
            "{}api/v1/safes/{}/multisig-transactions/",
            ensure_slash(base),
            safe_checksummed
        );
        let body = json!({
            "to": tx.to.to_checksum(None),
            "value": tx.value.to_string(),
            "data": format!("{:#x}", tx.data),
            "operation": tx.operation as u8,
            "safeTxGas": tx.safe_tx_gas.to_string(),
            "baseGas": tx.base_gas.to_string(),
            "gasPrice": tx.gas_price.to_string(),
            "gasToken": tx.gas_token.to_checksum(None),
            "refundReceiver": tx.refund_receiver.to_checksum(None),
            "nonce": tx.nonce,
            "contractTransactionHash": format!("{hash:#x}"),
            "sender": sender.to_checksum(None),
            "signature": format!("{signature:#x}"),
        });
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("relay send: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let detail = resp.text().await.unwrap_or_default();
            return Err(TransportError::Relay(format!("propose {status}: {detail}")));
        }
        debug!(safe = %safe_checksummed, nonce = tx.nonce, "transaction proposed");
        Ok(())
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
    ) -> Result<T, TransportError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| TransportError::Http(format!("relay send: {e}")))?;
        if !resp.status().is_success() {
            return Err(TransportError::Relay(format!("http {}", resp.status())));
        }
        resp.json::<T>()
            .await
            .map_err(|e| TransportError::Decode(format!("relay body: {e}")))
    }
}

fn ensure_slash(url: &Url) -> String {
    let raw = url.as_str();
    if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    }
}

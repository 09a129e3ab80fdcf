//! HTTP ledger client for a Stacks-style node API.
//!
//! Submissions go through a contract-call gateway endpoint; confirmation
//! polls the extended transaction API. Configured via environment:
//! - `LEDGER_URL` (default: the public testnet node)
//! - `LEDGER_CONTRACT_ADDRESS`
//! - `LEDGER_CONTRACT_NAME` (default: `land-registry`)

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::{ConfirmOutcome, ConfirmStatus, LedgerClient, LedgerError, LedgerOp, SubmitReceipt, TxStatus};

/// Default public node for development.
const DEFAULT_LEDGER_URL: &str = "https://stacks-node-api.testnet.stacks.co";

/// Request timeout for ledger calls.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Poll interval while waiting for confirmation.
const CONFIRM_POLL_SECS: u64 = 10;

/// Ledger client over HTTP.
pub struct HttpLedgerClient {
    client: reqwest::Client,
    base_url: String,
    contract_address: String,
    contract_name: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    txid: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    tx_status: String,
    #[serde(default)]
    tx_result: Option<serde_json::Value>,
}

impl HttpLedgerClient {
    pub fn new(base_url: String, contract_address: String, contract_name: String) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| LedgerError::Unavailable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            contract_address,
            contract_name,
        })
    }

    /// Build a client from environment variables.
    pub fn from_env() -> Result<Self, LedgerError> {
        let base_url =
            std::env::var("LEDGER_URL").unwrap_or_else(|_| DEFAULT_LEDGER_URL.to_string());
        let contract_address = std::env::var("LEDGER_CONTRACT_ADDRESS").unwrap_or_default();
        let contract_name =
            std::env::var("LEDGER_CONTRACT_NAME").unwrap_or_else(|_| "land-registry".to_string());

        Self::new(base_url, contract_address, contract_name)
    }

    fn call_url(&self, op: &LedgerOp) -> String {
        format!(
            "{}/v2/contracts/call/{}/{}/{}",
            self.base_url,
            self.contract_address,
            self.contract_name,
            op.function_name()
        )
    }

    /// Poll until the transaction confirms or fails, up to `max_attempts`.
    pub async fn wait_for_confirmation(
        &self,
        tx_ref: &str,
        max_attempts: u32,
    ) -> Result<ConfirmOutcome, LedgerError> {
        for attempt in 1..=max_attempts {
            match self.confirm(tx_ref).await {
                Ok(outcome) if outcome.status != ConfirmStatus::Pending => return Ok(outcome),
                Ok(_) => {
                    debug!(
                        "Transaction {} still pending (attempt {}/{})",
                        tx_ref, attempt, max_attempts
                    );
                }
                Err(e) => {
                    warn!("Confirmation query for {} failed: {}", tx_ref, e);
                }
            }
            tokio::time::sleep(Duration::from_secs(CONFIRM_POLL_SECS)).await;
        }

        Err(LedgerError::ConfirmationTimeout(tx_ref.to_string()))
    }
}

#[async_trait::async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn submit(&self, op: &LedgerOp) -> Result<SubmitReceipt, LedgerError> {
        let url = self.call_url(op);
        debug!("Submitting {} to {}", op.function_name(), url);

        let response = self
            .client
            .post(&url)
            .json(op)
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LedgerError::Rejected(format!("HTTP {}: {}", status, body)));
        }

        let parsed: SubmitResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;

        let tx_status = match parsed.status.as_deref() {
            Some("accepted") => TxStatus::Accepted,
            Some("rejected") => TxStatus::Rejected,
            _ => TxStatus::Pending,
        };

        Ok(SubmitReceipt {
            tx_ref: parsed.txid,
            status: tx_status,
        })
    }

    async fn confirm(&self, tx_ref: &str) -> Result<ConfirmOutcome, LedgerError> {
        let url = format!("{}/extended/v1/tx/{}", self.base_url, tx_ref);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| LedgerError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(LedgerError::InvalidResponse(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        let parsed: TxResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(e.to_string()))?;

        let status = match parsed.tx_status.as_str() {
            "success" => ConfirmStatus::Success,
            "pending" => ConfirmStatus::Pending,
            _ => ConfirmStatus::Failed,
        };

        Ok(ConfirmOutcome {
            status,
            result: parsed.tx_result,
        })
    }
}

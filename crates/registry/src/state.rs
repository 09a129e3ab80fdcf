//! Shared application state and environment configuration.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::warn;

use crate::service::TransferService;

/// Server configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path. `:memory:` selects the in-memory store.
    pub db_path: String,
    /// Port the HTTP server listens on.
    pub port: u16,
    /// Optional pre-shared API key required on mutating endpoints.
    pub api_psk: Option<String>,
    /// Hardened mode: refuse to start without a PSK, refuse the mock
    /// ledger.
    pub production: bool,
    /// Contract address on the ledger; unset selects the mock ledger.
    pub ledger_contract_address: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let production = std::env::var("REGISTRY_PRODUCTION")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let db_path = std::env::var("REGISTRY_DB_PATH").unwrap_or_else(|_| {
            if !production {
                warn!("REGISTRY_DB_PATH not set, using ./registry.db");
            }
            "registry.db".to_string()
        });

        let port = std::env::var("REGISTRY_PORT")
            .unwrap_or_else(|_| "4000".to_string())
            .parse::<u16>()
            .context("REGISTRY_PORT must be a port number")?;

        let api_psk = std::env::var("REGISTRY_API_PSK").ok();
        if production && api_psk.is_none() {
            bail!("REGISTRY_API_PSK is required when REGISTRY_PRODUCTION is set");
        }
        if api_psk.is_none() {
            warn!("REGISTRY_API_PSK not set, API key checks disabled (development mode)");
        }

        let ledger_contract_address = std::env::var("LEDGER_CONTRACT_ADDRESS").ok();
        if production && ledger_contract_address.is_none() {
            bail!("LEDGER_CONTRACT_ADDRESS is required when REGISTRY_PRODUCTION is set");
        }

        Ok(Self {
            db_path,
            port,
            api_psk,
            production,
            ledger_contract_address,
        })
    }
}

/// Shared application state passed to all handlers.
pub struct AppState {
    pub service: Arc<TransferService>,
    api_psk: Option<String>,
}

impl AppState {
    pub fn new(service: Arc<TransferService>, api_psk: Option<String>) -> Self {
        Self { service, api_psk }
    }

    /// Whether requests must carry an API key at all.
    pub fn requires_api_key(&self) -> bool {
        self.api_psk.is_some()
    }

    /// Verify the pre-shared API key. Constant-time comparison so the
    /// check does not leak key bytes through timing.
    pub fn verify_api_key(&self, provided: &str) -> bool {
        use subtle::ConstantTimeEq;
        match &self.api_psk {
            Some(psk) => psk.as_bytes().ct_eq(provided.as_bytes()).into(),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::store::MemoryStore;
    use ledger::mock::MockLedger;

    fn state(psk: Option<&str>) -> AppState {
        let service = Arc::new(TransferService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MockLedger::new()),
        ));
        AppState::new(service, psk.map(|s| s.to_string()))
    }

    #[test]
    fn psk_verification() {
        let s = state(Some("hunter2"));
        assert!(s.requires_api_key());
        assert!(s.verify_api_key("hunter2"));
        assert!(!s.verify_api_key("hunter3"));
        assert!(!s.verify_api_key(""));
    }

    #[test]
    fn missing_psk_disables_the_check() {
        let s = state(None);
        assert!(!s.requires_api_key());
        assert!(s.verify_api_key("anything"));
    }
}

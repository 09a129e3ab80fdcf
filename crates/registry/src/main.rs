//! Land registry server.
//!
//! Serves the property registry and the multi-signature transfer
//! lifecycle over HTTP. Identity arrives from an upstream gateway in
//! the `x-principal` header; the ledger is an external collaborator
//! reached through the `ledger` crate.

mod handlers;
mod identity;
mod service;
mod state;
mod sweeper;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use common::store::{RegistryStore, SqliteStore};
use ledger::{http::HttpLedgerClient, mock::MockLedger, LedgerClient};

use crate::service::TransferService;
use crate::state::{AppState, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("Starting land registry server");

    let config = Config::from_env()?;
    if config.production {
        info!("Production mode enabled");
    }

    let store: Arc<dyn RegistryStore> = Arc::new(SqliteStore::open(&config.db_path)?);
    info!("Store opened at {}", config.db_path);

    let ledger_client: Arc<dyn LedgerClient> = match &config.ledger_contract_address {
        Some(_) => {
            let client = HttpLedgerClient::from_env()?;
            info!("Using HTTP ledger client");
            Arc::new(client)
        }
        None => {
            warn!("LEDGER_CONTRACT_ADDRESS not set, using mock ledger (development mode)");
            Arc::new(MockLedger::new())
        }
    };

    let service = Arc::new(TransferService::new(store, ledger_client));
    let state = Arc::new(AppState::new(service.clone(), config.api_psk.clone()));

    let sweeper_handle = sweeper::spawn_expiry_sweeper(service);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handlers::health_check))
        // Property registry
        .route("/property", post(handlers::register_property))
        .route("/properties", get(handlers::list_properties))
        .route("/property/{property_id}", get(handlers::get_property))
        // Transfer lifecycle
        .route(
            "/property/{property_id}/transfer",
            post(handlers::initiate_transfer).get(handlers::transfer_status),
        )
        .route(
            "/property/{property_id}/transfer/sign",
            post(handlers::sign_transfer),
        )
        .route(
            "/property/{property_id}/transfer/cancel",
            post(handlers::cancel_transfer),
        )
        .route(
            "/property/{property_id}/transfers",
            get(handlers::transfer_history),
        )
        // Reconciliation surface
        .route("/transfers/unconfirmed", get(handlers::unconfirmed_transfers))
        .layer(cors)
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.port);
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    sweeper_handle.abort();
    Ok(())
}

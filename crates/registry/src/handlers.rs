//! HTTP request handlers for the registry server.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use tracing::{info, trace};

use common::{
    protocol::ErrorBody, CancelTransferResponse, InitiateTransferRequest,
    InitiateTransferResponse, PropertyRecord, RegisterPropertyRequest, RegisterPropertyResponse,
    RegistryError, SignTransferRequest, SignTransferResponse, TransferHistoryResponse,
    TransferStatusResponse, UnconfirmedTransfersResponse,
};

use crate::identity::Principal;
use crate::state::AppState;

pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorBody>)>;

/// Map a registry error to its HTTP status and wire body.
fn error_response(err: RegistryError) -> (StatusCode, Json<ErrorBody>) {
    let status = match &err {
        RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
        RegistryError::Unauthorized(_) => StatusCode::FORBIDDEN,
        RegistryError::NotFound(_) => StatusCode::NOT_FOUND,
        RegistryError::AlreadyPending(_)
        | RegistryError::AlreadySigned(_)
        | RegistryError::NotPending
        | RegistryError::Contention => StatusCode::CONFLICT,
        RegistryError::Expired => StatusCode::GONE,
        RegistryError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        RegistryError::Ledger(_) => StatusCode::BAD_GATEWAY,
    };

    let body = ErrorBody {
        error: err.kind().to_string(),
        message: err.to_string(),
    };
    (status, Json(body))
}

/// GET /health
pub async fn health_check() -> impl IntoResponse {
    trace!("Health check endpoint called");
    Json(serde_json::json!({
        "status": "healthy",
        "service": "land-registry",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// POST /property
pub async fn register_property(
    State(state): State<Arc<AppState>>,
    principal: Principal,
    Json(payload): Json<RegisterPropertyRequest>,
) -> ApiResult<RegisterPropertyResponse> {
    info!(
        "Register property {} requested by {}",
        payload.property_id,
        principal.as_str()
    );

    state
        .service
        .register_property(payload, principal.as_str())
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /properties
pub async fn list_properties(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<PropertyRecord>> {
    state
        .service
        .list_properties()
        .map(Json)
        .map_err(error_response)
}

/// GET /property/{property_id}
pub async fn get_property(
    State(state): State<Arc<AppState>>,
    Path(property_id): Path<String>,
) -> ApiResult<PropertyRecord> {
    state
        .service
        .get_property(&property_id)
        .map(Json)
        .map_err(error_response)
}

/// POST /property/{property_id}/transfer
pub async fn initiate_transfer(
    State(state): State<Arc<AppState>>,
    Path(property_id): Path<String>,
    principal: Principal,
    Json(payload): Json<InitiateTransferRequest>,
) -> ApiResult<InitiateTransferResponse> {
    info!(
        "Initiate transfer of {} to {} requested by {}",
        property_id,
        payload.new_owner,
        principal.as_str()
    );

    state
        .service
        .initiate(&property_id, payload, principal.as_str())
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /property/{property_id}/transfer/sign
pub async fn sign_transfer(
    State(state): State<Arc<AppState>>,
    Path(property_id): Path<String>,
    principal: Principal,
    Json(payload): Json<SignTransferRequest>,
) -> ApiResult<SignTransferResponse> {
    info!(
        "Signature for property {} submitted by {}",
        property_id,
        principal.as_str()
    );

    state
        .service
        .sign(&property_id, principal.as_str(), payload)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /property/{property_id}/transfer/cancel
pub async fn cancel_transfer(
    State(state): State<Arc<AppState>>,
    Path(property_id): Path<String>,
    principal: Principal,
) -> ApiResult<CancelTransferResponse> {
    info!(
        "Cancel transfer of {} requested by {}",
        property_id,
        principal.as_str()
    );

    state
        .service
        .cancel(&property_id, principal.as_str())
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /property/{property_id}/transfer
pub async fn transfer_status(
    State(state): State<Arc<AppState>>,
    Path(property_id): Path<String>,
) -> ApiResult<TransferStatusResponse> {
    state
        .service
        .status(&property_id)
        .map(Json)
        .map_err(error_response)
}

/// GET /property/{property_id}/transfers
pub async fn transfer_history(
    State(state): State<Arc<AppState>>,
    Path(property_id): Path<String>,
) -> ApiResult<TransferHistoryResponse> {
    state
        .service
        .history(&property_id)
        .map(Json)
        .map_err(error_response)
}

/// GET /transfers/unconfirmed
pub async fn unconfirmed_transfers(
    State(state): State<Arc<AppState>>,
) -> ApiResult<UnconfirmedTransfersResponse> {
    state
        .service
        .unconfirmed()
        .map(Json)
        .map_err(error_response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping_matches_api_contract() {
        let cases = [
            (RegistryError::Validation("x".into()), StatusCode::BAD_REQUEST),
            (RegistryError::Unauthorized("x".into()), StatusCode::FORBIDDEN),
            (RegistryError::NotFound("x".into()), StatusCode::NOT_FOUND),
            (RegistryError::AlreadyPending("x".into()), StatusCode::CONFLICT),
            (RegistryError::AlreadySigned("x".into()), StatusCode::CONFLICT),
            (RegistryError::NotPending, StatusCode::CONFLICT),
            (RegistryError::Contention, StatusCode::CONFLICT),
            (RegistryError::Expired, StatusCode::GONE),
            (RegistryError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
            (RegistryError::Ledger("x".into()), StatusCode::BAD_GATEWAY),
        ];

        for (err, expected) in cases {
            let kind = err.kind();
            let (status, body) = error_response(err);
            assert_eq!(status, expected);
            assert_eq!(body.0.error, kind);
        }
    }
}

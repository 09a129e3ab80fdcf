//! Request identity extraction.
//!
//! Authentication happens upstream: a gateway verifies the caller and
//! forwards the principal in the `x-principal` header. This server
//! trusts that header and optionally requires a pre-shared API key in
//! `x-api-key` as a second gate between gateway and registry.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::{request::Parts, StatusCode};
use axum::Json;
use tracing::warn;

use common::protocol::ErrorBody;

use crate::state::AppState;

pub const PRINCIPAL_HEADER: &str = "x-principal";
pub const API_KEY_HEADER: &str = "x-api-key";

/// The verified caller identity, extracted from request headers.
#[derive(Debug, Clone)]
pub struct Principal(pub String);

impl Principal {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn reject(status: StatusCode, error: &str, message: &str) -> (StatusCode, Json<ErrorBody>) {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
            message: message.to_string(),
        }),
    )
}

impl FromRequestParts<Arc<AppState>> for Principal {
    type Rejection = (StatusCode, Json<ErrorBody>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if state.requires_api_key() {
            let provided = parts
                .headers
                .get(API_KEY_HEADER)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if !state.verify_api_key(provided) {
                warn!("Request rejected: missing or invalid API key");
                return Err(reject(
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    "missing or invalid API key",
                ));
            }
        }

        let principal = parts
            .headers
            .get(PRINCIPAL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|p| !p.is_empty());

        match principal {
            Some(p) => Ok(Principal(p.to_string())),
            None => {
                warn!("Request rejected: no {} header", PRINCIPAL_HEADER);
                Err(reject(
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    "caller identity missing",
                ))
            }
        }
    }
}

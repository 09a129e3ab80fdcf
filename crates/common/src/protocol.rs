//! Request and response types for the registry HTTP API.
//!
//! Shared between the server handlers and the CLI client so both sides
//! agree on the wire shape.

use serde::{Deserialize, Serialize};

use crate::types::{PropertyRecord, TransferProposal};

/// Request to register a new property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPropertyRequest {
    pub property_id: String,
    pub location: String,
    pub area_sqm: u64,
}

/// Response after registering a property.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPropertyResponse {
    pub property: PropertyRecord,
    /// Ledger submission reference, absent when the ledger was
    /// unreachable (registration still stands).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_tx_ref: Option<String>,
}

/// Request to initiate a multi-signature transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateTransferRequest {
    pub new_owner: String,
    pub required_signers: Vec<String>,
    /// Signing window in days; clamped to the 1..=30 policy bound.
    /// Defaults to 30 when omitted.
    #[serde(default)]
    pub window_days: Option<u32>,
}

/// Response after initiating a transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateTransferResponse {
    pub transfer: TransferProposal,
    /// Deterministic short reference for the proposal.
    pub transfer_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger_tx_ref: Option<String>,
}

/// Request to sign a pending transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignTransferRequest {
    /// Opaque authorization token from the signer's wallet.
    pub token: String,
}

/// Response after a successful sign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignTransferResponse {
    pub transfer: TransferProposal,
    /// Signatures still outstanding; zero exactly when completed.
    pub remaining_signatures: usize,
    pub completed: bool,
    /// Ledger reference for the execute operation. Present only when
    /// the transfer completed and the ledger accepted the submission;
    /// a completed transfer without it awaits reconciliation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_tx_ref: Option<String>,
}

/// Response after cancelling a transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelTransferResponse {
    pub transfer: TransferProposal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_tx_ref: Option<String>,
}

/// Current state of a property's transfer, lazy expiry applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferStatusResponse {
    pub transfer: TransferProposal,
    pub remaining_signatures: usize,
    /// Milliseconds until expiry, zero once past the deadline.
    pub time_remaining_ms: u64,
}

/// Transfer history for a property, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferHistoryResponse {
    pub property_id: String,
    pub transfers: Vec<TransferProposal>,
}

/// Terminal transfers still awaiting ledger confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnconfirmedTransfersResponse {
    pub transfers: Vec<TransferProposal>,
}

/// Machine-readable error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error kind, see `RegistryError::kind`.
    pub error: String,
    pub message: String,
}

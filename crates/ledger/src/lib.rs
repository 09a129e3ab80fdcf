//! Ledger collaborator for the land registry.
//!
//! The on-chain registry contract is the external system of record that
//! finalizes ownership changes. The core never blocks a state
//! transition on ledger confirmation: operations here are
//! fire-and-eventually-confirm, and the registry's own store stays
//! authoritative for intent.
//!
//! [`LedgerClient`] is the seam the lifecycle service is built against;
//! [`http::HttpLedgerClient`] talks to a Stacks-style node API and
//! [`mock::MockLedger`] is the scriptable double for tests and local
//! development.

pub mod http;
pub mod mock;

use serde::{Deserialize, Serialize};

/// Contract operation submitted to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum LedgerOp {
    RegisterProperty {
        property_id: String,
        location: String,
        area_sqm: u64,
        owner: String,
    },
    InitiateTransfer {
        property_id: String,
        new_owner: String,
        required_signers: Vec<String>,
        window_days: u32,
    },
    SignTransfer {
        property_id: String,
        signer: String,
    },
    ExecuteTransfer {
        property_id: String,
    },
    CancelTransfer {
        property_id: String,
    },
}

impl LedgerOp {
    /// Contract function name for this operation.
    pub fn function_name(&self) -> &'static str {
        match self {
            LedgerOp::RegisterProperty { .. } => "register-property",
            LedgerOp::InitiateTransfer { .. } => "initiate-multi-sig-transfer",
            LedgerOp::SignTransfer { .. } => "sign-multi-sig-transfer",
            LedgerOp::ExecuteTransfer { .. } => "execute-multi-sig-transfer",
            LedgerOp::CancelTransfer { .. } => "cancel-multi-sig-transfer",
        }
    }
}

/// Submission state reported by the ledger at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Pending,
    Accepted,
    Rejected,
}

/// Receipt for a submitted operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
    /// Opaque transaction identifier.
    pub tx_ref: String,
    pub status: TxStatus,
}

/// Final confirmation state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfirmStatus {
    Success,
    Failed,
    /// Still in the mempool; poll again later.
    Pending,
}

/// Result of a confirmation query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmOutcome {
    pub status: ConfirmStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Errors from the ledger collaborator.
///
/// These are dependency errors, distinct from business errors: the
/// caller decides whether a failed ledger call aborts the operation
/// (nothing persisted yet) or degrades it to an unconfirmed result
/// (state transition already durable).
#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    #[error("ledger rejected operation: {0}")]
    Rejected(String),

    #[error("unexpected ledger response: {0}")]
    InvalidResponse(String),

    #[error("ledger confirmation timed out for {0}")]
    ConfirmationTimeout(String),
}

/// The ledger collaborator contract.
///
/// All implementations must be safe to call concurrently; the registry
/// never serializes ledger calls per property.
#[async_trait::async_trait]
pub trait LedgerClient: Send + Sync {
    /// Submit an operation. Returns as soon as the ledger accepts the
    /// transaction into its mempool.
    async fn submit(&self, op: &LedgerOp) -> Result<SubmitReceipt, LedgerError>;

    /// Query the confirmation state of an earlier submission.
    async fn confirm(&self, tx_ref: &str) -> Result<ConfirmOutcome, LedgerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_names_match_contract() {
        let op = LedgerOp::SignTransfer {
            property_id: "LOT-1".to_string(),
            signer: "SP_ALICE".to_string(),
        };
        assert_eq!(op.function_name(), "sign-multi-sig-transfer");

        let op = LedgerOp::ExecuteTransfer {
            property_id: "LOT-1".to_string(),
        };
        assert_eq!(op.function_name(), "execute-multi-sig-transfer");
    }
}

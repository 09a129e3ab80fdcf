//! Shared types and logic for the land registry.
//!
//! This crate holds everything both the server and the CLI depend on:
//! - Domain types (`types`): properties, transfer proposals, signatures
//! - The quorum engine (`quorum`): the pure transfer state machine
//! - Record storage (`store`): SQLite and in-memory stores with
//!   optimistic concurrency
//! - Wire DTOs (`protocol`) for the HTTP API

pub mod protocol;
pub mod quorum;
pub mod store;
pub mod types;

pub use protocol::*;
pub use types::{
    PropertyRecord, PropertyStatus, SignatureRecord, TransferProposal, TransferStatus,
};

/// Minimum signing window, in days.
pub const MIN_WINDOW_DAYS: u32 = 1;

/// Maximum signing window, in days.
pub const MAX_WINDOW_DAYS: u32 = 30;

/// Default signing window when the initiator does not pick one.
pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Bounded retries for optimistic-concurrency conflicts on sign/cancel.
pub const MAX_CAS_RETRIES: u32 = 4;

/// Errors produced by the registry core.
///
/// Every variant carries a stable machine-readable kind (see [`RegistryError::kind`])
/// so API clients can branch without parsing messages.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Unauthorized(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("a pending transfer already exists for property {0}")]
    AlreadyPending(String),

    #[error("signer {0} has already signed this transfer")]
    AlreadySigned(String),

    #[error("no pending transfer to act on")]
    NotPending,

    #[error("transfer has expired")]
    Expired,

    #[error("concurrent updates exhausted retries, re-fetch and try again")]
    Contention,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("ledger error: {0}")]
    Ledger(String),
}

impl RegistryError {
    /// Stable machine-readable error kind for API responses.
    pub fn kind(&self) -> &'static str {
        match self {
            RegistryError::Validation(_) => "validation",
            RegistryError::Unauthorized(_) => "unauthorized",
            RegistryError::NotFound(_) => "not_found",
            RegistryError::AlreadyPending(_) => "already_pending",
            RegistryError::AlreadySigned(_) => "already_signed",
            RegistryError::NotPending => "not_pending",
            RegistryError::Expired => "expired",
            RegistryError::Contention => "contention",
            RegistryError::Storage(_) => "storage",
            RegistryError::Ledger(_) => "ledger",
        }
    }

    /// Whether a caller may retry the same request after a fresh read.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RegistryError::Contention | RegistryError::Storage(_) | RegistryError::Ledger(_)
        )
    }
}

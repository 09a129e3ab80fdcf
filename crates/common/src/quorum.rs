//! The transfer quorum engine.
//!
//! Pure functions from a proposal plus an event to the next proposal.
//! No I/O, no clock reads: callers pass `now` in, which keeps every
//! transition replayable under test and makes "expired but not yet
//! marked" indistinguishable from a stored `EXPIRED` status.
//!
//! Persistence and ledger side effects live in the lifecycle service;
//! this module only decides what the next record looks like.

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::types::{SignatureRecord, TransferProposal, TransferStatus};
use crate::{RegistryError, DEFAULT_WINDOW_DAYS, MAX_WINDOW_DAYS, MIN_WINDOW_DAYS};

/// Outcome of a successful signature append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignProgress {
    /// Quorum not yet reached; this many signatures still outstanding.
    Pending { remaining: usize },
    /// This signature completed the quorum. The returned proposal is
    /// already `COMPLETED`; there is no observable fully-signed-but-
    /// pending state.
    Completed,
}

/// A signature transition: the next record and how far it got.
#[derive(Debug, Clone)]
pub struct SignTransition {
    pub proposal: TransferProposal,
    pub progress: SignProgress,
}

/// Build a new pending proposal.
///
/// Validates the signer set and clamps the signing window to the
/// policy bound of [`MIN_WINDOW_DAYS`]..=[`MAX_WINDOW_DAYS`] days.
pub fn new_proposal(
    property_id: &str,
    current_owner: &str,
    new_owner: &str,
    required_signers: Vec<String>,
    window_days: Option<u32>,
    initiated_by: &str,
    now: DateTime<Utc>,
) -> Result<TransferProposal, RegistryError> {
    if property_id.trim().is_empty() {
        return Err(RegistryError::Validation("property id is empty".to_string()));
    }
    if new_owner.trim().is_empty() {
        return Err(RegistryError::Validation("new owner is empty".to_string()));
    }
    if new_owner == current_owner {
        return Err(RegistryError::Validation(
            "new owner is already the current owner".to_string(),
        ));
    }
    if required_signers.is_empty() {
        return Err(RegistryError::Validation(
            "at least one required signer must be specified".to_string(),
        ));
    }

    let mut signers: Vec<String> = Vec::with_capacity(required_signers.len());
    for signer in required_signers {
        if signer.trim().is_empty() {
            return Err(RegistryError::Validation("signer id is empty".to_string()));
        }
        if signers.contains(&signer) {
            return Err(RegistryError::Validation(format!(
                "duplicate required signer: {}",
                signer
            )));
        }
        signers.push(signer);
    }

    // The current owner is always an eligible signer.
    if !signers.iter().any(|s| s == current_owner) {
        return Err(RegistryError::Validation(
            "required signers must include the current owner".to_string(),
        ));
    }

    let window = window_days
        .unwrap_or(DEFAULT_WINDOW_DAYS)
        .clamp(MIN_WINDOW_DAYS, MAX_WINDOW_DAYS);

    Ok(TransferProposal {
        id: Uuid::new_v4(),
        property_id: property_id.to_string(),
        current_owner: current_owner.to_string(),
        new_owner: new_owner.to_string(),
        required_signers: signers,
        provided_signatures: Vec::new(),
        status: TransferStatus::Pending,
        expires_at: now + Duration::days(window as i64),
        initiated_by: initiated_by.to_string(),
        external_tx_ref: None,
        version: 1,
        created_at: now,
        updated_at: now,
    })
}

/// Append a signature, completing the transfer when quorum is reached.
///
/// Guard order matches what callers should surface: deadline first
/// (an expired proposal fails `Expired` even for an eligible signer),
/// then eligibility, then duplicate detection.
pub fn apply_signature(
    proposal: &TransferProposal,
    signer: &str,
    token: &str,
    now: DateTime<Utc>,
) -> Result<SignTransition, RegistryError> {
    if proposal.status != TransferStatus::Pending {
        return Err(RegistryError::NotPending);
    }
    if proposal.is_past_deadline(now) {
        return Err(RegistryError::Expired);
    }
    if !proposal.is_required_signer(signer) {
        return Err(RegistryError::Unauthorized(format!(
            "{} is not a required signer for this transfer",
            signer
        )));
    }
    if proposal.has_signed(signer) {
        return Err(RegistryError::AlreadySigned(signer.to_string()));
    }
    if token.trim().is_empty() {
        return Err(RegistryError::Validation(
            "signature token is empty".to_string(),
        ));
    }

    let mut next = proposal.clone();
    next.provided_signatures.push(SignatureRecord {
        signer: signer.to_string(),
        token: token.to_string(),
        signed_at: now,
        tx_ref: None,
    });
    next.updated_at = now;

    // Completion is decided from the signatures just written, never
    // from a stored count.
    let progress = if next.provided_signatures.len() >= next.required_signers.len() {
        next.status = TransferStatus::Completed;
        SignProgress::Completed
    } else {
        SignProgress::Pending {
            remaining: next.remaining_signatures(),
        }
    };

    Ok(SignTransition {
        proposal: next,
        progress,
    })
}

/// Cancel a pending proposal.
///
/// Only the initiator or the current owner may cancel. A proposal past
/// its deadline resolves to `EXPIRED` instead, regardless of who asks.
pub fn apply_cancel(
    proposal: &TransferProposal,
    requester: &str,
    now: DateTime<Utc>,
) -> Result<TransferProposal, RegistryError> {
    if proposal.status != TransferStatus::Pending {
        return Err(RegistryError::NotPending);
    }
    if requester != proposal.initiated_by && requester != proposal.current_owner {
        return Err(RegistryError::Unauthorized(format!(
            "{} is neither the initiator nor the current owner",
            requester
        )));
    }

    let mut next = proposal.clone();
    next.status = if proposal.is_past_deadline(now) {
        TransferStatus::Expired
    } else {
        TransferStatus::Cancelled
    };
    next.updated_at = now;
    Ok(next)
}

/// Lazy expiry: returns the `EXPIRED` successor for a pending proposal
/// whose deadline has passed, or `None` when nothing needs to change.
pub fn check_expiry(proposal: &TransferProposal, now: DateTime<Utc>) -> Option<TransferProposal> {
    if proposal.status == TransferStatus::Pending && proposal.is_past_deadline(now) {
        let mut next = proposal.clone();
        next.status = TransferStatus::Expired;
        next.updated_at = now;
        Some(next)
    } else {
        None
    }
}

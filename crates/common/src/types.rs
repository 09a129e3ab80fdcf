//! Domain types for properties and multi-signature transfers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Lifecycle status of a transfer proposal.
///
/// `Pending` is the only non-terminal state; the other three are
/// terminal and immutable once persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Pending,
    Completed,
    Cancelled,
    Expired,
}

impl TransferStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "PENDING",
            TransferStatus::Completed => "COMPLETED",
            TransferStatus::Cancelled => "CANCELLED",
            TransferStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "PENDING" => Ok(TransferStatus::Pending),
            "COMPLETED" => Ok(TransferStatus::Completed),
            "CANCELLED" => Ok(TransferStatus::Cancelled),
            "EXPIRED" => Ok(TransferStatus::Expired),
            other => Err(format!("unknown transfer status: '{}'", other)),
        }
    }
}

/// One collected authorization from a required signer.
///
/// The `token` is an opaque authorization artifact supplied by an
/// already-authenticated party; the registry does not interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub signer: String,
    pub token: String,
    pub signed_at: DateTime<Utc>,
    /// Ledger transaction reference for the per-signature submission,
    /// recorded best-effort after the signature is durable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_ref: Option<String>,
}

/// A proposed change of property ownership awaiting signer quorum.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProposal {
    /// Record key. Proposals are never deleted; terminal records stay
    /// around for audit, so the property id alone is not unique.
    pub id: Uuid,
    pub property_id: String,
    pub current_owner: String,
    pub new_owner: String,
    /// Signers whose authorization is required. Fixed at creation.
    pub required_signers: Vec<String>,
    /// Collected signatures, append-only, one per signer.
    pub provided_signatures: Vec<SignatureRecord>,
    pub status: TransferStatus,
    pub expires_at: DateTime<Utc>,
    pub initiated_by: String,
    /// Reference to the final ledger operation, set only when the
    /// transfer completes or is cancelled and the ledger accepted it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_tx_ref: Option<String>,
    /// Optimistic-concurrency stamp, bumped by every persisted write.
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferProposal {
    /// Number of signatures still outstanding.
    pub fn remaining_signatures(&self) -> usize {
        self.required_signers
            .len()
            .saturating_sub(self.provided_signatures.len())
    }

    /// Whether the wall-clock deadline has passed.
    ///
    /// Guards use this directly rather than the stored status: an
    /// expired-but-not-yet-marked record must behave as `Expired`.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether `signer` already provided a signature.
    pub fn has_signed(&self, signer: &str) -> bool {
        self.provided_signatures.iter().any(|s| s.signer == signer)
    }

    /// Whether `signer` is in the required set.
    pub fn is_required_signer(&self, signer: &str) -> bool {
        self.required_signers.iter().any(|s| s == signer)
    }

    /// Deterministic short reference for this proposal, stable across
    /// restarts and suitable for ledger memos and logs.
    pub fn transfer_ref(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.id.as_bytes());
        hasher.update(self.property_id.as_bytes());
        let hash = hasher.finalize();
        format!("xfer-{}", hex::encode(&hash[..8]))
    }
}

/// Registration status of a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyStatus {
    Active,
    Disputed,
    Inactive,
}

impl PropertyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyStatus::Active => "ACTIVE",
            PropertyStatus::Disputed => "DISPUTED",
            PropertyStatus::Inactive => "INACTIVE",
        }
    }

    pub fn parse(s: &str) -> Result<Self, String> {
        match s {
            "ACTIVE" => Ok(PropertyStatus::Active),
            "DISPUTED" => Ok(PropertyStatus::Disputed),
            "INACTIVE" => Ok(PropertyStatus::Inactive),
            other => Err(format!("unknown property status: '{}'", other)),
        }
    }
}

/// A registered property and its recorded owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub property_id: String,
    pub owner: String,
    pub location: String,
    pub area_sqm: u64,
    pub status: PropertyStatus,
    pub registered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transfer_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn proposal() -> TransferProposal {
        let now = Utc::now();
        TransferProposal {
            id: Uuid::new_v4(),
            property_id: "LOT-42".to_string(),
            current_owner: "SP_ALICE".to_string(),
            new_owner: "SP_BOB".to_string(),
            required_signers: vec!["SP_ALICE".to_string(), "SP_NOTARY".to_string()],
            provided_signatures: vec![],
            status: TransferStatus::Pending,
            expires_at: now + Duration::days(7),
            initiated_by: "SP_ALICE".to_string(),
            external_tx_ref: None,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn remaining_signatures_counts_down() {
        let mut p = proposal();
        assert_eq!(p.remaining_signatures(), 2);
        p.provided_signatures.push(SignatureRecord {
            signer: "SP_ALICE".to_string(),
            token: "tok".to_string(),
            signed_at: Utc::now(),
            tx_ref: None,
        });
        assert_eq!(p.remaining_signatures(), 1);
        assert!(p.has_signed("SP_ALICE"));
        assert!(!p.has_signed("SP_NOTARY"));
    }

    #[test]
    fn deadline_check_uses_wall_clock() {
        let p = proposal();
        assert!(!p.is_past_deadline(Utc::now()));
        assert!(p.is_past_deadline(p.expires_at));
        assert!(p.is_past_deadline(p.expires_at + Duration::seconds(1)));
    }

    #[test]
    fn transfer_ref_is_deterministic() {
        let p = proposal();
        assert_eq!(p.transfer_ref(), p.transfer_ref());
        assert!(p.transfer_ref().starts_with("xfer-"));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TransferStatus::Pending,
            TransferStatus::Completed,
            TransferStatus::Cancelled,
            TransferStatus::Expired,
        ] {
            assert_eq!(TransferStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(TransferStatus::parse("ARCHIVED").is_err());
    }
}

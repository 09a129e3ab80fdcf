//! The transfer lifecycle service.
//!
//! Wraps the pure quorum engine with persistence and the external
//! ledger collaborator. The flow for every mutation is: fetch the
//! current record, let the engine compute the transition, persist it
//! with compare-and-swap, and only then fire the ledger call.
//!
//! The store is the source of truth for intent. Ledger failures after
//! a durable transition never roll the record back; the record simply
//! stays unconfirmed until reconciliation drains it.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::quorum::{self, SignProgress};
use common::store::{CasOutcome, RegistryStore};
use common::types::{PropertyRecord, PropertyStatus, TransferProposal};
use common::{
    CancelTransferResponse, InitiateTransferRequest, InitiateTransferResponse,
    RegisterPropertyRequest, RegisterPropertyResponse, RegistryError, SignTransferRequest,
    SignTransferResponse, TransferHistoryResponse, TransferStatusResponse,
    UnconfirmedTransfersResponse, MAX_CAS_RETRIES,
};
use ledger::{LedgerClient, LedgerOp};

/// Orchestrates transfer lifecycle operations against the store and
/// the ledger collaborator. Construction takes both as explicit
/// dependencies; there is no process-wide client state.
pub struct TransferService {
    store: Arc<dyn RegistryStore>,
    ledger: Arc<dyn LedgerClient>,
}

impl TransferService {
    pub fn new(store: Arc<dyn RegistryStore>, ledger: Arc<dyn LedgerClient>) -> Self {
        Self { store, ledger }
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    pub async fn register_property(
        &self,
        request: RegisterPropertyRequest,
        registrant: &str,
    ) -> Result<RegisterPropertyResponse, RegistryError> {
        if request.property_id.trim().is_empty() {
            return Err(RegistryError::Validation("property id is empty".to_string()));
        }
        if request.location.trim().is_empty() {
            return Err(RegistryError::Validation("location is empty".to_string()));
        }
        if request.area_sqm == 0 {
            return Err(RegistryError::Validation("area must be positive".to_string()));
        }

        let property = PropertyRecord {
            property_id: request.property_id.clone(),
            owner: registrant.to_string(),
            location: request.location.clone(),
            area_sqm: request.area_sqm,
            status: PropertyStatus::Active,
            registered_at: Utc::now(),
            last_transfer_at: None,
        };

        self.store.put_property(&property)?;

        let ledger_tx_ref = self
            .submit_best_effort(&LedgerOp::RegisterProperty {
                property_id: request.property_id,
                location: request.location,
                area_sqm: request.area_sqm,
                owner: registrant.to_string(),
            })
            .await;

        Ok(RegisterPropertyResponse {
            property,
            ledger_tx_ref,
        })
    }

    pub fn get_property(&self, property_id: &str) -> Result<PropertyRecord, RegistryError> {
        self.store
            .get_property(property_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("property {}", property_id)))
    }

    pub fn list_properties(&self) -> Result<Vec<PropertyRecord>, RegistryError> {
        self.store.list_properties()
    }

    // ------------------------------------------------------------------
    // Transfer lifecycle
    // ------------------------------------------------------------------

    /// Initiate a multi-signature transfer for a property.
    ///
    /// The record is created first; the ledger submission is
    /// best-effort and may be retried independently when it fails.
    pub async fn initiate(
        &self,
        property_id: &str,
        request: InitiateTransferRequest,
        initiator: &str,
    ) -> Result<InitiateTransferResponse, RegistryError> {
        let property = self.get_property(property_id)?;

        if property.owner != initiator {
            return Err(RegistryError::Unauthorized(
                "only the property owner can initiate a transfer".to_string(),
            ));
        }

        let window_days = request.window_days;
        let proposal = quorum::new_proposal(
            property_id,
            &property.owner,
            &request.new_owner,
            request.required_signers,
            window_days,
            initiator,
            Utc::now(),
        )?;

        self.store.create_transfer(&proposal)?;
        info!(
            "Transfer {} initiated for property {} by {} ({} signers required, expires {})",
            proposal.transfer_ref(),
            property_id,
            initiator,
            proposal.required_signers.len(),
            proposal.expires_at
        );

        let ledger_tx_ref = self
            .submit_best_effort(&LedgerOp::InitiateTransfer {
                property_id: property_id.to_string(),
                new_owner: proposal.new_owner.clone(),
                required_signers: proposal.required_signers.clone(),
                window_days: window_days.unwrap_or(common::DEFAULT_WINDOW_DAYS),
            })
            .await;

        Ok(InitiateTransferResponse {
            transfer_ref: proposal.transfer_ref(),
            transfer: proposal,
            ledger_tx_ref,
        })
    }

    /// Add a signature to the pending transfer for a property.
    ///
    /// Fetch-guard-append loop with bounded retries on version
    /// conflicts; exhaustion surfaces `Contention` so the caller can
    /// re-read and decide. When the appended signature completes the
    /// quorum, the execute ledger op fires after the completion is
    /// durable.
    pub async fn sign(
        &self,
        property_id: &str,
        signer: &str,
        request: SignTransferRequest,
    ) -> Result<SignTransferResponse, RegistryError> {
        let mut outcome = None;

        for attempt in 1..=MAX_CAS_RETRIES {
            let now = Utc::now();
            let current = self.load_pending(property_id, now)?;

            let transition = quorum::apply_signature(&current, signer, &request.token, now)?;

            match self
                .store
                .compare_and_swap(current.version, &transition.proposal)?
            {
                CasOutcome::Applied => {
                    let mut persisted = transition.proposal;
                    persisted.version = current.version + 1;
                    outcome = Some((persisted, transition.progress));
                    break;
                }
                CasOutcome::VersionConflict => {
                    debug!(
                        "Sign attempt {}/{} for property {} lost a version race, retrying",
                        attempt, MAX_CAS_RETRIES, property_id
                    );
                    continue;
                }
                CasOutcome::NotFound => {
                    return Err(RegistryError::NotFound(format!(
                        "pending transfer for property {}",
                        property_id
                    )));
                }
            }
        }

        let (mut persisted, progress) = outcome.ok_or(RegistryError::Contention)?;

        // The signature is durable; everything past this point is
        // best-effort ledger bookkeeping.
        let sign_tx_ref = self
            .submit_best_effort(&LedgerOp::SignTransfer {
                property_id: property_id.to_string(),
                signer: signer.to_string(),
            })
            .await;
        if let Some(tx_ref) = sign_tx_ref {
            let signer = signer.to_string();
            persisted = self.amend_record(persisted, move |record| {
                if let Some(sig) = record
                    .provided_signatures
                    .iter_mut()
                    .find(|s| s.signer == signer)
                {
                    sig.tx_ref = Some(tx_ref.clone());
                }
            });
        }

        match progress {
            SignProgress::Pending { remaining } => {
                info!(
                    "Signature from {} recorded for property {} ({} remaining)",
                    signer, property_id, remaining
                );
                Ok(SignTransferResponse {
                    transfer: persisted,
                    remaining_signatures: remaining,
                    completed: false,
                    execution_tx_ref: None,
                })
            }
            SignProgress::Completed => {
                info!(
                    "Quorum reached for property {}; executing transfer to {}",
                    property_id, persisted.new_owner
                );

                // The recorded intent wins regardless of ledger health.
                if !self
                    .store
                    .set_owner(property_id, &persisted.new_owner, Utc::now())?
                {
                    warn!(
                        "Completed transfer for unknown property {} - owner not updated",
                        property_id
                    );
                }

                let execution_tx_ref = self
                    .submit_best_effort(&LedgerOp::ExecuteTransfer {
                        property_id: property_id.to_string(),
                    })
                    .await;

                match &execution_tx_ref {
                    Some(tx_ref) => {
                        let tx_ref = tx_ref.clone();
                        persisted = self.amend_record(persisted, move |record| {
                            record.external_tx_ref = Some(tx_ref.clone());
                        });
                    }
                    None => {
                        warn!(
                            "Transfer {} completed but unconfirmed; ledger execute must be reconciled",
                            persisted.transfer_ref()
                        );
                    }
                }

                Ok(SignTransferResponse {
                    transfer: persisted,
                    remaining_signatures: 0,
                    completed: true,
                    execution_tx_ref,
                })
            }
        }
    }

    /// Cancel the pending transfer for a property.
    pub async fn cancel(
        &self,
        property_id: &str,
        requester: &str,
    ) -> Result<CancelTransferResponse, RegistryError> {
        let mut cancelled = None;

        for attempt in 1..=MAX_CAS_RETRIES {
            let now = Utc::now();
            let current = self.load_pending(property_id, now)?;

            let next = quorum::apply_cancel(&current, requester, now)?;

            match self.store.compare_and_swap(current.version, &next)? {
                CasOutcome::Applied => {
                    let mut persisted = next;
                    persisted.version = current.version + 1;
                    cancelled = Some(persisted);
                    break;
                }
                CasOutcome::VersionConflict => {
                    debug!(
                        "Cancel attempt {}/{} for property {} lost a version race, retrying",
                        attempt, MAX_CAS_RETRIES, property_id
                    );
                    continue;
                }
                CasOutcome::NotFound => {
                    return Err(RegistryError::NotFound(format!(
                        "pending transfer for property {}",
                        property_id
                    )));
                }
            }
        }

        let mut persisted = cancelled.ok_or(RegistryError::Contention)?;
        info!(
            "Transfer {} for property {} cancelled by {}",
            persisted.transfer_ref(),
            property_id,
            requester
        );

        let cancellation_tx_ref = self
            .submit_best_effort(&LedgerOp::CancelTransfer {
                property_id: property_id.to_string(),
            })
            .await;
        if let Some(tx_ref) = &cancellation_tx_ref {
            let tx_ref = tx_ref.clone();
            persisted = self.amend_record(persisted, move |record| {
                record.external_tx_ref = Some(tx_ref.clone());
            });
        }

        Ok(CancelTransferResponse {
            transfer: persisted,
            cancellation_tx_ref,
        })
    }

    /// Latest transfer for a property, lazy expiry applied.
    pub fn status(&self, property_id: &str) -> Result<TransferStatusResponse, RegistryError> {
        let now = Utc::now();
        let mut transfer = self
            .store
            .get_latest(property_id)?
            .ok_or_else(|| RegistryError::NotFound(format!("transfer for property {}", property_id)))?;

        if let Some(expired) = quorum::check_expiry(&transfer, now) {
            transfer = self.persist_expiry(expired, &transfer)?;
        }

        let time_remaining_ms = (transfer.expires_at - now).num_milliseconds().max(0) as u64;
        Ok(TransferStatusResponse {
            remaining_signatures: transfer.remaining_signatures(),
            time_remaining_ms,
            transfer,
        })
    }

    pub fn history(&self, property_id: &str) -> Result<TransferHistoryResponse, RegistryError> {
        Ok(TransferHistoryResponse {
            property_id: property_id.to_string(),
            transfers: self.store.history(property_id)?,
        })
    }

    pub fn unconfirmed(&self) -> Result<UnconfirmedTransfersResponse, RegistryError> {
        Ok(UnconfirmedTransfersResponse {
            transfers: self.store.list_unconfirmed()?,
        })
    }

    /// Move every overdue pending transfer to `EXPIRED`. Returns how
    /// many records were transitioned. CAS losers are skipped: a
    /// concurrent request already resolved those records.
    pub fn expire_due(&self) -> Result<usize, RegistryError> {
        let now = Utc::now();
        let due = self.store.list_expired_pending(now)?;
        let mut swept = 0;

        for transfer in due {
            let Some(expired) = quorum::check_expiry(&transfer, now) else {
                continue;
            };
            match self.store.compare_and_swap(transfer.version, &expired)? {
                CasOutcome::Applied => {
                    info!(
                        "Transfer {} for property {} expired (deadline {})",
                        transfer.transfer_ref(),
                        transfer.property_id,
                        transfer.expires_at
                    );
                    swept += 1;
                }
                CasOutcome::VersionConflict | CasOutcome::NotFound => {}
            }
        }

        Ok(swept)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Fetch the pending transfer, resolving lazy expiry first.
    fn load_pending(
        &self,
        property_id: &str,
        now: chrono::DateTime<Utc>,
    ) -> Result<TransferProposal, RegistryError> {
        let current = self
            .store
            .get_pending(property_id)?
            .ok_or_else(|| RegistryError::NotFound(format!(
                "pending transfer for property {}",
                property_id
            )))?;

        if let Some(expired) = quorum::check_expiry(&current, now) {
            self.persist_expiry(expired, &current)?;
            return Err(RegistryError::Expired);
        }

        Ok(current)
    }

    /// Persist an expiry transition. A lost race means someone else
    /// already moved the record on; re-fetch and return whatever won.
    fn persist_expiry(
        &self,
        expired: TransferProposal,
        current: &TransferProposal,
    ) -> Result<TransferProposal, RegistryError> {
        match self.store.compare_and_swap(current.version, &expired)? {
            CasOutcome::Applied => {
                info!(
                    "Transfer {} for property {} marked expired on access",
                    expired.transfer_ref(),
                    expired.property_id
                );
                let mut persisted = expired;
                persisted.version = current.version + 1;
                Ok(persisted)
            }
            CasOutcome::VersionConflict | CasOutcome::NotFound => self
                .store
                .get_by_id(current.id)?
                .ok_or_else(|| RegistryError::NotFound("transfer".to_string())),
        }
    }

    /// Submit a ledger operation without failing the caller. Returns
    /// the transaction reference when the ledger accepted it.
    async fn submit_best_effort(&self, op: &LedgerOp) -> Option<String> {
        match self.ledger.submit(op).await {
            Ok(receipt) => {
                debug!(
                    "Ledger accepted {} as {}",
                    op.function_name(),
                    receipt.tx_ref
                );
                Some(receipt.tx_ref)
            }
            Err(e) => {
                warn!("Ledger submission {} failed: {}", op.function_name(), e);
                None
            }
        }
    }

    /// Best-effort metadata amendment of an already-persisted record
    /// (tx refs only, never status or signatures). A lost race leaves
    /// the record untouched; returns the freshest copy we have.
    fn amend_record(
        &self,
        persisted: TransferProposal,
        amend: impl Fn(&mut TransferProposal),
    ) -> TransferProposal {
        let current = match self.store.get_by_id(persisted.id) {
            Ok(Some(current)) => current,
            _ => return persisted,
        };

        let mut next = current.clone();
        amend(&mut next);
        next.updated_at = Utc::now();

        match self.store.compare_and_swap(current.version, &next) {
            Ok(CasOutcome::Applied) => {
                let mut applied = next;
                applied.version = current.version + 1;
                applied
            }
            _ => {
                debug!(
                    "Skipped tx-ref amendment for transfer {} after version race",
                    persisted.id
                );
                persisted
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use common::store::{MemoryStore, PropertyStore, TransferStore};
    use common::TransferStatus;
    use ledger::mock::MockLedger;

    fn setup() -> (Arc<MemoryStore>, Arc<MockLedger>, Arc<TransferService>) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(MockLedger::new());
        let service = Arc::new(TransferService::new(
            store.clone() as Arc<dyn RegistryStore>,
            ledger.clone() as Arc<dyn LedgerClient>,
        ));
        (store, ledger, service)
    }

    fn register_request(property_id: &str) -> RegisterPropertyRequest {
        RegisterPropertyRequest {
            property_id: property_id.to_string(),
            location: "12 Harbor Lane".to_string(),
            area_sqm: 420,
        }
    }

    fn initiate_request(new_owner: &str, signers: &[&str]) -> InitiateTransferRequest {
        InitiateTransferRequest {
            new_owner: new_owner.to_string(),
            required_signers: signers.iter().map(|s| s.to_string()).collect(),
            window_days: Some(7),
        }
    }

    fn token() -> SignTransferRequest {
        SignTransferRequest {
            token: "sig-token".to_string(),
        }
    }

    #[tokio::test]
    async fn full_transfer_happy_path() {
        let (store, ledger, service) = setup();

        service
            .register_property(register_request("LOT-1"), "SP_ALICE")
            .await
            .unwrap();

        let initiated = service
            .initiate("LOT-1", initiate_request("SP_BOB", &["SP_ALICE", "SP_NOTARY"]), "SP_ALICE")
            .await
            .unwrap();
        assert_eq!(initiated.transfer.status, TransferStatus::Pending);
        assert!(initiated.ledger_tx_ref.is_some());

        let first = service.sign("LOT-1", "SP_ALICE", token()).await.unwrap();
        assert!(!first.completed);
        assert_eq!(first.remaining_signatures, 1);
        assert_eq!(first.transfer.status, TransferStatus::Pending);

        let second = service.sign("LOT-1", "SP_NOTARY", token()).await.unwrap();
        assert!(second.completed);
        assert_eq!(second.remaining_signatures, 0);
        assert_eq!(second.transfer.status, TransferStatus::Completed);
        assert!(second.execution_tx_ref.is_some());
        assert_eq!(second.transfer.external_tx_ref, second.execution_tx_ref);

        // Ownership follows the completed transfer.
        let property = store.get_property("LOT-1").unwrap().unwrap();
        assert_eq!(property.owner, "SP_BOB");
        assert!(property.last_transfer_at.is_some());

        // register + initiate + 2 signs + execute.
        let ops = ledger.calls();
        assert!(ops
            .iter()
            .any(|op| matches!(op, LedgerOp::ExecuteTransfer { property_id } if property_id == "LOT-1")));
        assert_eq!(ops.len(), 5);
    }

    #[tokio::test]
    async fn initiate_requires_registered_property_and_owner() {
        let (_store, _ledger, service) = setup();

        let err = service
            .initiate("LOT-404", initiate_request("SP_BOB", &["SP_ALICE"]), "SP_ALICE")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));

        service
            .register_property(register_request("LOT-1"), "SP_ALICE")
            .await
            .unwrap();

        let err = service
            .initiate("LOT-1", initiate_request("SP_BOB", &["SP_MALLORY"]), "SP_MALLORY")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn second_initiation_while_pending_is_rejected() {
        let (_store, _ledger, service) = setup();
        service
            .register_property(register_request("LOT-1"), "SP_ALICE")
            .await
            .unwrap();
        service
            .initiate("LOT-1", initiate_request("SP_BOB", &["SP_ALICE"]), "SP_ALICE")
            .await
            .unwrap();

        let err = service
            .initiate("LOT-1", initiate_request("SP_CAROL", &["SP_ALICE"]), "SP_ALICE")
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyPending(_)));
    }

    #[tokio::test]
    async fn unauthorized_signer_mutates_nothing() {
        let (store, _ledger, service) = setup();
        service
            .register_property(register_request("LOT-1"), "SP_ALICE")
            .await
            .unwrap();
        service
            .initiate("LOT-1", initiate_request("SP_BOB", &["SP_ALICE", "SP_NOTARY"]), "SP_ALICE")
            .await
            .unwrap();

        let err = service.sign("LOT-1", "SP_MALLORY", token()).await.unwrap_err();
        assert!(matches!(err, RegistryError::Unauthorized(_)));

        let stored = store.get_pending("LOT-1").unwrap().unwrap();
        assert!(stored.provided_signatures.is_empty());
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn double_sign_is_rejected() {
        let (_store, _ledger, service) = setup();
        service
            .register_property(register_request("LOT-1"), "SP_ALICE")
            .await
            .unwrap();
        service
            .initiate("LOT-1", initiate_request("SP_BOB", &["SP_ALICE", "SP_NOTARY"]), "SP_ALICE")
            .await
            .unwrap();

        service.sign("LOT-1", "SP_ALICE", token()).await.unwrap();
        let err = service.sign("LOT-1", "SP_ALICE", token()).await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadySigned(_)));
    }

    #[tokio::test]
    async fn sign_after_deadline_fails_and_marks_record_expired() {
        let (store, _ledger, service) = setup();
        service
            .register_property(register_request("LOT-1"), "SP_ALICE")
            .await
            .unwrap();

        // Seed an already-overdue proposal directly; the service
        // cannot create one thanks to the window clamp.
        let mut proposal = quorum::new_proposal(
            "LOT-1",
            "SP_ALICE",
            "SP_BOB",
            vec!["SP_ALICE".to_string()],
            Some(7),
            "SP_ALICE",
            Utc::now(),
        )
        .unwrap();
        proposal.expires_at = Utc::now() - Duration::hours(1);
        store.create_transfer(&proposal).unwrap();

        let err = service.sign("LOT-1", "SP_ALICE", token()).await.unwrap_err();
        assert!(matches!(err, RegistryError::Expired));

        // Lazy expiry persisted the terminal state.
        let stored = store.get_by_id(proposal.id).unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::Expired);
        assert!(store.get_pending("LOT-1").unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_then_sign_reports_no_pending_transfer() {
        let (_store, ledger, service) = setup();
        service
            .register_property(register_request("LOT-1"), "SP_ALICE")
            .await
            .unwrap();
        service
            .initiate("LOT-1", initiate_request("SP_BOB", &["SP_ALICE", "SP_CAROL"]), "SP_ALICE")
            .await
            .unwrap();

        let cancelled = service.cancel("LOT-1", "SP_ALICE").await.unwrap();
        assert_eq!(cancelled.transfer.status, TransferStatus::Cancelled);
        assert!(cancelled.cancellation_tx_ref.is_some());
        assert!(ledger
            .calls()
            .iter()
            .any(|op| matches!(op, LedgerOp::CancelTransfer { .. })));

        let err = service.sign("LOT-1", "SP_ALICE", token()).await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn cancel_by_stranger_is_unauthorized_and_leaves_status() {
        let (store, _ledger, service) = setup();
        service
            .register_property(register_request("LOT-1"), "SP_ALICE")
            .await
            .unwrap();
        service
            .initiate("LOT-1", initiate_request("SP_BOB", &["SP_ALICE"]), "SP_ALICE")
            .await
            .unwrap();

        let err = service.cancel("LOT-1", "SP_MALLORY").await.unwrap_err();
        assert!(matches!(err, RegistryError::Unauthorized(_)));
        assert_eq!(
            store.get_pending("LOT-1").unwrap().unwrap().status,
            TransferStatus::Pending
        );
    }

    #[tokio::test]
    async fn ledger_outage_on_execute_leaves_completed_unconfirmed() {
        let (store, ledger, service) = setup();
        service
            .register_property(register_request("LOT-1"), "SP_ALICE")
            .await
            .unwrap();
        service
            .initiate("LOT-1", initiate_request("SP_BOB", &["SP_ALICE"]), "SP_ALICE")
            .await
            .unwrap();

        ledger.set_fail_submissions(true);
        let result = service.sign("LOT-1", "SP_ALICE", token()).await.unwrap();

        // The state transition stands; only the confirmation is missing.
        assert!(result.completed);
        assert!(result.execution_tx_ref.is_none());
        assert_eq!(result.transfer.status, TransferStatus::Completed);
        assert!(result.transfer.external_tx_ref.is_none());

        let unconfirmed = service.unconfirmed().unwrap();
        assert_eq!(unconfirmed.transfers.len(), 1);

        // Ownership still follows the authoritative store.
        assert_eq!(store.get_property("LOT-1").unwrap().unwrap().owner, "SP_BOB");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_final_signers_complete_exactly_once() {
        let (store, ledger, service) = setup();
        service
            .register_property(register_request("LOT-1"), "SP_ALICE")
            .await
            .unwrap();
        service
            .initiate("LOT-1", initiate_request("SP_BOB", &["SP_ALICE", "SP_NOTARY"]), "SP_ALICE")
            .await
            .unwrap();

        let a = {
            let service = service.clone();
            tokio::spawn(async move { service.sign("LOT-1", "SP_ALICE", token()).await })
        };
        let b = {
            let service = service.clone();
            tokio::spawn(async move { service.sign("LOT-1", "SP_NOTARY", token()).await })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        // Exactly one of the two observed the completing transition.
        assert_eq!([a.completed, b.completed].iter().filter(|c| **c).count(), 1);

        let stored = store.get_latest("LOT-1").unwrap().unwrap();
        assert_eq!(stored.status, TransferStatus::Completed);
        assert_eq!(stored.provided_signatures.len(), 2);

        let executes = ledger
            .calls()
            .iter()
            .filter(|op| matches!(op, LedgerOp::ExecuteTransfer { .. }))
            .count();
        assert_eq!(executes, 1);
    }

    #[tokio::test]
    async fn exhausted_version_races_surface_contention() {
        struct ContendedStore {
            inner: MemoryStore,
        }

        impl common::store::TransferStore for ContendedStore {
            fn create_transfer(&self, p: &TransferProposal) -> Result<(), RegistryError> {
                self.inner.create_transfer(p)
            }
            fn get_pending(&self, id: &str) -> Result<Option<TransferProposal>, RegistryError> {
                self.inner.get_pending(id)
            }
            fn get_latest(&self, id: &str) -> Result<Option<TransferProposal>, RegistryError> {
                self.inner.get_latest(id)
            }
            fn get_by_id(&self, id: Uuid) -> Result<Option<TransferProposal>, RegistryError> {
                self.inner.get_by_id(id)
            }
            fn compare_and_swap(
                &self,
                _expected: u64,
                _next: &TransferProposal,
            ) -> Result<CasOutcome, RegistryError> {
                // Every write loses, as if other signers keep winning.
                Ok(CasOutcome::VersionConflict)
            }
            fn history(&self, id: &str) -> Result<Vec<TransferProposal>, RegistryError> {
                self.inner.history(id)
            }
            fn list_by_status(
                &self,
                status: TransferStatus,
            ) -> Result<Vec<TransferProposal>, RegistryError> {
                self.inner.list_by_status(status)
            }
            fn list_expired_pending(
                &self,
                now: chrono::DateTime<Utc>,
            ) -> Result<Vec<TransferProposal>, RegistryError> {
                self.inner.list_expired_pending(now)
            }
            fn list_unconfirmed(&self) -> Result<Vec<TransferProposal>, RegistryError> {
                self.inner.list_unconfirmed()
            }
        }

        impl common::store::PropertyStore for ContendedStore {
            fn put_property(&self, p: &PropertyRecord) -> Result<(), RegistryError> {
                self.inner.put_property(p)
            }
            fn get_property(&self, id: &str) -> Result<Option<PropertyRecord>, RegistryError> {
                self.inner.get_property(id)
            }
            fn list_properties(&self) -> Result<Vec<PropertyRecord>, RegistryError> {
                self.inner.list_properties()
            }
            fn set_owner(
                &self,
                id: &str,
                owner: &str,
                at: chrono::DateTime<Utc>,
            ) -> Result<bool, RegistryError> {
                self.inner.set_owner(id, owner, at)
            }
        }

        let store = Arc::new(ContendedStore {
            inner: MemoryStore::new(),
        });
        let ledger = Arc::new(MockLedger::new());
        let service = TransferService::new(store.clone(), ledger);

        service
            .register_property(register_request("LOT-1"), "SP_ALICE")
            .await
            .unwrap();
        service
            .initiate("LOT-1", initiate_request("SP_BOB", &["SP_ALICE"]), "SP_ALICE")
            .await
            .unwrap();

        let err = service.sign("LOT-1", "SP_ALICE", token()).await.unwrap_err();
        assert!(matches!(err, RegistryError::Contention));
    }

    #[tokio::test]
    async fn sweeper_expires_overdue_transfers() {
        let (store, _ledger, service) = setup();
        service
            .register_property(register_request("LOT-1"), "SP_ALICE")
            .await
            .unwrap();
        service
            .register_property(register_request("LOT-2"), "SP_ALICE")
            .await
            .unwrap();

        let mut overdue = quorum::new_proposal(
            "LOT-1",
            "SP_ALICE",
            "SP_BOB",
            vec!["SP_ALICE".to_string()],
            Some(7),
            "SP_ALICE",
            Utc::now(),
        )
        .unwrap();
        overdue.expires_at = Utc::now() - Duration::minutes(5);
        store.create_transfer(&overdue).unwrap();

        service
            .initiate("LOT-2", initiate_request("SP_BOB", &["SP_ALICE"]), "SP_ALICE")
            .await
            .unwrap();

        assert_eq!(service.expire_due().unwrap(), 1);
        assert_eq!(
            store.get_by_id(overdue.id).unwrap().unwrap().status,
            TransferStatus::Expired
        );
        // The live proposal is untouched.
        assert!(store.get_pending("LOT-2").unwrap().is_some());
        assert_eq!(service.expire_due().unwrap(), 0);
    }

    #[tokio::test]
    async fn status_applies_lazy_expiry_and_reports_time_remaining() {
        let (store, _ledger, service) = setup();
        service
            .register_property(register_request("LOT-1"), "SP_ALICE")
            .await
            .unwrap();
        service
            .initiate("LOT-1", initiate_request("SP_BOB", &["SP_ALICE", "SP_NOTARY"]), "SP_ALICE")
            .await
            .unwrap();

        let status = service.status("LOT-1").unwrap();
        assert_eq!(status.remaining_signatures, 2);
        assert!(status.time_remaining_ms > 0);

        // Force the deadline into the past and read again.
        let mut overdue = store.get_pending("LOT-1").unwrap().unwrap();
        overdue.expires_at = Utc::now() - Duration::seconds(1);
        let version = overdue.version;
        store.compare_and_swap(version, &overdue).unwrap();

        let status = service.status("LOT-1").unwrap();
        assert_eq!(status.transfer.status, TransferStatus::Expired);
        assert_eq!(status.time_remaining_ms, 0);

        let err = service.status("LOT-404").unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }
}

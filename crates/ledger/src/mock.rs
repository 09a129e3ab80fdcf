//! Scriptable in-process ledger for tests and local development.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use crate::{ConfirmOutcome, ConfirmStatus, LedgerClient, LedgerError, LedgerOp, SubmitReceipt, TxStatus};

/// In-memory ledger double. Records every submitted operation and can
/// be told to fail submissions to exercise degraded paths.
#[derive(Default)]
pub struct MockLedger {
    calls: Mutex<Vec<LedgerOp>>,
    fail_submissions: AtomicBool,
    counter: AtomicU64,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All operations submitted so far, in order.
    pub fn calls(&self) -> Vec<LedgerOp> {
        self.calls.lock().expect("mock ledger lock poisoned").clone()
    }

    /// Make subsequent `submit` calls fail with `Unavailable`.
    pub fn set_fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    pub fn submission_count(&self) -> usize {
        self.calls.lock().expect("mock ledger lock poisoned").len()
    }
}

#[async_trait::async_trait]
impl LedgerClient for MockLedger {
    async fn submit(&self, op: &LedgerOp) -> Result<SubmitReceipt, LedgerError> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("mock ledger offline".to_string()));
        }

        self.calls
            .lock()
            .expect("mock ledger lock poisoned")
            .push(op.clone());

        let seq = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(SubmitReceipt {
            tx_ref: format!("mock-{}-{:08x}", op.function_name(), seq),
            status: TxStatus::Pending,
        })
    }

    async fn confirm(&self, _tx_ref: &str) -> Result<ConfirmOutcome, LedgerError> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(LedgerError::Unavailable("mock ledger offline".to_string()));
        }
        Ok(ConfirmOutcome {
            status: ConfirmStatus::Success,
            result: None,
        })
    }
}

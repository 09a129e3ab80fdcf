//! Persistent storage for properties and transfer proposals.
//!
//! SQLite is the durable backend. Every transfer row carries a version
//! stamp; mutations go through [`TransferStore::compare_and_swap`] so
//! concurrent signers are detected instead of overwriting each other.
//! The "at most one PENDING transfer per property" invariant is
//! enforced in the database itself with a partial unique index.
//!
//! [`MemoryStore`] is the in-memory reference implementation with the
//! same semantics, used in tests and local development.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result as SqlResult};
use uuid::Uuid;

use crate::types::{PropertyRecord, PropertyStatus, TransferProposal, TransferStatus};
use crate::RegistryError;

/// Result of an optimistic-concurrency write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// The write landed; the stored version is now `expected + 1`.
    Applied,
    /// Someone else updated the record first. Re-fetch and re-evaluate.
    VersionConflict,
    /// No record with that id exists.
    NotFound,
}

/// Keyed storage for transfer proposals with per-record CAS.
pub trait TransferStore: Send + Sync {
    /// Insert a new proposal. Fails with `AlreadyPending` when the
    /// property already has a pending transfer.
    fn create_transfer(&self, proposal: &TransferProposal) -> Result<(), RegistryError>;

    /// The pending proposal for a property, if any.
    fn get_pending(&self, property_id: &str) -> Result<Option<TransferProposal>, RegistryError>;

    /// The most recently created proposal for a property, any status.
    fn get_latest(&self, property_id: &str) -> Result<Option<TransferProposal>, RegistryError>;

    fn get_by_id(&self, id: Uuid) -> Result<Option<TransferProposal>, RegistryError>;

    /// Write `next` over the record with `next.id`, but only if the
    /// stored version still equals `expected_version`. The stored
    /// version becomes `expected_version + 1`.
    fn compare_and_swap(
        &self,
        expected_version: u64,
        next: &TransferProposal,
    ) -> Result<CasOutcome, RegistryError>;

    /// All proposals ever created for a property, newest first.
    fn history(&self, property_id: &str) -> Result<Vec<TransferProposal>, RegistryError>;

    fn list_by_status(&self, status: TransferStatus) -> Result<Vec<TransferProposal>, RegistryError>;

    /// Pending proposals whose deadline has passed (sweeper input).
    fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransferProposal>, RegistryError>;

    /// Completed or cancelled proposals with no ledger confirmation
    /// yet. A reconciliation process drains these.
    fn list_unconfirmed(&self) -> Result<Vec<TransferProposal>, RegistryError>;
}

/// Storage for registered properties.
pub trait PropertyStore: Send + Sync {
    fn put_property(&self, property: &PropertyRecord) -> Result<(), RegistryError>;

    fn get_property(&self, property_id: &str) -> Result<Option<PropertyRecord>, RegistryError>;

    fn list_properties(&self) -> Result<Vec<PropertyRecord>, RegistryError>;

    /// Record a completed ownership change. Returns false when the
    /// property does not exist.
    fn set_owner(
        &self,
        property_id: &str,
        owner: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RegistryError>;
}

/// Combined store the lifecycle service is built against.
pub trait RegistryStore: TransferStore + PropertyStore {}

impl<T: TransferStore + PropertyStore> RegistryStore for T {}

// ============================================================================
// SQLite store
// ============================================================================

/// Durable store backed by SQLite.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, RegistryError> {
        let conn = Connection::open(path)
            .map_err(|e| RegistryError::Storage(format!("Failed to open database: {}", e)))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, RegistryError> {
        let conn = Connection::open_in_memory().map_err(|e| {
            RegistryError::Storage(format!("Failed to open in-memory database: {}", e))
        })?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        Ok(store)
    }

    fn init_schema(&self) -> Result<(), RegistryError> {
        let conn = self.lock_conn()?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS properties (
                property_id      TEXT PRIMARY KEY,
                owner            TEXT NOT NULL,
                location         TEXT NOT NULL,
                area_sqm         INTEGER NOT NULL,
                status           TEXT NOT NULL,
                registered_at    TEXT NOT NULL,
                last_transfer_at TEXT
            );

            CREATE TABLE IF NOT EXISTS transfers (
                id                  TEXT PRIMARY KEY,
                property_id         TEXT NOT NULL,
                current_owner       TEXT NOT NULL,
                new_owner           TEXT NOT NULL,
                required_signers    TEXT NOT NULL,
                provided_signatures TEXT NOT NULL,
                status              TEXT NOT NULL,
                expires_at          TEXT NOT NULL,
                initiated_by        TEXT NOT NULL,
                external_tx_ref     TEXT,
                version             INTEGER NOT NULL,
                created_at          TEXT NOT NULL,
                updated_at          TEXT NOT NULL
            );

            -- At most one PENDING transfer per property, enforced by
            -- the database rather than a check-then-insert race.
            CREATE UNIQUE INDEX IF NOT EXISTS idx_transfers_one_pending
                ON transfers(property_id) WHERE status = 'PENDING';

            CREATE INDEX IF NOT EXISTS idx_transfers_property
                ON transfers(property_id);
            CREATE INDEX IF NOT EXISTS idx_transfers_status_expiry
                ON transfers(status, expires_at);",
        )
        .map_err(|e| RegistryError::Storage(format!("Failed to create schema: {}", e)))?;

        tracing::debug!("Registry store schema initialized");
        Ok(())
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RegistryError> {
        self.conn
            .lock()
            .map_err(|e| RegistryError::Storage(format!("Lock error: {}", e)))
    }

    fn query_transfers(
        &self,
        sql: &str,
        bind: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<TransferProposal>, RegistryError> {
        let conn = self.lock_conn()?;

        let mut stmt = conn
            .prepare(sql)
            .map_err(|e| RegistryError::Storage(format!("Query error: {}", e)))?;

        let transfers = stmt
            .query_map(bind, row_to_transfer)
            .map_err(|e| RegistryError::Storage(format!("Query error: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RegistryError::Storage(format!("Query error: {}", e)))?;

        Ok(transfers)
    }
}

const TRANSFER_COLUMNS: &str = "id, property_id, current_owner, new_owner, required_signers, \
     provided_signatures, status, expires_at, initiated_by, external_tx_ref, \
     version, created_at, updated_at";

fn row_to_transfer(row: &rusqlite::Row<'_>) -> SqlResult<TransferProposal> {
    let id_str: String = row.get(0)?;
    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("invalid UUID '{}': {}", id_str, e).into(),
        )
    })?;

    let signers_json: String = row.get(4)?;
    let required_signers: Vec<String> = serde_json::from_str(&signers_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("invalid required_signers JSON: {}", e).into(),
        )
    })?;

    let signatures_json: String = row.get(5)?;
    let provided_signatures = serde_json::from_str(&signatures_json).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            5,
            rusqlite::types::Type::Text,
            format!("invalid provided_signatures JSON: {}", e).into(),
        )
    })?;

    let status_str: String = row.get(6)?;
    let status = TransferStatus::parse(&status_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(TransferProposal {
        id,
        property_id: row.get(1)?,
        current_owner: row.get(2)?,
        new_owner: row.get(3)?,
        required_signers,
        provided_signatures,
        status,
        expires_at: parse_timestamp(row, 7)?,
        initiated_by: row.get(8)?,
        external_tx_ref: row.get(9)?,
        version: row.get::<_, i64>(10)? as u64,
        created_at: parse_timestamp(row, 11)?,
        updated_at: parse_timestamp(row, 12)?,
    })
}

fn parse_timestamp(row: &rusqlite::Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                idx,
                rusqlite::types::Type::Text,
                format!("invalid timestamp '{}': {}", raw, e).into(),
            )
        })
}

fn row_to_property(row: &rusqlite::Row<'_>) -> SqlResult<PropertyRecord> {
    let status_str: String = row.get(4)?;
    let status = PropertyStatus::parse(&status_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, e.into())
    })?;

    let last_transfer_at: Option<String> = row.get(6)?;
    let last_transfer_at = match last_transfer_at {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        6,
                        rusqlite::types::Type::Text,
                        format!("invalid timestamp '{}': {}", raw, e).into(),
                    )
                })?,
        ),
        None => None,
    };

    Ok(PropertyRecord {
        property_id: row.get(0)?,
        owner: row.get(1)?,
        location: row.get(2)?,
        area_sqm: row.get::<_, i64>(3)? as u64,
        status,
        registered_at: parse_timestamp(row, 5)?,
        last_transfer_at,
    })
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl TransferStore for SqliteStore {
    fn create_transfer(&self, proposal: &TransferProposal) -> Result<(), RegistryError> {
        let conn = self.lock_conn()?;

        let signers_json = serde_json::to_string(&proposal.required_signers)
            .map_err(|e| RegistryError::Storage(e.to_string()))?;
        let signatures_json = serde_json::to_string(&proposal.provided_signatures)
            .map_err(|e| RegistryError::Storage(e.to_string()))?;

        let result = conn.execute(
            "INSERT INTO transfers (id, property_id, current_owner, new_owner, required_signers,
                 provided_signatures, status, expires_at, initiated_by, external_tx_ref,
                 version, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                proposal.id.to_string(),
                proposal.property_id,
                proposal.current_owner,
                proposal.new_owner,
                signers_json,
                signatures_json,
                proposal.status.as_str(),
                proposal.expires_at.to_rfc3339(),
                proposal.initiated_by,
                proposal.external_tx_ref,
                proposal.version as i64,
                proposal.created_at.to_rfc3339(),
                proposal.updated_at.to_rfc3339(),
            ],
        );

        match result {
            Ok(_) => {
                tracing::info!(
                    "Created transfer {} for property {} (expires {})",
                    proposal.id,
                    proposal.property_id,
                    proposal.expires_at
                );
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => {
                Err(RegistryError::AlreadyPending(proposal.property_id.clone()))
            }
            Err(e) => Err(RegistryError::Storage(format!(
                "Failed to create transfer: {}",
                e
            ))),
        }
    }

    fn get_pending(&self, property_id: &str) -> Result<Option<TransferProposal>, RegistryError> {
        let conn = self.lock_conn()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM transfers WHERE property_id = ?1 AND status = 'PENDING'",
                TRANSFER_COLUMNS
            ))
            .map_err(|e| RegistryError::Storage(format!("Query error: {}", e)))?;

        stmt.query_row(params![property_id], row_to_transfer)
            .optional()
            .map_err(|e| RegistryError::Storage(format!("Query error: {}", e)))
    }

    fn get_latest(&self, property_id: &str) -> Result<Option<TransferProposal>, RegistryError> {
        let conn = self.lock_conn()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM transfers WHERE property_id = ?1
                 ORDER BY created_at DESC LIMIT 1",
                TRANSFER_COLUMNS
            ))
            .map_err(|e| RegistryError::Storage(format!("Query error: {}", e)))?;

        stmt.query_row(params![property_id], row_to_transfer)
            .optional()
            .map_err(|e| RegistryError::Storage(format!("Query error: {}", e)))
    }

    fn get_by_id(&self, id: Uuid) -> Result<Option<TransferProposal>, RegistryError> {
        let conn = self.lock_conn()?;

        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM transfers WHERE id = ?1",
                TRANSFER_COLUMNS
            ))
            .map_err(|e| RegistryError::Storage(format!("Query error: {}", e)))?;

        stmt.query_row(params![id.to_string()], row_to_transfer)
            .optional()
            .map_err(|e| RegistryError::Storage(format!("Query error: {}", e)))
    }

    fn compare_and_swap(
        &self,
        expected_version: u64,
        next: &TransferProposal,
    ) -> Result<CasOutcome, RegistryError> {
        let conn = self.lock_conn()?;

        let signatures_json = serde_json::to_string(&next.provided_signatures)
            .map_err(|e| RegistryError::Storage(e.to_string()))?;

        // required_signers is immutable after creation and is not
        // rewritten here.
        let rows = conn
            .execute(
                "UPDATE transfers
                 SET provided_signatures = ?1,
                     status = ?2,
                     external_tx_ref = ?3,
                     version = ?4,
                     updated_at = ?5
                 WHERE id = ?6 AND version = ?7",
                params![
                    signatures_json,
                    next.status.as_str(),
                    next.external_tx_ref,
                    (expected_version + 1) as i64,
                    next.updated_at.to_rfc3339(),
                    next.id.to_string(),
                    expected_version as i64,
                ],
            )
            .map_err(|e| RegistryError::Storage(format!("Update error: {}", e)))?;

        if rows > 0 {
            return Ok(CasOutcome::Applied);
        }

        // Distinguish a lost race from a missing record.
        let exists: bool = conn
            .query_row(
                "SELECT COUNT(*) FROM transfers WHERE id = ?1",
                params![next.id.to_string()],
                |row| row.get::<_, i64>(0).map(|c| c > 0),
            )
            .map_err(|e| RegistryError::Storage(format!("Query error: {}", e)))?;

        if exists {
            Ok(CasOutcome::VersionConflict)
        } else {
            Ok(CasOutcome::NotFound)
        }
    }

    fn history(&self, property_id: &str) -> Result<Vec<TransferProposal>, RegistryError> {
        self.query_transfers(
            &format!(
                "SELECT {} FROM transfers WHERE property_id = ?1 ORDER BY created_at DESC",
                TRANSFER_COLUMNS
            ),
            &[&property_id],
        )
    }

    fn list_by_status(
        &self,
        status: TransferStatus,
    ) -> Result<Vec<TransferProposal>, RegistryError> {
        self.query_transfers(
            &format!(
                "SELECT {} FROM transfers WHERE status = ?1 ORDER BY created_at DESC",
                TRANSFER_COLUMNS
            ),
            &[&status.as_str()],
        )
    }

    fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransferProposal>, RegistryError> {
        self.query_transfers(
            &format!(
                "SELECT {} FROM transfers
                 WHERE status = 'PENDING' AND expires_at <= ?1
                 ORDER BY expires_at ASC",
                TRANSFER_COLUMNS
            ),
            &[&now.to_rfc3339()],
        )
    }

    fn list_unconfirmed(&self) -> Result<Vec<TransferProposal>, RegistryError> {
        self.query_transfers(
            &format!(
                "SELECT {} FROM transfers
                 WHERE status IN ('COMPLETED', 'CANCELLED') AND external_tx_ref IS NULL
                 ORDER BY updated_at ASC",
                TRANSFER_COLUMNS
            ),
            &[],
        )
    }
}

impl PropertyStore for SqliteStore {
    fn put_property(&self, property: &PropertyRecord) -> Result<(), RegistryError> {
        let conn = self.lock_conn()?;

        let result = conn.execute(
            "INSERT INTO properties (property_id, owner, location, area_sqm, status,
                 registered_at, last_transfer_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                property.property_id,
                property.owner,
                property.location,
                property.area_sqm as i64,
                property.status.as_str(),
                property.registered_at.to_rfc3339(),
                property.last_transfer_at.map(|t| t.to_rfc3339()),
            ],
        );

        match result {
            Ok(_) => {
                tracing::info!(
                    "Registered property {} (owner {})",
                    property.property_id,
                    property.owner
                );
                Ok(())
            }
            Err(e) if is_unique_violation(&e) => Err(RegistryError::Validation(format!(
                "property {} is already registered",
                property.property_id
            ))),
            Err(e) => Err(RegistryError::Storage(format!(
                "Failed to register property: {}",
                e
            ))),
        }
    }

    fn get_property(&self, property_id: &str) -> Result<Option<PropertyRecord>, RegistryError> {
        let conn = self.lock_conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT property_id, owner, location, area_sqm, status, registered_at,
                        last_transfer_at
                 FROM properties WHERE property_id = ?1",
            )
            .map_err(|e| RegistryError::Storage(format!("Query error: {}", e)))?;

        stmt.query_row(params![property_id], row_to_property)
            .optional()
            .map_err(|e| RegistryError::Storage(format!("Query error: {}", e)))
    }

    fn list_properties(&self) -> Result<Vec<PropertyRecord>, RegistryError> {
        let conn = self.lock_conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT property_id, owner, location, area_sqm, status, registered_at,
                        last_transfer_at
                 FROM properties ORDER BY registered_at DESC",
            )
            .map_err(|e| RegistryError::Storage(format!("Query error: {}", e)))?;

        let properties = stmt
            .query_map([], row_to_property)
            .map_err(|e| RegistryError::Storage(format!("Query error: {}", e)))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RegistryError::Storage(format!("Query error: {}", e)))?;

        Ok(properties)
    }

    fn set_owner(
        &self,
        property_id: &str,
        owner: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        let conn = self.lock_conn()?;

        let rows = conn
            .execute(
                "UPDATE properties SET owner = ?1, last_transfer_at = ?2 WHERE property_id = ?3",
                params![owner, at.to_rfc3339(), property_id],
            )
            .map_err(|e| RegistryError::Storage(format!("Update error: {}", e)))?;

        Ok(rows > 0)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
struct MemoryInner {
    properties: HashMap<String, PropertyRecord>,
    transfers: HashMap<Uuid, TransferProposal>,
}

/// In-memory reference store with the same CAS semantics as SQLite.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>, RegistryError> {
        self.inner
            .lock()
            .map_err(|e| RegistryError::Storage(format!("Lock error: {}", e)))
    }
}

impl TransferStore for MemoryStore {
    fn create_transfer(&self, proposal: &TransferProposal) -> Result<(), RegistryError> {
        let mut inner = self.lock()?;

        let has_pending = inner.transfers.values().any(|t| {
            t.property_id == proposal.property_id && t.status == TransferStatus::Pending
        });
        if has_pending {
            return Err(RegistryError::AlreadyPending(proposal.property_id.clone()));
        }

        inner.transfers.insert(proposal.id, proposal.clone());
        Ok(())
    }

    fn get_pending(&self, property_id: &str) -> Result<Option<TransferProposal>, RegistryError> {
        let inner = self.lock()?;
        Ok(inner
            .transfers
            .values()
            .find(|t| t.property_id == property_id && t.status == TransferStatus::Pending)
            .cloned())
    }

    fn get_latest(&self, property_id: &str) -> Result<Option<TransferProposal>, RegistryError> {
        let inner = self.lock()?;
        Ok(inner
            .transfers
            .values()
            .filter(|t| t.property_id == property_id)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    fn get_by_id(&self, id: Uuid) -> Result<Option<TransferProposal>, RegistryError> {
        let inner = self.lock()?;
        Ok(inner.transfers.get(&id).cloned())
    }

    fn compare_and_swap(
        &self,
        expected_version: u64,
        next: &TransferProposal,
    ) -> Result<CasOutcome, RegistryError> {
        let mut inner = self.lock()?;

        let Some(stored) = inner.transfers.get_mut(&next.id) else {
            return Ok(CasOutcome::NotFound);
        };

        if stored.version != expected_version {
            return Ok(CasOutcome::VersionConflict);
        }

        let mut updated = next.clone();
        updated.version = expected_version + 1;
        *stored = updated;
        Ok(CasOutcome::Applied)
    }

    fn history(&self, property_id: &str) -> Result<Vec<TransferProposal>, RegistryError> {
        let inner = self.lock()?;
        let mut transfers: Vec<_> = inner
            .transfers
            .values()
            .filter(|t| t.property_id == property_id)
            .cloned()
            .collect();
        transfers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transfers)
    }

    fn list_by_status(
        &self,
        status: TransferStatus,
    ) -> Result<Vec<TransferProposal>, RegistryError> {
        let inner = self.lock()?;
        Ok(inner
            .transfers
            .values()
            .filter(|t| t.status == status)
            .cloned()
            .collect())
    }

    fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<TransferProposal>, RegistryError> {
        let inner = self.lock()?;
        Ok(inner
            .transfers
            .values()
            .filter(|t| t.status == TransferStatus::Pending && t.is_past_deadline(now))
            .cloned()
            .collect())
    }

    fn list_unconfirmed(&self) -> Result<Vec<TransferProposal>, RegistryError> {
        let inner = self.lock()?;
        Ok(inner
            .transfers
            .values()
            .filter(|t| {
                matches!(
                    t.status,
                    TransferStatus::Completed | TransferStatus::Cancelled
                ) && t.external_tx_ref.is_none()
            })
            .cloned()
            .collect())
    }
}

impl PropertyStore for MemoryStore {
    fn put_property(&self, property: &PropertyRecord) -> Result<(), RegistryError> {
        let mut inner = self.lock()?;
        if inner.properties.contains_key(&property.property_id) {
            return Err(RegistryError::Validation(format!(
                "property {} is already registered",
                property.property_id
            )));
        }
        inner
            .properties
            .insert(property.property_id.clone(), property.clone());
        Ok(())
    }

    fn get_property(&self, property_id: &str) -> Result<Option<PropertyRecord>, RegistryError> {
        let inner = self.lock()?;
        Ok(inner.properties.get(property_id).cloned())
    }

    fn list_properties(&self) -> Result<Vec<PropertyRecord>, RegistryError> {
        let inner = self.lock()?;
        let mut properties: Vec<_> = inner.properties.values().cloned().collect();
        properties.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
        Ok(properties)
    }

    fn set_owner(
        &self,
        property_id: &str,
        owner: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, RegistryError> {
        let mut inner = self.lock()?;
        match inner.properties.get_mut(property_id) {
            Some(property) => {
                property.owner = owner.to_string();
                property.last_transfer_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// Extend the optional trait for rusqlite
trait OptionalExt<T> {
    fn optional(self) -> SqlResult<Option<T>>;
}

impl<T> OptionalExt<T> for SqlResult<T> {
    fn optional(self) -> SqlResult<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quorum;
    use chrono::Duration;

    fn proposal(property_id: &str) -> TransferProposal {
        quorum::new_proposal(
            property_id,
            "SP_ALICE",
            "SP_BOB",
            vec!["SP_ALICE".to_string(), "SP_NOTARY".to_string()],
            Some(7),
            "SP_ALICE",
            Utc::now(),
        )
        .unwrap()
    }

    fn property(property_id: &str) -> PropertyRecord {
        PropertyRecord {
            property_id: property_id.to_string(),
            owner: "SP_ALICE".to_string(),
            location: "12 Harbor Lane".to_string(),
            area_sqm: 420,
            status: PropertyStatus::Active,
            registered_at: Utc::now(),
            last_transfer_at: None,
        }
    }

    fn stores() -> Vec<Box<dyn RegistryStore>> {
        vec![
            Box::new(SqliteStore::open_in_memory().unwrap()),
            Box::new(MemoryStore::new()),
        ]
    }

    #[test]
    fn create_and_fetch_transfer() {
        for store in stores() {
            let p = proposal("LOT-1");
            store.create_transfer(&p).unwrap();

            let loaded = store.get_pending("LOT-1").unwrap().unwrap();
            assert_eq!(loaded.id, p.id);
            assert_eq!(loaded.required_signers, p.required_signers);
            assert_eq!(loaded.version, 1);
            assert_eq!(loaded.status, TransferStatus::Pending);

            assert!(store.get_pending("LOT-2").unwrap().is_none());
            assert_eq!(store.get_by_id(p.id).unwrap().unwrap().id, p.id);
        }
    }

    #[test]
    fn second_pending_for_same_property_is_rejected() {
        for store in stores() {
            store.create_transfer(&proposal("LOT-1")).unwrap();
            let err = store.create_transfer(&proposal("LOT-1")).unwrap_err();
            assert!(matches!(err, RegistryError::AlreadyPending(_)));
        }
    }

    #[test]
    fn new_pending_allowed_after_previous_is_terminal() {
        for store in stores() {
            let p = proposal("LOT-1");
            store.create_transfer(&p).unwrap();

            let mut cancelled = p.clone();
            cancelled.status = TransferStatus::Cancelled;
            cancelled.updated_at = Utc::now();
            assert_eq!(
                store.compare_and_swap(1, &cancelled).unwrap(),
                CasOutcome::Applied
            );

            // With the old proposal terminal, a new one may start.
            store.create_transfer(&proposal("LOT-1")).unwrap();
        }
    }

    #[test]
    fn cas_detects_stale_version() {
        for store in stores() {
            let p = proposal("LOT-1");
            store.create_transfer(&p).unwrap();

            let t = quorum::apply_signature(&p, "SP_ALICE", "tok-a", Utc::now()).unwrap();
            assert_eq!(
                store.compare_and_swap(1, &t.proposal).unwrap(),
                CasOutcome::Applied
            );

            // A write based on the original read must lose.
            let stale = quorum::apply_signature(&p, "SP_NOTARY", "tok-n", Utc::now()).unwrap();
            assert_eq!(
                store.compare_and_swap(1, &stale.proposal).unwrap(),
                CasOutcome::VersionConflict
            );

            // Version bumped exactly once.
            let current = store.get_by_id(p.id).unwrap().unwrap();
            assert_eq!(current.version, 2);
            assert_eq!(current.provided_signatures.len(), 1);
            assert_eq!(current.provided_signatures[0].signer, "SP_ALICE");
        }
    }

    #[test]
    fn cas_on_unknown_record_is_not_found() {
        for store in stores() {
            let p = proposal("LOT-9");
            assert_eq!(store.compare_and_swap(1, &p).unwrap(), CasOutcome::NotFound);
        }
    }

    #[test]
    fn history_and_status_listings() {
        for store in stores() {
            let p = proposal("LOT-1");
            store.create_transfer(&p).unwrap();

            let mut expired = p.clone();
            expired.status = TransferStatus::Expired;
            expired.updated_at = Utc::now();
            store.compare_and_swap(1, &expired).unwrap();

            let p2 = proposal("LOT-1");
            store.create_transfer(&p2).unwrap();

            assert_eq!(store.history("LOT-1").unwrap().len(), 2);
            assert_eq!(
                store.list_by_status(TransferStatus::Expired).unwrap().len(),
                1
            );
            assert_eq!(
                store.list_by_status(TransferStatus::Pending).unwrap().len(),
                1
            );
        }
    }

    #[test]
    fn expired_pending_listing_uses_deadline() {
        for store in stores() {
            let mut p = proposal("LOT-1");
            p.expires_at = Utc::now() - Duration::hours(1);
            store.create_transfer(&p).unwrap();
            store.create_transfer(&proposal("LOT-2")).unwrap();

            let due = store.list_expired_pending(Utc::now()).unwrap();
            assert_eq!(due.len(), 1);
            assert_eq!(due[0].property_id, "LOT-1");
        }
    }

    #[test]
    fn unconfirmed_listing_finds_terminal_records_without_tx_ref() {
        for store in stores() {
            let p = proposal("LOT-1");
            store.create_transfer(&p).unwrap();

            let mut completed = p.clone();
            completed.status = TransferStatus::Completed;
            completed.external_tx_ref = None;
            completed.updated_at = Utc::now();
            store.compare_and_swap(1, &completed).unwrap();

            let unconfirmed = store.list_unconfirmed().unwrap();
            assert_eq!(unconfirmed.len(), 1);

            completed.external_tx_ref = Some("0xabc".to_string());
            store.compare_and_swap(2, &completed).unwrap();
            assert!(store.list_unconfirmed().unwrap().is_empty());
        }
    }

    #[test]
    fn property_crud_and_owner_update() {
        for store in stores() {
            store.put_property(&property("LOT-1")).unwrap();

            let err = store.put_property(&property("LOT-1")).unwrap_err();
            assert!(matches!(err, RegistryError::Validation(_)));

            let loaded = store.get_property("LOT-1").unwrap().unwrap();
            assert_eq!(loaded.owner, "SP_ALICE");

            let at = Utc::now();
            assert!(store.set_owner("LOT-1", "SP_BOB", at).unwrap());
            let loaded = store.get_property("LOT-1").unwrap().unwrap();
            assert_eq!(loaded.owner, "SP_BOB");
            assert!(loaded.last_transfer_at.is_some());

            assert!(!store.set_owner("LOT-404", "SP_BOB", at).unwrap());
            assert_eq!(store.list_properties().unwrap().len(), 1);
        }
    }
}

use std::path::PathBuf;

use anyhow::Result;
use helpdesk_core::{
    plan_edits, snapshot_fingerprint, validate_issue, HelpdeskError, NewTicket, Priority,
    Snapshot, Ticket, TicketEdit, TicketId, TicketStats, TicketStatus,
};
use helpdesk_store_sqlite::SqliteStore;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

pub const API_CONTRACT_VERSION: &str = "api.v1";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitResult {
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateTicketRequest {
    pub issue: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateTicketRequest {
    pub status: TicketStatus,
    pub priority: Priority,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpdateTicketResult {
    pub id: TicketId,
    pub status: TicketStatus,
    pub priority: Priority,
    pub matched: bool,
}

/// An editable copy of the board: `base` holds the rows as loaded, `rows` the grid the
/// user edits. Only differences between the two are ever written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplyEditsRequest {
    pub base: Vec<TicketEdit>,
    pub rows: Vec<TicketEdit>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ApplyEditsResult {
    pub applied: Vec<TicketEdit>,
    pub unknown_ids: Vec<TicketId>,
    pub base_snapshot_stale: bool,
    pub snapshot: Snapshot,
}

/// One render cycle's worth of data: the snapshot plus the aggregates drawn from it.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Board {
    pub snapshot: Snapshot,
    pub stats: TicketStats,
}

impl Board {
    #[must_use]
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let stats = snapshot.stats();
        Self { snapshot, stats }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Storage,
}

/// Classify a failure at the boundary: validation failures are the caller's to fix,
/// everything else is a storage failure.
#[must_use]
pub fn classify_error(err: &anyhow::Error) -> ErrorKind {
    let is_validation = err.chain().any(|cause| {
        matches!(cause.downcast_ref::<HelpdeskError>(), Some(HelpdeskError::Validation(_)))
    });
    if is_validation {
        ErrorKind::Validation
    } else {
        ErrorKind::Storage
    }
}

#[derive(Debug, Clone)]
pub struct HelpdeskApi {
    db_path: PathBuf,
}

impl HelpdeskApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path }
    }

    // Every operation gets its own connection, closed when the store drops.
    fn open_store(&self) -> Result<SqliteStore> {
        let store = SqliteStore::open(&self.db_path)?;
        store.init_schema()?;
        Ok(store)
    }

    /// Ensure the ticket table exists.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or the table cannot be created.
    pub fn init(&self) -> Result<InitResult> {
        let store = SqliteStore::open(&self.db_path)?;
        let created = store.init_schema()?;
        Ok(InitResult { created })
    }

    /// Submit a new ticket in the `Open` status.
    ///
    /// # Errors
    /// Returns [`HelpdeskError::Validation`] (before touching storage) for blank issue text,
    /// or a storage error when the insert fails.
    pub fn create_ticket(&self, input: CreateTicketRequest) -> Result<Ticket> {
        validate_issue(&input.issue)?;

        let store = self.open_store()?;
        let number = store.next_ticket_number()?;
        let ticket = NewTicket::open(TicketId::new(number), input.issue, input.priority, today())?;
        store.insert_ticket(&ticket)
    }

    /// Load every ticket, newest first.
    ///
    /// # Errors
    /// Returns an error when the tickets cannot be read.
    pub fn list_tickets(&self) -> Result<Snapshot> {
        let store = self.open_store()?;
        Ok(Snapshot::new(store.list_tickets()?))
    }

    /// Overwrite one ticket's status and priority. A missing id is reported via
    /// `matched = false`, never as an error.
    ///
    /// # Errors
    /// Returns an error when the update statement fails.
    pub fn update_ticket(
        &self,
        id: TicketId,
        input: UpdateTicketRequest,
    ) -> Result<UpdateTicketResult> {
        let store = self.open_store()?;
        let matched = store.update_ticket(id, input.status, input.priority)?;
        Ok(UpdateTicketResult { id, status: input.status, priority: input.priority, matched })
    }

    /// Reload the snapshot and compute its aggregates.
    ///
    /// # Errors
    /// Returns an error when the tickets cannot be read.
    pub fn board(&self) -> Result<Board> {
        Ok(Board::from_snapshot(self.list_tickets()?))
    }

    /// Load the board as an edit sheet whose `rows` start out equal to `base`.
    ///
    /// # Errors
    /// Returns an error when the tickets cannot be read.
    pub fn edit_sheet(&self) -> Result<ApplyEditsRequest> {
        let base = self.list_tickets()?.edits();
        Ok(ApplyEditsRequest { rows: base.clone(), base })
    }

    /// Diff an edit sheet's rows against its own base rows by ticket id and write one
    /// update per row the user changed, then return the reloaded snapshot.
    ///
    /// Rows left as loaded are never written, even when the stored ticket changed since
    /// the sheet was exported. Edits for ids missing from the base or from storage are
    /// skipped and reported.
    ///
    /// # Errors
    /// Returns an error when loading or any update fails. Updates issued before the
    /// failure stay applied.
    pub fn apply_edits(&self, input: ApplyEditsRequest) -> Result<ApplyEditsResult> {
        let store = self.open_store()?;
        let current = Snapshot::new(store.list_tickets()?);

        let base_snapshot_stale = snapshot_fingerprint(&input.base) != current.snapshot_id();
        if base_snapshot_stale {
            tracing::warn!(
                current = current.snapshot_id(),
                "edits were made against an older snapshot; applying only edited rows"
            );
        }

        let plan = plan_edits(&input.base, &input.rows);
        let mut unknown_ids = plan.unknown_ids;
        let mut applied = Vec::with_capacity(plan.changed.len());
        for edit in plan.changed {
            if store.update_ticket(edit.id, edit.status, edit.priority)? {
                applied.push(edit);
            } else {
                unknown_ids.push(edit.id);
            }
        }
        unknown_ids.sort();
        unknown_ids.dedup();
        for id in &unknown_ids {
            tracing::warn!(ticket_id = %id, "ignoring edit for unknown ticket");
        }

        let snapshot = Snapshot::new(store.list_tickets()?);
        Ok(ApplyEditsResult { applied, unknown_ids, base_snapshot_stale, snapshot })
    }
}

fn today() -> Date {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc()).date()
}

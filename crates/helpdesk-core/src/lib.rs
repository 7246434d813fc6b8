use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Date, OffsetDateTime};

pub const TICKET_ID_PREFIX: &str = "TICKET-";
pub const FIRST_TICKET_NUMBER: u64 = 1001;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum HelpdeskError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Sequential ticket identifier, rendered as `TICKET-<number>`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct TicketId(u64);

impl TicketId {
    #[must_use]
    pub fn new(number: u64) -> Self {
        Self(number)
    }

    #[must_use]
    pub fn number(self) -> u64 {
        self.0
    }

    /// Parse a canonical `TICKET-<digits>` identifier.
    ///
    /// Only the form produced by [`Display`] is accepted, so a parsed id always renders
    /// back to the exact text it was read from.
    ///
    /// # Errors
    /// Returns [`HelpdeskError::Parse`] when the prefix is missing, the suffix is not a
    /// plain decimal number, or the suffix has leading zeros.
    pub fn parse(value: &str) -> Result<Self, HelpdeskError> {
        let suffix = value.strip_prefix(TICKET_ID_PREFIX).ok_or_else(|| {
            HelpdeskError::Parse(format!("ticket id must start with {TICKET_ID_PREFIX}: {value}"))
        })?;
        if suffix.is_empty() || !suffix.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(HelpdeskError::Parse(format!("ticket id suffix must be numeric: {value}")));
        }
        if suffix.len() > 1 && suffix.starts_with('0') {
            return Err(HelpdeskError::Parse(format!(
                "ticket id suffix must not have leading zeros: {value}"
            )));
        }
        suffix.parse::<u64>().map(Self).map_err(|err| {
            HelpdeskError::Parse(format!("ticket id suffix out of range: {value}: {err}"))
        })
    }
}

impl Display for TicketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{TICKET_ID_PREFIX}{}", self.0)
    }
}

impl FromStr for TicketId {
    type Err = HelpdeskError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for TicketId {
    type Error = HelpdeskError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<TicketId> for String {
    fn from(value: TicketId) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum TicketStatus {
    Open,
    #[serde(rename = "In Progress")]
    InProgress,
    Closed,
}

impl TicketStatus {
    pub const ALL: [Self; 3] = [Self::Open, Self::InProgress, Self::Closed];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "Open",
            Self::InProgress => "In Progress",
            Self::Closed => "Closed",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Open" => Some(Self::Open),
            "In Progress" => Some(Self::InProgress),
            "Closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

impl Display for TicketStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Self; 3] = [Self::High, Self::Medium, Self::Low];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "High" => Some(Self::High),
            "Medium" => Some(Self::Medium),
            "Low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl Display for Priority {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted support ticket. `created_at` is assigned by storage and only drives ordering.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Ticket {
    pub id: TicketId,
    pub issue: String,
    pub status: TicketStatus,
    pub priority: Priority,
    pub date_submitted: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A validated ticket ready for insertion.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NewTicket {
    pub id: TicketId,
    pub issue: String,
    pub status: TicketStatus,
    pub priority: Priority,
    pub date_submitted: String,
}

impl NewTicket {
    /// Build a freshly submitted ticket in the `Open` status.
    ///
    /// # Errors
    /// Returns [`HelpdeskError::Validation`] when the issue text is blank.
    pub fn open(
        id: TicketId,
        issue: impl Into<String>,
        priority: Priority,
        submitted_on: Date,
    ) -> Result<Self, HelpdeskError> {
        let issue = issue.into();
        validate_issue(&issue)?;
        Ok(Self {
            id,
            issue,
            status: TicketStatus::Open,
            priority,
            date_submitted: calendar_date(submitted_on),
        })
    }
}

/// Reject issue text that is empty once surrounding whitespace is removed.
///
/// # Errors
/// Returns [`HelpdeskError::Validation`] for empty or whitespace-only text.
pub fn validate_issue(issue: &str) -> Result<(), HelpdeskError> {
    if issue.trim().is_empty() {
        return Err(HelpdeskError::Validation(
            "issue description must not be blank".to_string(),
        ));
    }
    Ok(())
}

/// Format a date as `YYYY-MM-DD`.
#[must_use]
pub fn calendar_date(date: Date) -> String {
    format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
}

/// Next sequential ticket number: one past the largest existing number, or
/// [`FIRST_TICKET_NUMBER`] for an empty table.
#[must_use]
pub fn next_ticket_number<'a, I>(existing: I) -> u64
where
    I: IntoIterator<Item = &'a TicketId>,
{
    existing
        .into_iter()
        .map(|id| id.number())
        .max()
        .map_or(FIRST_TICKET_NUMBER, |max| max.saturating_add(1))
}

/// Every ticket loaded for one render cycle, newest first.
///
/// A snapshot is never mutated; writes produce a new snapshot from a reload.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Snapshot {
    snapshot_id: String,
    tickets: Vec<Ticket>,
}

impl Snapshot {
    #[must_use]
    pub fn new(tickets: Vec<Ticket>) -> Self {
        let rows = tickets.iter().map(TicketEdit::from).collect::<Vec<_>>();
        let snapshot_id = snapshot_fingerprint(&rows);
        Self { snapshot_id, tickets }
    }

    #[must_use]
    pub fn snapshot_id(&self) -> &str {
        &self.snapshot_id
    }

    #[must_use]
    pub fn tickets(&self) -> &[Ticket] {
        &self.tickets
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }

    #[must_use]
    pub fn get(&self, id: TicketId) -> Option<&Ticket> {
        self.tickets.iter().find(|ticket| ticket.id == id)
    }

    /// The editable columns of every row, in snapshot order.
    #[must_use]
    pub fn edits(&self) -> Vec<TicketEdit> {
        self.tickets.iter().map(TicketEdit::from).collect()
    }

    #[must_use]
    pub fn stats(&self) -> TicketStats {
        TicketStats::from_tickets(&self.tickets)
    }
}

/// Fingerprint of the editable columns, independent of row order.
///
/// Two row sets with the same `(id, status, priority)` triples always produce the same id.
#[must_use]
pub fn snapshot_fingerprint(rows: &[TicketEdit]) -> String {
    let mut ordered = rows.to_vec();
    ordered.sort_by_key(|row| row.id);

    let mut hasher = Sha256::new();
    for row in &ordered {
        hasher.update(row.id.to_string().as_bytes());
        hasher.update([0_u8]);
        hasher.update(row.status.as_str().as_bytes());
        hasher.update([0_u8]);
        hasher.update(row.priority.as_str().as_bytes());
        hasher.update([0x1e_u8]);
    }
    let digest = hasher.finalize();
    let digest_hex = format!("{digest:x}");
    format!("snap_{}", &digest_hex[..16])
}

/// The editable columns of one ticket row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct TicketEdit {
    pub id: TicketId,
    pub status: TicketStatus,
    pub priority: Priority,
}

impl From<&Ticket> for TicketEdit {
    fn from(ticket: &Ticket) -> Self {
        Self { id: ticket.id, status: ticket.status, priority: ticket.priority }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct EditPlan {
    pub changed: Vec<TicketEdit>,
    pub unknown_ids: Vec<TicketId>,
}

impl EditPlan {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty()
    }
}

/// Compare edited rows with the rows they were edited from, matching rows by id.
///
/// Only rows whose status or priority differs from their own base row are edits; the
/// current stored values play no part. When the same id is edited more than once, the
/// last row wins. `changed` follows the base row order; ids missing from `base` are
/// reported in `unknown_ids`.
#[must_use]
pub fn plan_edits(base: &[TicketEdit], edited: &[TicketEdit]) -> EditPlan {
    let mut by_id = BTreeMap::new();
    for edit in edited {
        by_id.insert(edit.id, *edit);
    }

    let mut changed = Vec::new();
    for original in base {
        let Some(edit) = by_id.remove(&original.id) else {
            continue;
        };
        if edit.status != original.status || edit.priority != original.priority {
            changed.push(edit);
        }
    }

    EditPlan { changed, unknown_ids: by_id.into_keys().collect() }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct StatusCount {
    pub status: TicketStatus,
    pub count: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub struct PriorityCount {
    pub priority: Priority,
    pub count: usize,
}

/// Per-status and per-priority counts, always listing every variant in display order.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct TicketStats {
    pub total: usize,
    pub by_status: Vec<StatusCount>,
    pub by_priority: Vec<PriorityCount>,
}

impl TicketStats {
    #[must_use]
    pub fn from_tickets(tickets: &[Ticket]) -> Self {
        let by_status = TicketStatus::ALL
            .iter()
            .map(|status| StatusCount {
                status: *status,
                count: tickets.iter().filter(|ticket| ticket.status == *status).count(),
            })
            .collect();
        let by_priority = Priority::ALL
            .iter()
            .map(|priority| PriorityCount {
                priority: *priority,
                count: tickets.iter().filter(|ticket| ticket.priority == *priority).count(),
            })
            .collect();

        Self { total: tickets.len(), by_status, by_priority }
    }

    #[must_use]
    pub fn status_count(&self, status: TicketStatus) -> usize {
        self.by_status.iter().find(|entry| entry.status == status).map_or(0, |entry| entry.count)
    }

    #[must_use]
    pub fn priority_count(&self, priority: Priority) -> usize {
        self.by_priority
            .iter()
            .find(|entry| entry.priority == priority)
            .map_or(0, |entry| entry.count)
    }
}

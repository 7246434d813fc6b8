use std::path::Path;

use anyhow::{anyhow, Context, Result};
use helpdesk_core::{
    next_ticket_number, validate_issue, NewTicket, Priority, Ticket, TicketId, TicketStatus,
};
use rusqlite::{params, Connection, Row};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

const CREATE_TICKETS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS tickets (
  id TEXT PRIMARY KEY,
  issue TEXT NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('Open','In Progress','Closed')),
  priority TEXT NOT NULL CHECK (priority IN ('High','Medium','Low')),
  date_submitted TEXT NOT NULL,
  created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
";

const SELECT_TICKET_COLUMNS: &str =
    "SELECT id, issue, status, priority, date_submitted, created_at FROM tickets";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open a SQLite-backed ticket store and configure runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Create the `tickets` table when it does not exist yet.
    ///
    /// Returns `true` when the table was created by this call.
    ///
    /// # Errors
    /// Returns an error when the schema cannot be inspected or created.
    pub fn init_schema(&self) -> Result<bool> {
        let existed = table_exists(&self.conn, "tickets")?;
        self.conn.execute_batch(CREATE_TICKETS_SQL).context("failed to create tickets table")?;
        if !existed {
            tracing::info!("created tickets table");
        }
        Ok(!existed)
    }

    /// Insert one validated ticket and read it back with its storage-assigned timestamp.
    ///
    /// # Errors
    /// Returns an error when the issue text is blank, the id already exists, or the write fails.
    pub fn insert_ticket(&self, ticket: &NewTicket) -> Result<Ticket> {
        validate_issue(&ticket.issue)?;

        self.conn
            .execute(
                "INSERT INTO tickets(id, issue, status, priority, date_submitted)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    ticket.id.to_string(),
                    ticket.issue,
                    ticket.status.as_str(),
                    ticket.priority.as_str(),
                    ticket.date_submitted,
                ],
            )
            .with_context(|| format!("failed to insert ticket {}", ticket.id))?;
        tracing::info!(ticket_id = %ticket.id, priority = %ticket.priority, "inserted ticket");

        self.get_ticket(ticket.id)?
            .ok_or_else(|| anyhow!("inserted ticket {} could not be read back", ticket.id))
    }

    /// Fetch one ticket by id.
    ///
    /// # Errors
    /// Returns an error when the lookup fails or the stored row cannot be decoded.
    pub fn get_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        let mut stmt = self.conn.prepare(&format!("{SELECT_TICKET_COLUMNS} WHERE id = ?1"))?;
        let mut rows = stmt.query(params![id.to_string()])?;
        let ticket = match rows.next()? {
            Some(row) => Some(decode_ticket(row)?),
            None => None,
        };
        Ok(ticket)
    }

    /// Load every decodable ticket, newest first.
    ///
    /// Rows that cannot be decoded (a non-canonical id, or labels outside the allowed set in
    /// a table created without CHECK constraints) are skipped with a warning, matching
    /// [`Self::next_ticket_number`].
    ///
    /// # Errors
    /// Returns an error when rows cannot be read from `SQLite`.
    pub fn list_tickets(&self) -> Result<Vec<Ticket>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_TICKET_COLUMNS} ORDER BY julianday(created_at) DESC, rowid DESC"
        ))?;
        let mut rows = stmt.query([])?;
        let mut tickets = Vec::new();

        while let Some(row) = rows.next()? {
            match decode_ticket(row) {
                Ok(ticket) => tickets.push(ticket),
                Err(err) => tracing::warn!("skipping undecodable ticket row: {err:#}"),
            }
        }

        tracing::debug!(count = tickets.len(), "loaded tickets");
        Ok(tickets)
    }

    /// Overwrite status and priority of one ticket.
    ///
    /// Returns whether a row matched `id`; a missing id is not an error.
    ///
    /// # Errors
    /// Returns an error when the update statement fails.
    pub fn update_ticket(
        &self,
        id: TicketId,
        status: TicketStatus,
        priority: Priority,
    ) -> Result<bool> {
        let changed = self
            .conn
            .execute(
                "UPDATE tickets SET status = ?1, priority = ?2 WHERE id = ?3",
                params![status.as_str(), priority.as_str(), id.to_string()],
            )
            .with_context(|| format!("failed to update ticket {id}"))?;

        if changed == 0 {
            tracing::debug!(ticket_id = %id, "update matched no ticket");
        } else {
            tracing::info!(
                ticket_id = %id,
                status = %status,
                priority = %priority,
                "updated ticket"
            );
        }
        Ok(changed > 0)
    }

    /// Scan every stored id and compute the number for the next ticket.
    ///
    /// Ids that are not canonical `TICKET-<n>` are skipped with a warning; every canonical
    /// id counts, even when the rest of its row is undecodable.
    ///
    /// # Errors
    /// Returns an error when the ids cannot be read.
    pub fn next_ticket_number(&self) -> Result<u64> {
        let mut stmt = self.conn.prepare("SELECT id FROM tickets")?;
        let mut rows = stmt.query([])?;
        let mut ids = Vec::new();

        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            match TicketId::parse(&raw) {
                Ok(id) => ids.push(id),
                Err(err) => {
                    tracing::warn!(ticket_id = %raw, "skipping unparseable ticket id: {err}");
                }
            }
        }

        Ok(next_ticket_number(&ids))
    }
}

fn decode_ticket(row: &Row<'_>) -> Result<Ticket> {
    let id_raw: String = row.get(0)?;
    let id = TicketId::parse(&id_raw).with_context(|| format!("invalid ticket id: {id_raw}"))?;
    let status_raw: String = row.get(2)?;
    let priority_raw: String = row.get(3)?;
    let created_at_raw: String = row.get(5)?;

    Ok(Ticket {
        id,
        issue: row.get(1)?,
        status: TicketStatus::parse(&status_raw)
            .ok_or_else(|| anyhow!("unknown status for {id_raw}: {status_raw}"))?,
        priority: Priority::parse(&priority_raw)
            .ok_or_else(|| anyhow!("unknown priority for {id_raw}: {priority_raw}"))?,
        date_submitted: row.get(4)?,
        created_at: parse_created_at(&created_at_raw)?,
    })
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn parse_created_at(value: &str) -> Result<OffsetDateTime> {
    if let Ok(parsed) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(parsed);
    }

    // Tables created by older builds store `CURRENT_TIMESTAMP` values without a `T` or offset.
    let legacy = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    PrimitiveDateTime::parse(value, legacy)
        .map(PrimitiveDateTime::assume_utc)
        .with_context(|| format!("invalid created_at timestamp: {value}"))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use helpdesk_core::FIRST_TICKET_NUMBER;
    use time::{Date, Month};
    use ulid::Ulid;

    use super::*;

    fn memory_store() -> Result<SqliteStore> {
        let store = SqliteStore::open(Path::new(":memory:"))?;
        store.init_schema()?;
        Ok(store)
    }

    fn fixture_date() -> Date {
        match Date::from_calendar_date(2026, Month::March, 7) {
            Ok(date) => date,
            Err(err) => panic!("invalid fixture date: {err}"),
        }
    }

    fn create(store: &SqliteStore, issue: &str, priority: Priority) -> Result<Ticket> {
        let number = store.next_ticket_number()?;
        let ticket = NewTicket::open(TicketId::new(number), issue, priority, fixture_date())?;
        store.insert_ticket(&ticket)
    }

    #[test]
    fn init_schema_is_idempotent() -> Result<()> {
        let store = SqliteStore::open(Path::new(":memory:"))?;
        assert!(store.init_schema()?);
        create(&store, "printer broken", Priority::Medium)?;

        assert!(!store.init_schema()?);
        assert_eq!(store.list_tickets()?.len(), 1);
        Ok(())
    }

    #[test]
    fn sqlite_checks_reject_unknown_status_and_priority() -> Result<()> {
        let store = memory_store()?;

        let bad_status = store.conn.execute(
            "INSERT INTO tickets(id, issue, status, priority, date_submitted)
             VALUES ('TICKET-1001', 'x', 'Pending', 'High', '2026-03-07')",
            [],
        );
        assert!(bad_status.is_err());

        let bad_priority = store.conn.execute(
            "INSERT INTO tickets(id, issue, status, priority, date_submitted)
             VALUES ('TICKET-1001', 'x', 'Open', 'Urgent', '2026-03-07')",
            [],
        );
        assert!(bad_priority.is_err());
        Ok(())
    }

    #[test]
    fn ticket_numbers_start_at_1001_and_increase() -> Result<()> {
        let store = memory_store()?;
        assert_eq!(store.next_ticket_number()?, FIRST_TICKET_NUMBER);

        let first = create(&store, "printer broken", Priority::Medium)?;
        let second = create(&store, "vpn drops every hour", Priority::High)?;

        assert_eq!(first.id.to_string(), "TICKET-1001");
        assert_eq!(first.status, TicketStatus::Open);
        assert_eq!(second.id.to_string(), "TICKET-1002");
        assert_eq!(store.next_ticket_number()?, 1003);
        Ok(())
    }

    #[test]
    fn unparseable_ids_are_skipped_by_numbering_and_listing() -> Result<()> {
        let store = memory_store()?;
        store.conn.execute(
            "INSERT INTO tickets(id, issue, status, priority, date_submitted)
             VALUES ('LEGACY-9', 'imported', 'Open', 'Low', '2026-03-07'),
                    ('TICKET-1040', 'imported', 'Open', 'Low', '2026-03-07')",
            [],
        )?;

        assert_eq!(store.next_ticket_number()?, 1041);
        let listed = store.list_tickets()?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, TicketId::new(1040));

        let created = create(&store, "printer broken", Priority::High)?;
        assert_eq!(created.id, TicketId::new(1041));
        assert_eq!(store.list_tickets()?.len(), 2);
        Ok(())
    }

    #[test]
    fn zero_padded_ids_never_alias_a_canonical_id() -> Result<()> {
        let store = memory_store()?;
        store.conn.execute(
            "INSERT INTO tickets(id, issue, status, priority, date_submitted)
             VALUES ('TICKET-01001', 'imported', 'Open', 'Low', '2026-03-07')",
            [],
        )?;

        assert!(store.list_tickets()?.is_empty());
        assert_eq!(store.next_ticket_number()?, FIRST_TICKET_NUMBER);
        assert!(!store.update_ticket(TicketId::new(1001), TicketStatus::Closed, Priority::High)?);

        let created = create(&store, "printer broken", Priority::Medium)?;
        assert_eq!(created.id.to_string(), "TICKET-1001");
        assert!(store.update_ticket(created.id, TicketStatus::Closed, Priority::High)?);

        let listed = store.list_tickets()?;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, TicketStatus::Closed);
        Ok(())
    }

    #[test]
    fn rows_with_unknown_labels_are_skipped_but_keep_their_number() -> Result<()> {
        let store = SqliteStore::open(Path::new(":memory:"))?;
        store.conn.execute_batch(
            "CREATE TABLE tickets (
                id TEXT PRIMARY KEY,
                issue TEXT NOT NULL,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                date_submitted TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO tickets(id, issue, status, priority, date_submitted)
            VALUES ('TICKET-1005', 'imported', 'Pending', 'Urgent', '2024-05-01');",
        )?;

        assert!(store.list_tickets()?.is_empty());
        assert_eq!(store.next_ticket_number()?, 1006);
        Ok(())
    }

    #[test]
    fn blank_issue_is_rejected_without_insert() -> Result<()> {
        let store = memory_store()?;
        let ticket = NewTicket {
            id: TicketId::new(1001),
            issue: "   ".to_string(),
            status: TicketStatus::Open,
            priority: Priority::Low,
            date_submitted: "2026-03-07".to_string(),
        };

        assert!(store.insert_ticket(&ticket).is_err());
        assert!(store.list_tickets()?.is_empty());
        Ok(())
    }

    #[test]
    fn duplicate_ticket_id_is_rejected() -> Result<()> {
        let store = memory_store()?;
        let ticket = NewTicket::open(TicketId::new(1001), "first", Priority::Low, fixture_date())?;
        store.insert_ticket(&ticket)?;

        let clash = NewTicket::open(TicketId::new(1001), "second", Priority::High, fixture_date())?;
        assert!(store.insert_ticket(&clash).is_err());

        let tickets = store.list_tickets()?;
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0].issue, "first");
        Ok(())
    }

    #[test]
    fn list_returns_newest_first() -> Result<()> {
        let store = memory_store()?;
        for issue in ["first", "second", "third"] {
            create(&store, issue, Priority::Medium)?;
        }

        let tickets = store.list_tickets()?;
        let issues = tickets.iter().map(|ticket| ticket.issue.as_str()).collect::<Vec<_>>();
        assert_eq!(issues, vec!["third", "second", "first"]);
        assert!(tickets.windows(2).all(|pair| pair[0].created_at >= pair[1].created_at));
        Ok(())
    }

    #[test]
    fn update_changes_only_status_and_priority() -> Result<()> {
        let store = memory_store()?;
        let before = create(&store, "printer broken", Priority::Medium)?;

        assert!(store.update_ticket(before.id, TicketStatus::Closed, Priority::High)?);

        let after = store
            .get_ticket(before.id)?
            .ok_or_else(|| anyhow!("ticket disappeared after update"))?;
        assert_eq!(after.status, TicketStatus::Closed);
        assert_eq!(after.priority, Priority::High);
        assert_eq!(after.id, before.id);
        assert_eq!(after.issue, before.issue);
        assert_eq!(after.date_submitted, before.date_submitted);
        assert_eq!(after.created_at, before.created_at);
        Ok(())
    }

    #[test]
    fn update_is_idempotent() -> Result<()> {
        let store = memory_store()?;
        let ticket = create(&store, "printer broken", Priority::Medium)?;

        store.update_ticket(ticket.id, TicketStatus::InProgress, Priority::Low)?;
        let once = store.list_tickets()?;
        store.update_ticket(ticket.id, TicketStatus::InProgress, Priority::Low)?;
        let twice = store.list_tickets()?;

        assert_eq!(once, twice);
        Ok(())
    }

    #[test]
    fn update_of_missing_id_is_silent_no_op() -> Result<()> {
        let store = memory_store()?;
        create(&store, "printer broken", Priority::Medium)?;
        let before = store.list_tickets()?;

        let matched =
            store.update_ticket(TicketId::new(9999), TicketStatus::Closed, Priority::High)?;

        assert!(!matched);
        assert_eq!(store.list_tickets()?, before);
        Ok(())
    }

    #[test]
    fn legacy_timestamps_are_readable() -> Result<()> {
        let store = SqliteStore::open(Path::new(":memory:"))?;
        store.conn.execute_batch(
            "CREATE TABLE tickets (
                id TEXT PRIMARY KEY,
                issue TEXT NOT NULL,
                status TEXT NOT NULL,
                priority TEXT NOT NULL,
                date_submitted TEXT NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO tickets(id, issue, status, priority, date_submitted, created_at)
            VALUES
              ('TICKET-1001', 'old', 'Open', 'Low', '2024-05-01', '2024-05-01 10:00:00'),
              ('TICKET-1002', 'newer', 'Closed', 'High', '2024-05-02', '2024-05-02 09:30:00');",
        )?;

        assert!(!store.init_schema()?);
        let tickets = store.list_tickets()?;
        assert_eq!(tickets.len(), 2);
        assert_eq!(tickets[0].id, TicketId::new(1002));
        assert_eq!(tickets[1].created_at.year(), 2024);
        assert_eq!(store.next_ticket_number()?, 1003);
        Ok(())
    }

    #[test]
    fn file_backed_store_persists_across_connections() -> Result<()> {
        let db_path = std::env::temp_dir().join(format!("helpdesk-store-{}.sqlite3", Ulid::new()));
        {
            let store = SqliteStore::open(&db_path)?;
            store.init_schema()?;
            create(&store, "printer broken", Priority::Medium)?;
        }

        let reopened = SqliteStore::open(&db_path)?;
        reopened.init_schema()?;
        assert_eq!(reopened.list_tickets()?.len(), 1);
        assert_eq!(reopened.next_ticket_number()?, 1002);
        drop(reopened);

        for suffix in ["", "-wal", "-shm"] {
            let path = std::path::PathBuf::from(format!("{}{}", db_path.display(), suffix));
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("failed to cleanup sqlite file {}", path.display()))?;
            }
        }
        Ok(())
    }
}

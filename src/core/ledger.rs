//! Execution ledger — durable (run, action) → record store.
//!
//! Backed by SQLite. Every status transition runs inside a `BEGIN IMMEDIATE`
//! transaction, so separate processes sharing one database file serialize on
//! the write lock and observe each other's claims. Transitions:
//!
//! ```text
//! (absent) | Pending | Failed  --mark_in_flight-->  InFlight
//! InFlight                      --mark_completed-->  Completed
//! InFlight                      --mark_failed----->  Failed
//! InFlight                      --take_over------->  InFlight (new owner)
//! ```
//!
//! Only the executor that holds an in-flight claim may resolve it. Another
//! executor must first `take_over` the claim, naming the owner it observed.
//! `Completed` is terminal until the run is cleared.

use super::types::{ActionStatus, ExecutionRecord};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS records (
    run_id      TEXT    NOT NULL,
    action_id   TEXT    NOT NULL,
    status      TEXT    NOT NULL,
    result      TEXT,
    token       TEXT,
    error       TEXT,
    fingerprint TEXT,
    owner       TEXT,
    attempts    INTEGER NOT NULL DEFAULT 0,
    updated_at  TEXT    NOT NULL,
    PRIMARY KEY (run_id, action_id)
);
";

const SELECT_COLUMNS: &str = "run_id, action_id, status, result, token, error, fingerprint, owner, attempts, updated_at";

/// Per-run counts, for status listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub records: u32,
    pub completed: u32,
    pub failed: u32,
    pub in_flight: u32,
    pub updated_at: DateTime<Utc>,
}

/// Durable execution ledger.
pub struct Ledger {
    conn: Mutex<Connection>,
}

impl Ledger {
    /// Open or create the ledger database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::init(conn)
    }

    /// A ledger that lives only as long as the value.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fetch the record for a key.
    pub fn get(&self, run_id: &str, action_id: &str) -> Result<Option<ExecutionRecord>> {
        select_record(&self.conn(), run_id, action_id)
    }

    /// Status of a key; an absent record is `Pending`.
    pub fn status(&self, run_id: &str, action_id: &str) -> Result<ActionStatus> {
        Ok(self
            .get(run_id, action_id)?
            .map(|r| r.status)
            .unwrap_or(ActionStatus::Pending))
    }

    /// Claim an action for submission.
    pub fn mark_in_flight(
        &self,
        run_id: &str,
        action_id: &str,
        fingerprint: &str,
        owner: &str,
    ) -> Result<ExecutionRecord> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(current) = select_record(&tx, run_id, action_id)? {
            if matches!(current.status, ActionStatus::InFlight | ActionStatus::Completed) {
                return Err(Error::AlreadyInFlightOrDone {
                    run: run_id.to_string(),
                    action: action_id.to_string(),
                    status: current.status.to_string(),
                });
            }
        }

        tx.execute(
            "INSERT INTO records (run_id, action_id, status, fingerprint, owner, attempts, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)
             ON CONFLICT (run_id, action_id) DO UPDATE SET
                 status = excluded.status,
                 fingerprint = excluded.fingerprint,
                 owner = excluded.owner,
                 attempts = records.attempts + 1,
                 updated_at = excluded.updated_at",
            params![
                run_id,
                action_id,
                ActionStatus::InFlight.as_str(),
                fingerprint,
                owner,
                Utc::now().to_rfc3339(),
            ],
        )?;

        let record = require_record(&tx, run_id, action_id)?;
        tx.commit()?;
        Ok(record)
    }

    /// Move an in-flight claim from `previous` to `owner`. Fails if the record
    /// is no longer in flight or is held by someone other than `previous`.
    pub fn take_over(
        &self,
        run_id: &str,
        action_id: &str,
        previous: Option<&str>,
        owner: &str,
    ) -> Result<ExecutionRecord> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = select_record(&tx, run_id, action_id)?;
        let status = current
            .as_ref()
            .map(|r| r.status)
            .unwrap_or(ActionStatus::Pending);
        let holder = current.as_ref().and_then(|r| r.owner.as_deref());
        if status != ActionStatus::InFlight || holder != previous {
            let status = match holder {
                Some(h) if status == ActionStatus::InFlight => format!("{status} (held by {h})"),
                _ => status.to_string(),
            };
            return Err(Error::AlreadyInFlightOrDone {
                run: run_id.to_string(),
                action: action_id.to_string(),
                status,
            });
        }

        tx.execute(
            "UPDATE records SET owner = ?3, updated_at = ?4 WHERE run_id = ?1 AND action_id = ?2",
            params![run_id, action_id, owner, Utc::now().to_rfc3339()],
        )?;

        let record = require_record(&tx, run_id, action_id)?;
        tx.commit()?;
        tracing::info!(run = run_id, action = action_id, from = ?previous, to = owner, "in-flight claim taken over");
        Ok(record)
    }

    /// Record a confirmed submission made under `owner`'s claim.
    pub fn mark_completed(
        &self,
        run_id: &str,
        action_id: &str,
        owner: &str,
        result: &Value,
        token: &str,
    ) -> Result<ExecutionRecord> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        expect_held(&tx, run_id, action_id, owner, ActionStatus::Completed)?;

        tx.execute(
            "UPDATE records SET status = ?3, result = ?4, token = ?5, error = NULL, updated_at = ?6
             WHERE run_id = ?1 AND action_id = ?2",
            params![
                run_id,
                action_id,
                ActionStatus::Completed.as_str(),
                serde_json::to_string(result)?,
                token,
                Utc::now().to_rfc3339(),
            ],
        )?;

        let record = require_record(&tx, run_id, action_id)?;
        tx.commit()?;
        Ok(record)
    }

    /// Record a failed submission made under `owner`'s claim. The action
    /// stays eligible for retry.
    pub fn mark_failed(
        &self,
        run_id: &str,
        action_id: &str,
        owner: &str,
        detail: &str,
    ) -> Result<ExecutionRecord> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        expect_held(&tx, run_id, action_id, owner, ActionStatus::Failed)?;

        tx.execute(
            "UPDATE records SET status = ?3, error = ?4, updated_at = ?5
             WHERE run_id = ?1 AND action_id = ?2",
            params![
                run_id,
                action_id,
                ActionStatus::Failed.as_str(),
                detail,
                Utc::now().to_rfc3339(),
            ],
        )?;

        let record = require_record(&tx, run_id, action_id)?;
        tx.commit()?;
        Ok(record)
    }

    /// All records of a run, in the order they were first written.
    pub fn records(&self, run_id: &str) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM records WHERE run_id = ?1 ORDER BY rowid",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![run_id], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    /// Summaries of every run in the ledger.
    pub fn runs(&self) -> Result<Vec<RunSummary>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT run_id,
                    COUNT(*),
                    SUM(status = 'completed'),
                    SUM(status = 'failed'),
                    SUM(status = 'in_flight'),
                    MAX(updated_at)
             FROM records
             GROUP BY run_id
             ORDER BY MIN(rowid)",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RunSummary {
                run_id: row.get(0)?,
                records: row.get(1)?,
                completed: row.get(2)?,
                failed: row.get(3)?,
                in_flight: row.get(4)?,
                updated_at: parse_timestamp(row, 5)?,
            })
        })?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row?);
        }
        Ok(runs)
    }

    /// Delete every record of a run. Returns how many were removed.
    pub fn clear_run(&self, run_id: &str) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute("DELETE FROM records WHERE run_id = ?1", params![run_id])?;
        tx.commit()?;
        tracing::info!(run = run_id, removed, "ledger run cleared");
        Ok(removed)
    }
}

fn select_record(conn: &Connection, run_id: &str, action_id: &str) -> Result<Option<ExecutionRecord>> {
    let record = conn
        .query_row(
            &format!(
                "SELECT {} FROM records WHERE run_id = ?1 AND action_id = ?2",
                SELECT_COLUMNS
            ),
            params![run_id, action_id],
            row_to_record,
        )
        .optional()?;
    Ok(record)
}

fn require_record(conn: &Connection, run_id: &str, action_id: &str) -> Result<ExecutionRecord> {
    select_record(conn, run_id, action_id)?.ok_or(Error::Ledger(rusqlite::Error::QueryReturnedNoRows))
}

fn expect_held(
    conn: &Connection,
    run_id: &str,
    action_id: &str,
    owner: &str,
    to: ActionStatus,
) -> Result<()> {
    let current = select_record(conn, run_id, action_id)?;
    let from = current
        .as_ref()
        .map(|r| r.status)
        .unwrap_or(ActionStatus::Pending);
    let invalid = |from: String| Error::InvalidTransition {
        action: action_id.to_string(),
        from,
        to: to.to_string(),
    };
    if from != ActionStatus::InFlight {
        return Err(invalid(from.to_string()));
    }
    match current.as_ref().and_then(|r| r.owner.as_deref()) {
        Some(holder) if holder == owner => Ok(()),
        Some(holder) => Err(invalid(format!("{from} (held by {holder})"))),
        None => Err(invalid(format!("{from} (unowned)"))),
    }
}

fn conversion_error(idx: usize, e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let status: String = row.get(2)?;
    let result: Option<String> = row.get(3)?;
    let result = match result {
        Some(raw) => Some(serde_json::from_str::<Value>(&raw).map_err(|e| conversion_error(3, e))?),
        None => None,
    };
    Ok(ExecutionRecord {
        run_id: row.get(0)?,
        action_id: row.get(1)?,
        status: status.parse().map_err(|e: String| conversion_error(2, e))?,
        result,
        token: row.get(4)?,
        error: row.get(5)?,
        fingerprint: row.get(6)?,
        owner: row.get(7)?,
        attempts: row.get(8)?,
        updated_at: parse_timestamp(row, 9)?,
    })
}

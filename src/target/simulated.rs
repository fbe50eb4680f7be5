//! In-process simulated chain for local networks and tests.
//!
//! Addresses derive from (chain id, deployer nonce) and transaction hashes
//! from (tag, nonce), so a fresh chain replays identically. Chain state lives
//! in SQLite, in memory or in a file shared by separate CLI invocations. Each
//! submission lands inside a `BEGIN IMMEDIATE` transaction, so two processes
//! on the same file never reuse a nonce or lose each other's receipts.

use super::{Operation, Receipt, Submission, TargetAdapter, TargetError};
use crate::core::config::NetworkConfig;
use crate::error::Result;
use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chain (
    id    INTEGER PRIMARY KEY CHECK (id = 0),
    block INTEGER NOT NULL,
    nonce INTEGER NOT NULL
);
INSERT OR IGNORE INTO chain (id, block, nonce) VALUES (0, 0, 0);
CREATE TABLE IF NOT EXISTS instances (
    address  TEXT PRIMARY KEY,
    contract TEXT NOT NULL,
    args     TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS calls (
    address TEXT NOT NULL,
    method  TEXT NOT NULL,
    args    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS receipts (
    tag    TEXT PRIMARY KEY,
    result TEXT NOT NULL,
    token  TEXT NOT NULL,
    block  INTEGER NOT NULL
);
";

/// A deployed instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub contract: String,
    pub args: Vec<Value>,
}

/// A landed invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    pub address: String,
    pub method: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Default)]
struct Faults {
    reject: HashSet<String>,
    drop_receipts: u32,
    latency: Option<Duration>,
    submissions: u32,
}

/// Simulated target chain.
#[derive(Debug)]
pub struct SimulatedTarget {
    chain_id: u64,
    confirmations: u32,
    conn: Mutex<Connection>,
    faults: Mutex<Faults>,
}

/// Chain state database for a network under the state directory.
pub fn chain_state_path(state_dir: &Path, network: &str) -> PathBuf {
    state_dir.join("chains").join(format!("{}.sqlite", network))
}

impl SimulatedTarget {
    /// A fresh in-memory chain.
    pub fn new(network: &NetworkConfig) -> Result<Self> {
        Self::init(network, Connection::open_in_memory()?)
    }

    /// A chain persisted at `path`, created if it does not exist yet.
    pub fn open(network: &NetworkConfig, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        Self::init(network, conn)
    }

    fn init(network: &NetworkConfig, conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            chain_id: network.chain_id,
            confirmations: network.confirmations,
            conn: Mutex::new(conn),
            faults: Mutex::new(Faults::default()),
        })
    }

    /// Reject every submission whose contract or method is `name`.
    pub fn reject(&self, name: &str) {
        self.faults().reject.insert(name.to_string());
    }

    /// Land the next `n` submissions but report them as unconfirmed.
    pub fn drop_receipts(&self, n: u32) {
        self.faults().drop_receipts = n;
    }

    /// Delay every submission by `latency` before it lands.
    pub fn set_latency(&self, latency: Duration) {
        self.faults().latency = Some(latency);
    }

    pub fn clear_faults(&self) {
        let mut f = self.faults();
        f.reject.clear();
        f.drop_receipts = 0;
        f.latency = None;
    }

    /// Number of instantiate/invoke calls this handle received, including
    /// refused ones.
    pub fn submissions(&self) -> u32 {
        self.faults().submissions
    }

    pub fn instance(&self, address: &str) -> Result<Option<Instance>> {
        let instance = self
            .conn()
            .query_row(
                "SELECT contract, args FROM instances WHERE address = ?1",
                params![address],
                |row| {
                    Ok(Instance {
                        contract: row.get(0)?,
                        args: json_column(row, 1)?,
                    })
                },
            )
            .optional()?;
        Ok(instance)
    }

    /// Every instance, in the order they landed.
    pub fn instances(&self) -> Result<Vec<(String, Instance)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT address, contract, args FROM instances ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get(0)?,
                Instance {
                    contract: row.get(1)?,
                    args: json_column(row, 2)?,
                },
            ))
        })?;
        let mut instances = Vec::new();
        for row in rows {
            instances.push(row?);
        }
        Ok(instances)
    }

    pub fn calls(&self) -> Result<Vec<CallRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT address, method, args FROM calls ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok(CallRecord {
                address: row.get(0)?,
                method: row.get(1)?,
                args: json_column(row, 2)?,
            })
        })?;
        let mut calls = Vec::new();
        for row in rows {
            calls.push(row?);
        }
        Ok(calls)
    }

    pub fn block_number(&self) -> Result<u64> {
        let block = self
            .conn()
            .query_row("SELECT block FROM chain WHERE id = 0", [], |row| row.get(0))?;
        Ok(block)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check faults for a submission. Returns whether the receipt should be
    /// dropped after landing, and the latency to apply.
    fn admit(&self, name: &str) -> std::result::Result<(bool, Option<Duration>), TargetError> {
        let mut f = self.faults();
        f.submissions += 1;
        if f.reject.contains(name) {
            return Err(TargetError::Rejected(format!("execution reverted: {}", name)));
        }
        let drop = f.drop_receipts > 0;
        if drop {
            f.drop_receipts -= 1;
        }
        Ok((drop, f.latency))
    }

    /// Apply a submission. Nonce, block and receipt are read and written in
    /// one write transaction; a tag that already landed returns its receipt.
    fn land(&self, submission: &Submission) -> std::result::Result<Receipt, TargetError> {
        let mut conn = self.conn();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(unpersisted)?;
        if let Some(receipt) = select_receipt(&tx, &submission.tag).map_err(unpersisted)? {
            return Ok(receipt);
        }

        let (block, nonce): (u64, u64) = tx
            .query_row("SELECT block, nonce FROM chain WHERE id = 0", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(unpersisted)?;
        let token = format!(
            "0x{}",
            blake3::hash(format!("{}:{}", submission.tag, nonce).as_bytes()).to_hex()
        );
        let args = serde_json::to_string(&submission.args).map_err(unpersisted)?;

        let result = match &submission.operation {
            Operation::Instantiate { contract } => {
                let digest = blake3::hash(format!("{}:{}", self.chain_id, nonce).as_bytes());
                let address = format!("0x{}", &digest.to_hex()[..40]);
                tx.execute(
                    "INSERT INTO instances (address, contract, args) VALUES (?1, ?2, ?3)",
                    params![address, contract, args],
                )
                .map_err(unpersisted)?;
                Value::String(address)
            }
            Operation::Invoke { address, method } => {
                let exists: bool = tx
                    .query_row(
                        "SELECT EXISTS (SELECT 1 FROM instances WHERE address = ?1)",
                        params![address],
                        |row| row.get(0),
                    )
                    .map_err(unpersisted)?;
                if !exists {
                    return Err(TargetError::Rejected(format!(
                        "no instance at {}",
                        address
                    )));
                }
                tx.execute(
                    "INSERT INTO calls (address, method, args) VALUES (?1, ?2, ?3)",
                    params![address, method, args],
                )
                .map_err(unpersisted)?;
                Value::Null
            }
        };

        let block = block + u64::from(self.confirmations.max(1));
        tx.execute(
            "UPDATE chain SET block = ?1, nonce = ?2 WHERE id = 0",
            params![block, nonce + 1],
        )
        .map_err(unpersisted)?;
        let receipt = Receipt { result, token };
        tx.execute(
            "INSERT INTO receipts (tag, result, token, block) VALUES (?1, ?2, ?3, ?4)",
            params![
                submission.tag,
                serde_json::to_string(&receipt.result).map_err(unpersisted)?,
                receipt.token,
                block,
            ],
        )
        .map_err(unpersisted)?;
        tx.commit().map_err(unpersisted)?;
        Ok(receipt)
    }

    async fn execute(&self, name: &str, submission: &Submission) -> std::result::Result<Receipt, TargetError> {
        let (drop, latency) = self.admit(name)?;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let receipt = self.land(submission)?;
        tracing::debug!(
            action = %submission.action_id,
            token = %receipt.token,
            "simulated submission landed"
        );
        if drop {
            return Err(TargetError::Unconfirmed(
                "receipt lost after broadcast".to_string(),
            ));
        }
        Ok(receipt)
    }
}

fn unpersisted(e: impl std::fmt::Display) -> TargetError {
    TargetError::Unconfirmed(format!("chain state: {}", e))
}

fn json_column<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn select_receipt(conn: &Connection, tag: &str) -> rusqlite::Result<Option<Receipt>> {
    conn.query_row(
        "SELECT result, token FROM receipts WHERE tag = ?1",
        params![tag],
        |row| {
            Ok(Receipt {
                result: json_column(row, 0)?,
                token: row.get(1)?,
            })
        },
    )
    .optional()
}

#[async_trait]
impl TargetAdapter for SimulatedTarget {
    async fn instantiate(&self, submission: &Submission) -> std::result::Result<Receipt, TargetError> {
        let Operation::Instantiate { contract } = &submission.operation else {
            return Err(TargetError::Rejected("not an instantiation".to_string()));
        };
        self.execute(contract, submission).await
    }

    async fn invoke(&self, submission: &Submission) -> std::result::Result<Receipt, TargetError> {
        let Operation::Invoke { method, .. } = &submission.operation else {
            return Err(TargetError::Rejected("not an invocation".to_string()));
        };
        self.execute(method, submission).await
    }

    async fn lookup(&self, tag: &str) -> std::result::Result<Option<Receipt>, TargetError> {
        select_receipt(&self.conn(), tag).map_err(unpersisted)
    }
}

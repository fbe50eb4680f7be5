//! Append-only JSONL audit log, one file per run.

use crate::core::types::{DeployEvent, TimestampedEvent};
use crate::error::Result;
use chrono::Utc;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

/// Derive the event log path for a run.
pub fn event_log_path(state_dir: &Path, run_id: &str) -> PathBuf {
    state_dir.join("runs").join(run_id).join("events.jsonl")
}

/// Generate an executor owner tag for in-flight claims.
pub fn generate_owner_tag() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default() as u64;
    format!("x-{}-{:012x}", std::process::id(), nanos & 0xFFFF_FFFF_FFFF)
}

/// Append an event to the run's event log.
pub fn append_event(state_dir: &Path, run_id: &str, event: DeployEvent) -> Result<()> {
    let path = event_log_path(state_dir, run_id);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let te = TimestampedEvent {
        ts: Utc::now(),
        event,
    };
    let json = serde_json::to_string(&te)?;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(file, "{}", json)?;

    Ok(())
}

/// Append an event, logging instead of failing. The audit log is secondary
/// to the ledger and must never abort a run.
pub fn record(state_dir: Option<&Path>, run_id: &str, event: DeployEvent) {
    let Some(dir) = state_dir else {
        return;
    };
    if let Err(e) = append_event(dir, run_id, event) {
        tracing::warn!(run = run_id, error = %e, "cannot append audit event");
    }
}

/// Read all events of a run. A missing log yields an empty list.
pub fn read_events(state_dir: &Path, run_id: &str) -> Result<Vec<TimestampedEvent>> {
    let path = event_log_path(state_dir, run_id);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = std::fs::File::open(&path)?;
    let mut events = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        events.push(serde_json::from_str(&line)?);
    }
    Ok(events)
}

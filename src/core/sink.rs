// src/core/sink.rs — Persistence of iteration records and run outcomes
//
// Appends one JSON object per line to a history file. Image bytes are never
// written; records carry the SHA-256 fingerprint instead.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::types::{AuditReport, IterationRecord, RunOutcome, StopReason};

/// Receives every record as it is appended and the final outcome of a run.
pub trait HistorySink: Send + Sync {
    fn record(&self, shot_id: &str, record: &IterationRecord) -> anyhow::Result<()>;
    fn outcome(&self, outcome: &RunOutcome) -> anyhow::Result<()>;
}

/// Final line written for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeEntry {
    pub shot_id: String,
    pub stop_reason: StopReason,
    pub iterations: usize,
    pub best_iteration: Option<u8>,
    pub total_cost: f64,
    pub final_audit: Option<AuditReport>,
    pub completed_at: DateTime<Utc>,
}

impl OutcomeEntry {
    pub fn from_outcome(outcome: &RunOutcome) -> Self {
        let best = outcome.best_record();
        Self {
            shot_id: outcome.shot_id.clone(),
            stop_reason: outcome.stop_reason,
            iterations: outcome.history.len(),
            best_iteration: best.map(|r| r.iteration),
            total_cost: outcome.total_cost,
            final_audit: best.and_then(|r| r.audit.clone()),
            completed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HistoryLine {
    Iteration {
        shot_id: String,
        record: IterationRecord,
    },
    Outcome(OutcomeEntry),
}

/// JSONL history file shared by concurrent runs.
pub struct JsonlSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn append(&self, line: &HistoryLine) -> anyhow::Result<()> {
        let json = serde_json::to_string(line)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "{}", json)?;
        Ok(())
    }

    /// Read back the last `limit` lines, skipping any that fail to parse.
    pub fn read_recent(&self, limit: usize) -> Vec<HistoryLine> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(limit);
        lines[start..]
            .iter()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }
}

impl HistorySink for JsonlSink {
    fn record(&self, shot_id: &str, record: &IterationRecord) -> anyhow::Result<()> {
        self.append(&HistoryLine::Iteration {
            shot_id: shot_id.to_string(),
            record: record.clone(),
        })
    }

    fn outcome(&self, outcome: &RunOutcome) -> anyhow::Result<()> {
        self.append(&HistoryLine::Outcome(OutcomeEntry::from_outcome(outcome)))
    }
}

/// In-memory sink, handy for embedding and tests.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<HistoryLine>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<HistoryLine> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl HistorySink for MemorySink {
    fn record(&self, shot_id: &str, record: &IterationRecord) -> anyhow::Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(HistoryLine::Iteration {
                shot_id: shot_id.to_string(),
                record: record.clone(),
            });
        Ok(())
    }

    fn outcome(&self, outcome: &RunOutcome) -> anyhow::Result<()> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(HistoryLine::Outcome(OutcomeEntry::from_outcome(outcome)));
        Ok(())
    }
}

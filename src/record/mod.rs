//! Fire-and-forget run recording.
//!
//! Completed runs are summarized and appended to a JSONL archive under
//! the user's home directory (default `~/.conductor/runs/runs.jsonl`).
//! Recording rides a bounded channel drained by a worker task; a full
//! queue or a failed write drops the record with a warning and never
//! surfaces to the caller.

use crate::workflow::step::{StepStatus, TeamResult};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

const ARCHIVE_FILE: &str = "runs.jsonl";

/// One archived run, small enough to grep years of history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub task: String,
    pub success: bool,
    /// Whether the caller wants this run mined for future improvements.
    pub self_improve: bool,
    pub duration_ms: i64,
    pub steps: Vec<StepSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSummary {
    pub step_id: String,
    pub role: String,
    pub status: StepStatus,
    pub retries: u32,
    pub duration_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    fn from_result(result: &TeamResult, workflow_id: &str, self_improve: bool) -> Self {
        Self {
            run_id: result.run_id,
            workflow_id: workflow_id.to_string(),
            task: result.task.clone(),
            success: result.success,
            self_improve,
            duration_ms: result.duration_ms(),
            steps: result
                .steps
                .iter()
                .map(|s| StepSummary {
                    step_id: s.step.id.clone(),
                    role: s.step.role.clone(),
                    status: s.status,
                    retries: s.retries,
                    duration_ms: s.duration_ms(),
                    error: s.error.clone(),
                })
                .collect(),
            error: result.error.clone(),
            recorded_at: Utc::now(),
        }
    }
}

/// Queue-backed recorder. Dropping it without [`RunRecorder::shutdown`]
/// abandons whatever the worker has not flushed yet.
pub struct RunRecorder {
    tx: mpsc::Sender<RunRecord>,
    worker: JoinHandle<()>,
}

impl RunRecorder {
    pub fn new(archive_dir: &Path, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<RunRecord>(capacity.max(1));
        let dir = archive_dir.to_path_buf();
        let worker = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                if let Err(e) = append_record(&dir, &record) {
                    tracing::warn!(run_id = %record.run_id, error = %e, "failed to archive run");
                }
            }
        });
        Self { tx, worker }
    }

    /// Recorder archiving to `~/.conductor/runs`.
    pub fn with_default_dir() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))?;
        Ok(Self::new(
            &home.join(".conductor").join("runs"),
            DEFAULT_QUEUE_CAPACITY,
        ))
    }

    /// Hand a finished run to the archive worker. Never blocks and never
    /// fails the caller; a full or closed queue drops the record.
    pub fn record(&self, result: &TeamResult, workflow_id: &str, self_improve: bool) {
        let record = RunRecord::from_result(result, workflow_id, self_improve);
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                tracing::warn!(run_id = %record.run_id, "run recorder queue full, dropping record");
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                tracing::warn!(run_id = %record.run_id, "run recorder closed, dropping record");
            }
        }
    }

    /// Close the queue and wait for the worker to drain it.
    pub async fn shutdown(self) {
        drop(self.tx);
        let _ = self.worker.await;
    }
}

fn append_record(dir: &Path, record: &RunRecord) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create archive dir: {}", dir.display()))?;
    let path = dir.join(ARCHIVE_FILE);
    let line = serde_json::to_string(record).context("Failed to serialize run record")?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open archive: {}", path.display()))?;
    writeln!(file, "{}", line)
        .with_context(|| format!("Failed to append to archive: {}", path.display()))?;
    Ok(())
}

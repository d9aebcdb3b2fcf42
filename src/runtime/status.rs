use crate::consts::STATUS_RING_CAPACITY;
use crate::utils::EtaTracker;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Where the importer currently is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportPhase {
    Idle,
    DetermineTarget,
    Fetch,
    Map,
    Persist,
}

impl fmt::Display for ImportPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImportPhase::Idle => "idle",
            ImportPhase::DetermineTarget => "determining next block",
            ImportPhase::Fetch => "fetching",
            ImportPhase::Map => "mapping",
            ImportPhase::Persist => "saving",
        };
        f.write_str(s)
    }
}

/// Progress reporting from the importer. Calls never fail and never block for long.
pub trait StatusSink: Send + Sync {
    fn add_log(&self, message: &str);
    fn add_error(&self, message: &str, cause: Option<&anyhow::Error>);
    fn set_imported_block_count(&self, height: u64);
    fn set_phase(&self, phase: ImportPhase, height: Option<u64>);
    fn record_import_duration(&self, elapsed: Duration);
    /// Time left for `remaining_blocks`, from the durations recorded so far.
    fn estimate_remaining(&self, remaining_blocks: u64) -> Duration;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub at: String,
    pub message: String,
}

/// Serializable view of [`ImportStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportProgress {
    pub last_persisted_height: Option<u64>,
    pub current_height: Option<u64>,
    pub phase: ImportPhase,
    pub imported_blocks: u64,
    pub average_import_secs: Option<f64>,
    pub recent_logs: Vec<StatusEntry>,
    pub recent_errors: Vec<StatusEntry>,
}

struct StatusState {
    last_persisted_height: Option<u64>,
    current_height: Option<u64>,
    phase: ImportPhase,
    logs: VecDeque<StatusEntry>,
    errors: VecDeque<StatusEntry>,
    durations: EtaTracker,
}

/// In-memory status with bounded log/error rings, mirrored to `tracing`.
pub struct ImportStatus {
    capacity: usize,
    state: Mutex<StatusState>,
}

impl ImportStatus {
    pub fn new() -> Self {
        Self::with_capacity(STATUS_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(StatusState {
                last_persisted_height: None,
                current_height: None,
                phase: ImportPhase::Idle,
                logs: VecDeque::new(),
                errors: VecDeque::new(),
                durations: EtaTracker::new(0.0),
            }),
        }
    }

    pub fn snapshot(&self) -> ImportProgress {
        let st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        ImportProgress {
            last_persisted_height: st.last_persisted_height,
            current_height: st.current_height,
            phase: st.phase,
            imported_blocks: st.durations.blocks_measured(),
            average_import_secs: (st.durations.blocks_measured() > 0).then(|| st.durations.secs_per_block()),
            recent_logs: st.logs.iter().cloned().collect(),
            recent_errors: st.errors.iter().cloned().collect(),
        }
    }

    fn push(&self, ring: impl FnOnce(&mut StatusState) -> &mut VecDeque<StatusEntry>, message: String) {
        let entry = StatusEntry { at: now_rfc3339(), message };
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let ring = ring(&mut *st);
        if ring.len() == self.capacity {
            ring.pop_front();
        }
        ring.push_back(entry);
    }
}

impl Default for ImportStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for ImportStatus {
    fn add_log(&self, message: &str) {
        tracing::info!("{message}");
        self.push(|st| &mut st.logs, message.to_string());
    }

    fn add_error(&self, message: &str, cause: Option<&anyhow::Error>) {
        let full = match cause {
            Some(e) => format!("{message}: {e:#}"),
            None => message.to_string(),
        };
        tracing::error!("{full}");
        self.push(|st| &mut st.errors, full);
    }

    fn set_imported_block_count(&self, height: u64) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).last_persisted_height = Some(height);
    }

    fn set_phase(&self, phase: ImportPhase, height: Option<u64>) {
        let mut st = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        st.phase = phase;
        st.current_height = height;
    }

    fn record_import_duration(&self, elapsed: Duration) {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).durations.record(elapsed);
    }

    fn estimate_remaining(&self, remaining_blocks: u64) -> Duration {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).durations.eta(remaining_blocks)
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default()
}

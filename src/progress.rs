//! Index progress: a polled status snapshot for the
//! `index_status` tool, not a stderr event stream. The shape — a trait
//! plus an `Arc`-shared observer — mirrors a push-style progress
//! reporter, but callers here poll a live snapshot rather than receive a
//! push per event.

use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Lifecycle status of the current (or most recent) index run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStatus {
    Idle,
    Running,
    Complete,
    Failed,
}

/// Sub-phase within a running index.
#[derive(Clone, Copy, Debug, Eq, PartialEq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexStage {
    Discovering,
    Chunking,
    Embedding,
    Finalizing,
}

/// Snapshot returned by the `index_status` tool.
#[derive(Clone, Debug, serde::Serialize)]
pub struct IndexProgress {
    pub status: IndexStatus,
    pub stage: Option<IndexStage>,
    pub files_total: u64,
    pub files_processed: u64,
    pub chunks_indexed: u64,
    #[serde(skip)]
    pub started_at: Option<Instant>,
    pub error_message: Option<String>,
}

impl IndexProgress {
    fn idle() -> Self {
        Self {
            status: IndexStatus::Idle,
            stage: None,
            files_total: 0,
            files_processed: 0,
            chunks_indexed: 0,
            started_at: None,
            error_message: None,
        }
    }

    /// Percentage complete, 0-100. `None` total reads as 0%, not a
    /// division-by-zero panic.
    pub fn progress_pct(&self) -> f64 {
        if self.files_total == 0 {
            return 0.0;
        }
        (self.files_processed as f64 / self.files_total as f64) * 100.0
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.started_at.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }
}

/// Notified whenever the tracked progress changes. Used by the MCP
/// resource surface to push `query_metrics`-style updates without
/// polling the tracker directly.
pub trait ProgressObserver: Send + Sync {
    fn on_update(&self, progress: &IndexProgress);
}

/// Shared, `RwLock`-guarded progress state for one index run.
pub struct ProgressTracker {
    state: RwLock<IndexProgress>,
    observers: RwLock<Vec<Arc<dyn ProgressObserver>>>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(IndexProgress::idle()),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn ProgressObserver>) {
        self.observers.write().unwrap().push(observer);
    }

    fn notify(&self) {
        let snapshot = self.snapshot();
        for observer in self.observers.read().unwrap().iter() {
            observer.on_update(&snapshot);
        }
    }

    pub fn start(&self, files_total: u64) {
        {
            let mut state = self.state.write().unwrap();
            *state = IndexProgress {
                status: IndexStatus::Running,
                stage: Some(IndexStage::Discovering),
                files_total,
                files_processed: 0,
                chunks_indexed: 0,
                started_at: Some(Instant::now()),
                error_message: None,
            };
        }
        self.notify();
    }

    pub fn set_stage(&self, stage: IndexStage) {
        self.state.write().unwrap().stage = Some(stage);
        self.notify();
    }

    pub fn advance_files(&self, n: u64) {
        self.state.write().unwrap().files_processed += n;
        self.notify();
    }

    pub fn advance_chunks(&self, n: u64) {
        self.state.write().unwrap().chunks_indexed += n;
        self.notify();
    }

    pub fn complete(&self) {
        {
            let mut state = self.state.write().unwrap();
            state.status = IndexStatus::Complete;
            state.stage = None;
        }
        self.notify();
    }

    pub fn fail(&self, message: impl Into<String>) {
        {
            let mut state = self.state.write().unwrap();
            state.status = IndexStatus::Failed;
            state.error_message = Some(message.into());
        }
        self.notify();
    }

    pub fn snapshot(&self) -> IndexProgress {
        self.state.read().unwrap().clone()
    }
}

/// Thousands-grouped formatting for human-readable tool output
/// (`"1,234,567"`).
pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len().saturating_sub(1)) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

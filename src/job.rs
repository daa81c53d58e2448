// src/job.rs - Job records and their lifecycle events
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use crate::doc::PlotDoc;

/// Lowest accepted plotting speed, in percent.
pub const MIN_SPEED: u32 = 10;
/// Format tag assumed when a document does not declare one.
pub const DEFAULT_FORMAT: &str = "A3 Landscape";
/// Physical size assumed when a document does not declare one (A3 landscape).
pub const DEFAULT_SIZE: PaperSize = PaperSize {
    width_mm: 420.0,
    height_mm: 297.0,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Waiting,
    Plotting,
    Canceled,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaperSize {
    pub width_mm: f64,
    pub height_mm: f64,
}

/// Per-job plotting parameters, taken from the document metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct JobParams {
    /// Speed in percent, clamped to `[MIN_SPEED, 100]`.
    pub speed: u32,
    pub format: String,
    pub size: PaperSize,
}

impl JobParams {
    pub fn from_doc(doc: &PlotDoc) -> Self {
        let meta = doc.meta();
        Self {
            speed: meta.speed.unwrap_or(100).clamp(MIN_SPEED, 100),
            format: meta
                .format
                .clone()
                .unwrap_or_else(|| DEFAULT_FORMAT.to_string()),
            size: match (meta.width_mm, meta.height_mm) {
                (Some(width_mm), Some(height_mm)) => PaperSize {
                    width_mm,
                    height_mm,
                },
                _ => DEFAULT_SIZE,
            },
        }
    }
}

/// Simulation results computed once before a job is queued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PlotStats {
    /// Estimated plot duration in seconds.
    pub time_estimate: f64,
    pub distance_total: f64,
    pub distance_pen_down: f64,
    pub pen_lifts: u32,
    pub layers: u32,
}

/// Lifecycle events delivered to whoever submitted the job.
///
/// Delivery is fire-and-forget: a submitter that went away (dropped its
/// receiver) silently stops receiving events, and one observer can never
/// block another or the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    QueuePosition { position: i64, client: String },
    Done { client: String },
    Canceled { client: String },
    Error { message: String, client: String },
}

pub type EventSender = mpsc::UnboundedSender<JobEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<JobEvent>;

/// Mutable job state; the lock is never held across an await point.
#[derive(Debug)]
pub struct JobState {
    pub status: JobStatus,
    /// Last position value delivered to the observer, to suppress duplicates.
    pub position_notified: Option<i64>,
    /// Where the job is currently persisted on disk.
    pub save_path: Option<PathBuf>,
    /// Partial output of a paused plot, required to resume or walk home.
    pub last_output: Option<String>,
    /// Completed repeat passes when the repeat-jobs policy is enabled.
    pub repetitions: u32,
    /// Full restarts after hard device errors.
    pub restarts: u32,
}

/// One submitted unit of plotting work, tied to a client identity.
#[derive(Debug)]
pub struct Job {
    pub client: String,
    pub doc: PlotDoc,
    pub params: JobParams,
    pub stats: PlotStats,
    pub received_at: DateTime<Utc>,
    pub loaded_from_file: bool,
    events: EventSender,
    cancel_requested: AtomicBool,
    state: Mutex<JobState>,
}

impl Job {
    pub fn new(
        client: impl Into<String>,
        doc: PlotDoc,
        params: JobParams,
        stats: PlotStats,
        events: EventSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            client: client.into(),
            doc,
            params,
            stats,
            received_at: Utc::now(),
            loaded_from_file: false,
            events,
            cancel_requested: AtomicBool::new(false),
            state: Mutex::new(JobState::new(None)),
        })
    }

    /// Rebuild a job from its persisted copy. The event channel is detached:
    /// the original submitter is gone after a restart.
    pub fn resumed(
        client: impl Into<String>,
        doc: PlotDoc,
        params: JobParams,
        stats: PlotStats,
        received_at: DateTime<Utc>,
        save_path: PathBuf,
    ) -> Arc<Self> {
        let (events, _) = mpsc::unbounded_channel();
        Arc::new(Self {
            client: client.into(),
            doc,
            params,
            stats,
            received_at,
            loaded_from_file: true,
            events,
            cancel_requested: AtomicBool::new(false),
            state: Mutex::new(JobState::new(Some(save_path))),
        })
    }

    pub fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn request_cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Best-effort event delivery; a closed channel is not an error.
    pub fn send(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }
}

impl JobState {
    fn new(save_path: Option<PathBuf>) -> Self {
        Self {
            status: JobStatus::Waiting,
            position_notified: None,
            save_path,
            last_output: None,
            repetitions: 0,
            restarts: 0,
        }
    }
}

//! Background sync loop with pause/resume/stop flags shared across threads.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::remote::RecordsApi;
use crate::sync::{SyncContext, sync_cycle};

const SLEEP_SLICE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Running,
    Paused,
    Stopped,
}

impl WorkerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
        }
    }
}

#[derive(Debug, Default)]
struct ControlFlags {
    paused: AtomicBool,
    stopped: AtomicBool,
}

/// Cheap to clone; every clone steers the same worker.
#[derive(Debug, Clone, Default)]
pub struct WorkerControl {
    flags: Arc<ControlFlags>,
}

impl WorkerControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.flags.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.flags.paused.store(false, Ordering::SeqCst);
    }

    pub fn stop(&self) {
        self.flags.stopped.store(true, Ordering::SeqCst);
    }

    pub fn status(&self) -> WorkerStatus {
        if self.flags.stopped.load(Ordering::SeqCst) {
            WorkerStatus::Stopped
        } else if self.flags.paused.load(Ordering::SeqCst) {
            WorkerStatus::Paused
        } else {
            WorkerStatus::Running
        }
    }

    /// Blocks while paused. Returns `false` once stopped.
    pub fn wait_while_paused(&self) -> bool {
        loop {
            match self.status() {
                WorkerStatus::Running => return true,
                WorkerStatus::Stopped => return false,
                WorkerStatus::Paused => sleep(SLEEP_SLICE),
            }
        }
    }

    /// Sleeps `duration` in short slices. Returns `false` if stopped meanwhile.
    pub fn sleep_interval(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.status() == WorkerStatus::Stopped {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkerSummary {
    pub cycles: usize,
    pub days_synced: usize,
    pub downloaded: usize,
    pub finalized: usize,
    pub errors: usize,
}

pub struct SyncWorker<'a> {
    pub context: SyncContext<'a>,
    pub api: Box<dyn RecordsApi + 'a>,
    pub control: WorkerControl,
    pub interval: Duration,
}

impl SyncWorker<'_> {
    /// Run cycles until stopped or `max_cycles` is reached.
    pub fn run(&mut self, max_cycles: Option<usize>) -> WorkerSummary {
        let mut summary = WorkerSummary::default();
        info!(interval_secs = self.interval.as_secs(), "sync worker started");
        loop {
            if !self.control.wait_while_paused() {
                break;
            }
            let cycle = sync_cycle(&self.context, self.api.as_mut(), Some(&self.control));
            summary.cycles += 1;
            summary.days_synced += cycle.days.len();
            summary.downloaded += cycle.days.iter().map(|day| day.downloaded()).sum::<usize>();
            summary.finalized += cycle
                .days
                .iter()
                .filter(|day| day.finalized_path.is_some())
                .count();
            summary.errors += cycle.errors.len()
                + cycle.days.iter().map(|day| day.errors.len()).sum::<usize>();
            if !cycle.errors.is_empty() {
                warn!(cycle = summary.cycles, errors = cycle.errors.len(), "sync cycle finished with errors");
            }

            if max_cycles.is_some_and(|limit| summary.cycles >= limit) {
                break;
            }
            if !self.control.sleep_interval(self.interval) {
                break;
            }
        }
        info!(cycles = summary.cycles, status = self.control.status().as_str(), "sync worker stopped");
        summary
    }
}

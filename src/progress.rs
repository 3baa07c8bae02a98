//! Progress reporting capability injected into downloads and verification.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

pub type TaskId = u64;

/// Receives task events. Implementations must not influence outcomes.
pub trait ProgressReporter: Send + Sync {
    fn add_task(&self, description: &str, total: u64) -> TaskId;
    fn update_task(&self, id: TaskId, completed: u64, description: Option<&str>);
    fn finish_task(&self, id: TaskId, success: bool, message: Option<&str>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn add_task(&self, _description: &str, _total: u64) -> TaskId {
        0
    }

    fn update_task(&self, _id: TaskId, _completed: u64, _description: Option<&str>) {}

    fn finish_task(&self, _id: TaskId, _success: bool, _message: Option<&str>) {}
}

/// Terminal progress bars, one per task.
pub struct TerminalProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<TaskId, ProgressBar>>,
    next_id: AtomicU64,
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl TerminalProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn style(total: u64) -> ProgressStyle {
        let template = if total > 1024 {
            "{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})"
        } else {
            "{msg} {spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len}"
        };
        ProgressStyle::default_bar()
            .template(template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-")
    }
}

impl ProgressReporter for TerminalProgress {
    fn add_task(&self, description: &str, total: u64) -> TaskId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let pb = self.multi.add(ProgressBar::new(total));
        pb.set_style(Self::style(total));
        pb.set_message(description.to_string());
        if let Ok(mut bars) = self.bars.lock() {
            bars.insert(id, pb);
        }
        id
    }

    fn update_task(&self, id: TaskId, completed: u64, description: Option<&str>) {
        if let Ok(bars) = self.bars.lock() {
            if let Some(pb) = bars.get(&id) {
                pb.set_position(completed);
                if let Some(description) = description {
                    pb.set_message(description.to_string());
                }
            }
        }
    }

    fn finish_task(&self, id: TaskId, success: bool, message: Option<&str>) {
        let pb = self.bars.lock().ok().and_then(|mut bars| bars.remove(&id));
        if let Some(pb) = pb {
            let fallback = if success { "done" } else { "failed" };
            pb.finish_with_message(message.unwrap_or(fallback).to_string());
        }
    }
}

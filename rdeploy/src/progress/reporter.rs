//! Ordered progress stream for one unit of work

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::progress::event::{ProgressEvent, ProgressSink, ProgressStatus};

#[derive(Debug, Default)]
struct Stream {
    started: bool,
    finished: bool,
    last: u8,
}

/// Emits one project's events in a well-formed order: a single `start`,
/// non-decreasing `progress`, then exactly one `complete` or `error`.
/// Calls that would break the order are dropped.
pub struct ProgressReporter {
    sink: Arc<dyn ProgressSink>,
    project_id: u64,
    stream: Mutex<Stream>,
}

impl ProgressReporter {
    pub fn new(sink: Arc<dyn ProgressSink>, project_id: u64) -> Self {
        Self {
            sink,
            project_id,
            stream: Mutex::new(Stream::default()),
        }
    }

    pub fn project_id(&self) -> u64 {
        self.project_id
    }

    fn emit(&self, status: ProgressStatus, message: &str, progress: u8) {
        self.sink
            .publish(self.project_id, ProgressEvent::new(status, message, progress));
    }

    pub fn start(&self, message: &str) {
        let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        if stream.started {
            debug!("Duplicate start for project {} ignored", self.project_id);
            return;
        }
        stream.started = true;
        self.emit(ProgressStatus::Start, message, 0);
    }

    /// Report a percentage; values below the last one are raised to it
    pub fn progress(&self, percent: u8, message: &str) {
        let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        if stream.finished {
            return;
        }
        if !stream.started {
            stream.started = true;
            self.emit(ProgressStatus::Start, message, 0);
        }
        let percent = percent.min(100).max(stream.last);
        stream.last = percent;
        self.emit(ProgressStatus::Progress, message, percent);
    }

    pub fn complete(&self, message: &str) {
        self.finish(ProgressStatus::Complete, message);
    }

    pub fn fail(&self, message: &str) {
        self.finish(ProgressStatus::Error, message);
    }

    pub fn is_finished(&self) -> bool {
        self.stream.lock().unwrap_or_else(|e| e.into_inner()).finished
    }

    fn finish(&self, status: ProgressStatus, message: &str) {
        let mut stream = self.stream.lock().unwrap_or_else(|e| e.into_inner());
        if stream.finished {
            debug!("Second terminal event for project {} ignored", self.project_id);
            return;
        }
        if !stream.started {
            stream.started = true;
            self.emit(ProgressStatus::Start, message, 0);
        }
        stream.finished = true;
        let percent = match status {
            ProgressStatus::Complete => 100,
            _ => stream.last,
        };
        stream.last = percent;
        self.emit(status, message, percent);
    }
}

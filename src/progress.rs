use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives the fraction of the load completed, in `[0, 1]`.
pub trait ProgressSink {
    fn on_progress(&mut self, fraction: f32);
}

impl<F: FnMut(f32)> ProgressSink for F {
    fn on_progress(&mut self, fraction: f32) {
        self(fraction)
    }
}

/// Discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&mut self, _fraction: f32) {}
}

/// Shared flag polled by the decoder between slices.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

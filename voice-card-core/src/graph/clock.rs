use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The processing context's own clock: frames rendered divided by sample rate.
///
/// Gain automation is scheduled on this clock. Hold-time bookkeeping uses the
/// wall clock instead; the two are never mixed.
#[derive(Debug, Clone)]
pub struct ContextClock {
    frames: Arc<AtomicU64>,
    sample_rate: f64,
}

impl ContextClock {
    pub fn new(sample_rate: f64) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate,
        }
    }

    /// Context time in seconds.
    pub fn current_time(&self) -> f64 {
        self.frames.load(Ordering::SeqCst) as f64 / self.sample_rate
    }

    pub(crate) fn advance(&self, frames: usize) {
        self.frames.fetch_add(frames as u64, Ordering::SeqCst);
    }
}

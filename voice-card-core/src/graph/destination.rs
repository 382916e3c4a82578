use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::error::CaptureError;

/// Consumer of mixed audio. Receives interleaved samples in the stream's format.
///
/// Sinks run while the stream's sink list is locked: they must not call back
/// into `subscribe`/`unsubscribe` on the same stream.
pub type StreamSink = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// Handle returned by [`MixedStream::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

struct StreamHub {
    sample_rate: f64,
    channels: u16,
    sinks: Mutex<Vec<(SinkId, StreamSink)>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// The mix-out node: the single stream the recorder and the meter read from.
///
/// Cheap to clone; all clones address the same destination.
#[derive(Clone)]
pub struct MixedStream {
    hub: Arc<StreamHub>,
}

impl MixedStream {
    pub fn new(sample_rate: f64, channels: u16) -> Self {
        Self {
            hub: Arc::new(StreamHub {
                sample_rate,
                channels,
                sinks: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.hub.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.hub.channels
    }

    /// Attach a sink. Fails once the stream has been closed.
    pub fn subscribe(&self, sink: StreamSink) -> Result<SinkId, CaptureError> {
        if self.is_closed() {
            return Err(CaptureError::RecorderInit("mixed stream is closed".into()));
        }
        let id = SinkId(self.hub.next_id.fetch_add(1, Ordering::SeqCst));
        self.hub.sinks.lock().push((id, sink));
        Ok(id)
    }

    /// Detach a sink, dropping it. Returns whether it was attached.
    pub fn unsubscribe(&self, id: SinkId) -> bool {
        let mut sinks = self.hub.sinks.lock();
        let before = sinks.len();
        sinks.retain(|(sink_id, _)| *sink_id != id);
        sinks.len() != before
    }

    /// Deliver a buffer to every sink, in subscription order.
    pub fn push(&self, samples: &[f32]) {
        if samples.is_empty() || self.is_closed() {
            return;
        }
        for (_, sink) in self.hub.sinks.lock().iter_mut() {
            sink(samples);
        }
    }

    /// Stop delivering audio and drop every sink.
    pub fn close(&self) {
        if !self.hub.closed.swap(true, Ordering::SeqCst) {
            self.hub.sinks.lock().clear();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.hub.closed.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.sinks.lock().len()
    }
}

impl std::fmt::Debug for MixedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixedStream")
            .field("sample_rate", &self.hub.sample_rate)
            .field("channels", &self.hub.channels)
            .field("closed", &self.is_closed())
            .finish()
    }
}

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::graph::destination::{MixedStream, SinkId};
use crate::models::error::CaptureError;
use crate::models::recording_result::FinalizedAudio;

/// One-shot completion callback.
pub type FinalizedCallback = Box<dyn FnOnce(&FinalizedAudio) + Send + 'static>;

/// Result of [`CaptureSession::stop`].
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Finalized(FinalizedAudio),
    AlreadyStopped,
}

/// Append-only chunk store. A chunk closes every `chunk_samples` samples.
#[derive(Debug, Default)]
pub struct CaptureBuffer {
    chunks: Vec<Vec<f32>>,
    pending: Vec<f32>,
    chunk_samples: usize,
}

impl CaptureBuffer {
    pub fn new(chunk_samples: usize) -> Self {
        Self {
            chunks: Vec::new(),
            pending: Vec::with_capacity(chunk_samples),
            chunk_samples: chunk_samples.max(1),
        }
    }

    pub fn append(&mut self, samples: &[f32]) {
        let mut rest = samples;
        while !rest.is_empty() {
            let room = self.chunk_samples - self.pending.len();
            let take = room.min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.chunk_samples {
                let chunk = std::mem::replace(&mut self.pending, Vec::with_capacity(self.chunk_samples));
                self.chunks.push(chunk);
                log::debug!("Capture chunk {} closed", self.chunks.len());
            }
        }
    }

    /// Completed chunks so far.
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Close the trailing partial chunk and concatenate everything in
    /// receipt order. Returns the samples and the chunk count.
    pub fn freeze(mut self) -> (Vec<f32>, usize) {
        if !self.pending.is_empty() {
            let tail = std::mem::take(&mut self.pending);
            self.chunks.push(tail);
        }
        let count = self.chunks.len();
        (self.chunks.concat(), count)
    }
}

enum Phase {
    Idle,
    Recording {
        stream: MixedStream,
        sink: SinkId,
        buffer: Arc<Mutex<CaptureBuffer>>,
    },
    Stopped,
}

/// Chunked recorder reading the graph's mixed stream.
pub struct CaptureSession {
    chunk_duration: Duration,
    phase: Phase,
    on_finalized: Option<FinalizedCallback>,
}

impl CaptureSession {
    pub fn new(chunk_duration: Duration) -> Self {
        Self {
            chunk_duration,
            phase: Phase::Idle,
            on_finalized: None,
        }
    }

    /// Register the callback fired when the capture is finalized.
    pub fn set_on_finalized<F>(&mut self, callback: F)
    where
        F: FnOnce(&FinalizedAudio) + Send + 'static,
    {
        self.on_finalized = Some(Box::new(callback));
    }

    /// Begin recording `stream` in fixed-length chunks.
    ///
    /// Fails with `RecorderInit` if the stream has no usable format or has
    /// already been closed.
    pub fn start(&mut self, stream: &MixedStream) -> Result<(), CaptureError> {
        if self.is_recording() {
            return Err(CaptureError::InvalidState("capture already running".into()));
        }
        if stream.sample_rate() <= 0.0 || stream.channels() == 0 {
            return Err(CaptureError::RecorderInit(format!(
                "unusable stream format: {} Hz, {} channels",
                stream.sample_rate(),
                stream.channels()
            )));
        }
        let chunk_samples =
            (stream.sample_rate() * self.chunk_duration.as_secs_f64()) as usize * stream.channels() as usize;
        if chunk_samples == 0 {
            return Err(CaptureError::RecorderInit("chunk duration too short".into()));
        }

        let buffer = Arc::new(Mutex::new(CaptureBuffer::new(chunk_samples)));
        let sink_buffer = Arc::clone(&buffer);
        let sink = stream.subscribe(Box::new(move |samples| sink_buffer.lock().append(samples)))?;

        log::debug!("Capture started ({} samples per chunk)", chunk_samples);
        self.phase = Phase::Recording {
            stream: stream.clone(),
            sink,
            buffer,
        };
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.phase, Phase::Recording { .. })
    }

    /// Completed chunks of the running capture.
    pub fn chunk_count(&self) -> usize {
        match &self.phase {
            Phase::Recording { buffer, .. } => buffer.lock().chunk_count(),
            _ => 0,
        }
    }

    /// Stop without finalizing. The completion callback is dropped unfired.
    pub fn discard(&mut self) {
        if let Phase::Recording { stream, sink, .. } = std::mem::replace(&mut self.phase, Phase::Stopped) {
            stream.unsubscribe(sink);
            log::debug!("Capture discarded");
        }
        self.on_finalized = None;
    }

    /// Finalize the capture. A second call reports `AlreadyStopped`.
    pub fn stop(&mut self) -> StopOutcome {
        let (stream, sink, buffer) = match std::mem::replace(&mut self.phase, Phase::Stopped) {
            Phase::Recording { stream, sink, buffer } => (stream, sink, buffer),
            previous => {
                self.phase = previous;
                log::debug!("Capture stop ignored, not recording");
                return StopOutcome::AlreadyStopped;
            }
        };

        stream.unsubscribe(sink);
        let collected = std::mem::take(&mut *buffer.lock());
        let (samples, chunk_count) = collected.freeze();

        let audio = FinalizedAudio {
            samples,
            sample_rate: stream.sample_rate().round() as u32,
            channels: stream.channels(),
            chunk_count,
        };
        log::info!("Capture finalized: {:.2}s in {} chunks", audio.duration_secs(), chunk_count);

        if let Some(callback) = self.on_finalized.take() {
            callback(&audio);
        }
        StopOutcome::Finalized(audio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn buffer_closes_chunks_at_boundaries() {
        let mut buffer = CaptureBuffer::new(4);
        buffer.append(&[1.0, 2.0, 3.0]);
        buffer.append(&[4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        assert_eq!(buffer.chunk_count(), 2);

        let (samples, chunks) = buffer.freeze();
        assert_eq!(chunks, 3);
        assert_eq!(samples, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
    }

    #[test]
    fn captures_pushed_audio_in_order() {
        let stream = MixedStream::new(4.0, 1);
        let mut session = CaptureSession::new(Duration::from_secs(1));
        session.start(&stream).unwrap();

        stream.push(&[0.1, 0.2, 0.3]);
        stream.push(&[0.4, 0.5]);
        assert_eq!(session.chunk_count(), 1);

        match session.stop() {
            StopOutcome::Finalized(audio) => {
                assert_eq!(audio.samples, vec![0.1, 0.2, 0.3, 0.4, 0.5]);
                assert_eq!(audio.chunk_count, 2);
                assert_eq!(audio.sample_rate, 4);
            }
            StopOutcome::AlreadyStopped => panic!("expected audio"),
        }
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn second_stop_is_a_no_op() {
        let stream = MixedStream::new(8000.0, 1);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let mut session = CaptureSession::new(Duration::from_secs(1));
        session.set_on_finalized(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        session.start(&stream).unwrap();
        stream.push(&[0.5; 100]);

        assert!(matches!(session.stop(), StopOutcome::Finalized(_)));
        assert_eq!(session.stop(), StopOutcome::AlreadyStopped);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_before_start_reports_already_stopped() {
        let mut session = CaptureSession::new(Duration::from_secs(1));
        assert_eq!(session.stop(), StopOutcome::AlreadyStopped);
        assert!(!session.is_recording());
    }

    #[test]
    fn closed_stream_fails_recorder_init() {
        let stream = MixedStream::new(8000.0, 1);
        stream.close();
        let mut session = CaptureSession::new(Duration::from_secs(1));
        assert!(matches!(session.start(&stream), Err(CaptureError::RecorderInit(_))));
    }

    #[test]
    fn formatless_stream_fails_recorder_init() {
        let mut session = CaptureSession::new(Duration::from_secs(1));
        assert!(matches!(
            session.start(&MixedStream::new(0.0, 1)),
            Err(CaptureError::RecorderInit(_))
        ));
        assert!(matches!(
            session.start(&MixedStream::new(8000.0, 0)),
            Err(CaptureError::RecorderInit(_))
        ));
    }

    #[test]
    fn double_start_is_rejected() {
        let stream = MixedStream::new(8000.0, 1);
        let mut session = CaptureSession::new(Duration::from_secs(1));
        session.start(&stream).unwrap();
        assert!(matches!(session.start(&stream), Err(CaptureError::InvalidState(_))));
    }

    #[test]
    fn discard_never_fires_callback() {
        let stream = MixedStream::new(8000.0, 1);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        let mut session = CaptureSession::new(Duration::from_secs(1));
        session.set_on_finalized(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        session.start(&stream).unwrap();
        stream.push(&[0.5; 100]);
        session.discard();

        assert_eq!(session.stop(), StopOutcome::AlreadyStopped);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(stream.subscriber_count(), 0);
    }

    #[test]
    fn audio_after_stop_is_not_collected() {
        let stream = MixedStream::new(8000.0, 1);
        let mut session = CaptureSession::new(Duration::from_secs(1));
        session.start(&stream).unwrap();
        stream.push(&[0.1; 10]);
        let StopOutcome::Finalized(audio) = session.stop() else {
            panic!("expected audio");
        };
        stream.push(&[0.1; 10]);
        assert_eq!(audio.samples.len(), 10);
    }
}

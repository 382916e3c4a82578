/// Circular f32 sample buffer between a capture thread and the graph.
///
/// Wrap in `Arc<parking_lot::Mutex<RingBuffer>>` for cross-thread access.
///
/// Overflow behavior: drops oldest samples. A stalled render loop therefore
/// loses the start of the backlog, never the most recent audio.
#[derive(Debug)]
pub struct RingBuffer {
    buffer: Vec<f32>,
    write_index: usize,
    read_index: usize,
    available: usize,
    capacity: usize,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: vec![0.0; capacity],
            write_index: 0,
            read_index: 0,
            available: 0,
            capacity,
        }
    }

    /// Write samples, dropping the oldest on overflow.
    ///
    /// If `samples` is larger than capacity, only the last `capacity` samples are kept.
    pub fn write(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }

        let samples = if samples.len() > self.capacity {
            &samples[samples.len() - self.capacity..]
        } else {
            samples
        };

        let overflow = (self.available + samples.len()).saturating_sub(self.capacity);
        if overflow > 0 {
            self.read_index = (self.read_index + overflow) % self.capacity;
            self.available -= overflow;
        }

        for &sample in samples {
            self.buffer[self.write_index] = sample;
            self.write_index = (self.write_index + 1) % self.capacity;
        }
        self.available += samples.len();
    }

    /// Read and remove up to `count` samples.
    pub fn read(&mut self, count: usize) -> Vec<f32> {
        let to_read = count.min(self.available);
        let mut result = Vec::with_capacity(to_read);
        for i in 0..to_read {
            result.push(self.buffer[(self.read_index + i) % self.capacity]);
        }
        self.read_index = (self.read_index + to_read) % self.capacity;
        self.available -= to_read;
        result
    }

    /// Read exactly `count` samples, filling any shortfall with silence.
    pub fn read_padded(&mut self, count: usize) -> Vec<f32> {
        let mut result = self.read(count);
        result.resize(count, 0.0);
        result
    }

    /// Copy the newest `count` samples without consuming them.
    ///
    /// Zero-filled at the front while fewer than `count` samples have been written.
    pub fn peek_latest(&self, count: usize) -> Vec<f32> {
        let present = count.min(self.available);
        let mut result = vec![0.0; count - present];
        let start = (self.write_index + self.capacity - present) % self.capacity;
        for i in 0..present {
            result.push(self.buffer[(start + i) % self.capacity]);
        }
        result
    }

    /// Number of samples currently available for reading.
    pub fn count(&self) -> usize {
        self.available
    }

    pub fn is_empty(&self) -> bool {
        self.available == 0
    }

    pub fn reset(&mut self) {
        self.write_index = 0;
        self.read_index = 0;
        self.available = 0;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

pub const CHANNELS: usize = 2;
/// Long enough for sixteen eighth notes at 30 BPM
pub const BUFFER_SECONDS: f64 = 16.0;

struct Storage {
    channels: [Box<[AtomicU32]>; CHANNELS],
}

impl Storage {
    fn new(capacity: usize) -> Self {
        Self {
            channels: std::array::from_fn(|_| (0..capacity).map(|_| AtomicU32::new(0)).collect()),
        }
    }

    #[inline]
    fn load(&self, channel: usize, index: usize) -> f32 {
        f32::from_bits(self.channels[channel][index].load(Ordering::Relaxed))
    }

    #[inline]
    fn store(&self, channel: usize, index: usize, value: f32) {
        self.channels[channel][index].store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Samples covered by `steps` eighth notes
pub fn delay_samples(bpm: f64, steps: u8, sample_rate: f64) -> usize {
    let seconds_per_step = 60.0 / bpm / 2.0;
    (seconds_per_step * steps as f64 * sample_rate) as usize
}

/// Stereo loop/delay line that records continuously.
///
/// Samples are stored as atomic bit patterns so a [`BufferReader`] on another
/// thread can look at the history without racing the writer. The write cursor
/// is owned here and only moves once per block.
pub struct CircularBuffer {
    storage: Arc<Storage>,
    capacity: usize,
    write_cursor: usize,
}

impl CircularBuffer {
    pub fn new(sample_rate: f64) -> Self {
        Self::with_capacity((BUFFER_SECONDS * sample_rate).ceil() as usize)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            storage: Arc::new(Storage::new(capacity)),
            capacity,
            write_cursor: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn write_cursor(&self) -> usize {
        self.write_cursor
    }

    /// Store at `index mod capacity`
    #[inline]
    pub fn write(&self, channel: usize, index: usize, value: f32) {
        self.storage.store(channel, index % self.capacity, value);
    }

    #[inline]
    pub fn read(&self, channel: usize, index: usize) -> f32 {
        self.storage.load(channel, index % self.capacity)
    }

    /// Sample `delay` samples behind `write_cursor + offset`
    #[inline]
    pub fn read_delayed(&self, channel: usize, write_cursor: usize, delay: usize, offset: usize) -> f32 {
        let delay = delay % self.capacity;
        let index = (write_cursor + offset + self.capacity - delay) % self.capacity;
        self.storage.load(channel, index)
    }

    /// Move the cursor past a processed block
    pub fn advance(&mut self, frames: usize) {
        self.write_cursor = (self.write_cursor + frames) % self.capacity;
    }

    pub fn reader(&self) -> BufferReader {
        BufferReader {
            storage: Arc::clone(&self.storage),
            capacity: self.capacity,
        }
    }
}

/// Read-only view of the loop history for the waveform display
#[derive(Clone)]
pub struct BufferReader {
    storage: Arc<Storage>,
    capacity: usize,
}

impl BufferReader {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Channel average at `index mod capacity`
    pub fn read_mono(&self, index: usize) -> f32 {
        let i = index % self.capacity;
        (self.storage.load(0, i) + self.storage.load(1, i)) * 0.5
    }
}

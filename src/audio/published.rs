use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crate::sequencer::ClockMode;

/// Engine state visible to the control side
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSnapshot {
    pub bpm: f64,
    pub write_cursor: usize,
    pub sequence_position: usize,
    pub note_sequence_position: usize,
    pub samples_to_next_beat: f64,
    pub waveform_rotation: usize,
    pub playing: bool,
    pub source: ClockMode,
    pub sample_active: bool,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            write_cursor: 0,
            sequence_position: 0,
            note_sequence_position: 0,
            samples_to_next_beat: 0.0,
            waveform_rotation: 0,
            playing: false,
            source: ClockMode::Host,
            sample_active: false,
        }
    }
}

fn encode_source(source: ClockMode) -> usize {
    match source {
        ClockMode::Host => 0,
        ClockMode::MidiClock => 1,
        ClockMode::Manual => 2,
    }
}

fn decode_source(v: usize) -> ClockMode {
    match v {
        1 => ClockMode::MidiClock,
        2 => ClockMode::Manual,
        _ => ClockMode::Host,
    }
}

/// Single-writer sequence lock over an [`EngineSnapshot`].
///
/// The audio thread publishes once per block without waiting. Readers retry
/// until they observe an even, unchanged version, so fields always come from
/// the same block.
pub struct PublishedState {
    version: AtomicU64,
    bpm: AtomicU64,
    write_cursor: AtomicUsize,
    sequence_position: AtomicUsize,
    note_sequence_position: AtomicUsize,
    samples_to_next_beat: AtomicU64,
    waveform_rotation: AtomicUsize,
    playing: AtomicBool,
    source: AtomicUsize,
    sample_active: AtomicBool,
    waveform_dirty: AtomicBool,
}

impl PublishedState {
    pub fn new() -> Self {
        let initial = EngineSnapshot::default();
        Self {
            version: AtomicU64::new(0),
            bpm: AtomicU64::new(initial.bpm.to_bits()),
            write_cursor: AtomicUsize::new(0),
            sequence_position: AtomicUsize::new(0),
            note_sequence_position: AtomicUsize::new(0),
            samples_to_next_beat: AtomicU64::new(0f64.to_bits()),
            waveform_rotation: AtomicUsize::new(0),
            playing: AtomicBool::new(false),
            source: AtomicUsize::new(0),
            sample_active: AtomicBool::new(false),
            waveform_dirty: AtomicBool::new(true),
        }
    }

    /// Writer side. Must only be called from one thread.
    pub fn publish(&self, s: &EngineSnapshot) {
        let v = self.version.load(Ordering::Relaxed);
        self.version.store(v.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.bpm.store(s.bpm.to_bits(), Ordering::Relaxed);
        self.write_cursor.store(s.write_cursor, Ordering::Relaxed);
        self.sequence_position.store(s.sequence_position, Ordering::Relaxed);
        self.note_sequence_position
            .store(s.note_sequence_position, Ordering::Relaxed);
        self.samples_to_next_beat
            .store(s.samples_to_next_beat.to_bits(), Ordering::Relaxed);
        self.waveform_rotation.store(s.waveform_rotation, Ordering::Relaxed);
        self.playing.store(s.playing, Ordering::Relaxed);
        self.source.store(encode_source(s.source), Ordering::Relaxed);
        self.sample_active.store(s.sample_active, Ordering::Relaxed);

        self.version.store(v.wrapping_add(2), Ordering::Release);
    }

    pub fn load(&self) -> EngineSnapshot {
        loop {
            let before = self.version.load(Ordering::Acquire);
            if before & 1 == 1 {
                std::hint::spin_loop();
                continue;
            }
            let snapshot = EngineSnapshot {
                bpm: f64::from_bits(self.bpm.load(Ordering::Relaxed)),
                write_cursor: self.write_cursor.load(Ordering::Relaxed),
                sequence_position: self.sequence_position.load(Ordering::Relaxed),
                note_sequence_position: self.note_sequence_position.load(Ordering::Relaxed),
                samples_to_next_beat: f64::from_bits(
                    self.samples_to_next_beat.load(Ordering::Relaxed),
                ),
                waveform_rotation: self.waveform_rotation.load(Ordering::Relaxed),
                playing: self.playing.load(Ordering::Relaxed),
                source: decode_source(self.source.load(Ordering::Relaxed)),
                sample_active: self.sample_active.load(Ordering::Relaxed),
            };
            fence(Ordering::Acquire);
            if self.version.load(Ordering::Relaxed) == before {
                return snapshot;
            }
        }
    }

    pub fn mark_waveform_dirty(&self) {
        self.waveform_dirty.store(true, Ordering::Release);
    }

    /// Returns true once per dirty period
    pub fn take_waveform_dirty(&self) -> bool {
        self.waveform_dirty.swap(false, Ordering::AcqRel)
    }
}

impl Default for PublishedState {
    fn default() -> Self {
        Self::new()
    }
}

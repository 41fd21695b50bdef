use serde::{Deserialize, Serialize};

pub const DEFAULT_BPM: f64 = 120.0;
/// Slowest tempo the loop buffer can cover with a full 16-step delay
pub const MIN_BPM: f64 = 30.0;
pub const MAX_BPM: f64 = 999.0;

/// Which provider drives tempo and position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockMode {
    Host,
    MidiClock,
    Manual,
}

impl ClockMode {
    pub fn from_value(v: f32) -> Self {
        match v.round() as i32 {
            1 => ClockMode::MidiClock,
            2 => ClockMode::Manual,
            _ => ClockMode::Host,
        }
    }

    pub fn value(&self) -> f32 {
        match self {
            ClockMode::Host => 0.0,
            ClockMode::MidiClock => 1.0,
            ClockMode::Manual => 2.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClockMode::Host => "Host",
            ClockMode::MidiClock => "MIDI Clock",
            ClockMode::Manual => "Manual",
        }
    }

    pub fn next(&self) -> Self {
        match self {
            ClockMode::Host => ClockMode::MidiClock,
            ClockMode::MidiClock => ClockMode::Manual,
            ClockMode::Manual => ClockMode::Host,
        }
    }
}

/// Transport state reported by whatever hosts the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostTransport {
    pub bpm: f64,
    pub position_beats: f64,
    pub playing: bool,
}

/// Tempo and position valid for one whole block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSnapshot {
    pub bpm: f64,
    pub position_beats: f64,
    pub playing: bool,
    pub source: ClockMode,
}

impl ClockSnapshot {
    pub fn beats_per_sample(&self, sample_rate: f64) -> f64 {
        self.bpm / (60.0 * sample_rate)
    }
}

/// Replace unusable tempos with the default and keep the rest in range
pub fn sanitize_bpm(bpm: f64) -> f64 {
    if !bpm.is_finite() || bpm <= 0.0 {
        return DEFAULT_BPM;
    }
    bpm.clamp(MIN_BPM, MAX_BPM)
}

/// Folds the three tempo providers into one snapshot per block.
///
/// The position reached at the end of each block is remembered whatever the
/// mode, so switching from the host to an internal clock continues from where
/// the host left off.
pub struct ClockResolver {
    phase_end: f64,
}

impl ClockResolver {
    pub fn new() -> Self {
        Self { phase_end: 0.0 }
    }

    /// Rewind the internal phase, used on MIDI Start
    pub fn restart(&mut self) {
        self.phase_end = 0.0;
    }

    pub fn resolve(
        &mut self,
        mode: ClockMode,
        host: Option<HostTransport>,
        midi_clock_bpm: f64,
        manual_bpm: f64,
        block_len: usize,
        sample_rate: f64,
    ) -> ClockSnapshot {
        let snapshot = match mode {
            ClockMode::Host => match host {
                Some(h) => ClockSnapshot {
                    bpm: sanitize_bpm(h.bpm),
                    position_beats: if h.position_beats.is_finite() {
                        h.position_beats
                    } else {
                        self.phase_end
                    },
                    playing: h.playing,
                    source: mode,
                },
                None => ClockSnapshot {
                    bpm: DEFAULT_BPM,
                    position_beats: self.phase_end,
                    playing: false,
                    source: mode,
                },
            },
            ClockMode::MidiClock | ClockMode::Manual => {
                let bpm = if mode == ClockMode::MidiClock {
                    midi_clock_bpm
                } else {
                    manual_bpm
                };
                ClockSnapshot {
                    bpm: sanitize_bpm(bpm),
                    position_beats: self.phase_end,
                    playing: true,
                    source: mode,
                }
            }
        };

        self.phase_end = if snapshot.playing {
            snapshot.position_beats + block_len as f64 * snapshot.beats_per_sample(sample_rate)
        } else {
            snapshot.position_beats
        };
        snapshot
    }
}

impl Default for ClockResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Play head used when the engine is its own host
pub struct Transport {
    bpm: f64,
    position_beats: f64,
    playing: bool,
}

impl Transport {
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm: bpm.clamp(MIN_BPM, 300.0),
            position_beats: 0.0,
            playing: false,
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm.clamp(MIN_BPM, 300.0);
    }

    pub fn position_beats(&self) -> f64 {
        self.position_beats
    }

    pub fn play(&mut self) {
        self.playing = true;
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    pub fn stop(&mut self) {
        self.playing = false;
        self.position_beats = 0.0;
    }

    pub fn snapshot(&self) -> HostTransport {
        HostTransport {
            bpm: self.bpm,
            position_beats: self.position_beats,
            playing: self.playing,
        }
    }

    /// Move the play head past a processed block
    pub fn advance(&mut self, frames: usize, sample_rate: f64) {
        if self.playing {
            self.position_beats += frames as f64 * self.bpm / (60.0 * sample_rate);
        }
    }
}

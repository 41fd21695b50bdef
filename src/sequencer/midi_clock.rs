/// MIDI clock runs at 24 pulses per quarter note
pub const PULSES_PER_QUARTER: usize = 24;

const WINDOW: usize = PULSES_PER_QUARTER;
const UPDATE_EVERY: u64 = 12;
const MIN_INTERVALS: usize = 4;
const MIN_AVERAGE_INTERVAL: f64 = 0.001;
const DEFAULT_BPM: f64 = 120.0;

/// Smoothed tempo estimate from incoming MIDI clock pulses.
///
/// Intervals live in a fixed ring so a pulse never allocates. The estimate is
/// only refreshed every twelfth pulse to keep display jitter down.
pub struct MidiClockTracker {
    intervals: [f64; WINDOW],
    len: usize,
    head: usize,
    last_pulse: Option<f64>,
    pulse_count: u64,
    detected_bpm: f64,
}

impl MidiClockTracker {
    pub fn new() -> Self {
        Self {
            intervals: [0.0; WINDOW],
            len: 0,
            head: 0,
            last_pulse: None,
            pulse_count: 0,
            detected_bpm: DEFAULT_BPM,
        }
    }

    /// Forget pulse history. The last estimate is kept until new pulses replace it.
    pub fn reset(&mut self) {
        self.len = 0;
        self.head = 0;
        self.last_pulse = None;
        self.pulse_count = 0;
    }

    pub fn process_pulse(&mut self, timestamp_secs: f64) {
        if let Some(last) = self.last_pulse {
            let interval = timestamp_secs - last;
            if interval > 0.0 {
                self.push_interval(interval);
            }
            if self.len >= MIN_INTERVALS && self.pulse_count % UPDATE_EVERY == 0 {
                self.recompute();
            }
        }
        self.last_pulse = Some(timestamp_secs);
        self.pulse_count += 1;
    }

    pub fn bpm(&self) -> f64 {
        self.detected_bpm
    }

    fn push_interval(&mut self, interval: f64) {
        self.intervals[self.head] = interval;
        self.head = (self.head + 1) % WINDOW;
        if self.len < WINDOW {
            self.len += 1;
        }
    }

    fn recompute(&mut self) {
        // Until the ring wraps, the filled entries are the first `len` slots
        let sum: f64 = self.intervals.iter().take(self.len).sum();
        let avg = sum / self.len as f64;
        if avg > MIN_AVERAGE_INTERVAL {
            self.detected_bpm = 60.0 / (PULSES_PER_QUARTER as f64 * avg);
        }
    }
}

impl Default for MidiClockTracker {
    fn default() -> Self {
        Self::new()
    }
}

pub mod clock;
pub mod midi_clock;
pub mod stepper;

pub use clock::{ClockMode, ClockResolver, ClockSnapshot, HostTransport, Transport};
pub use midi_clock::MidiClockTracker;
pub use stepper::{PendingFlags, SequencerState, StepEvents, Tick};

/// Steps in one chopper cycle
pub const STEPS: usize = 16;

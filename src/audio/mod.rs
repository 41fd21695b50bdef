pub mod buffer;
pub mod engine;
pub mod processor;
pub mod published;
pub mod sample;
pub mod waveform;

pub use buffer::BufferReader;
pub use engine::{AudioEngine, EngineIo};
pub use processor::{EngineEvent, EngineShared, ProcessorOutputs};
pub use sample::{LoadedSample, BUILT_IN_SAMPLES};

/// Requests from the control side into the audio engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    // Standalone transport
    Play,
    Pause,
    Stop,
    SetTransportBpm(f32),

    // Sequencer resets
    SequenceReset,
    SoftReset,
    HardReset,
}

impl Command {
    /// Human-readable description of the command
    pub fn description(&self) -> String {
        match self {
            Command::Play => "Play".to_string(),
            Command::Pause => "Pause".to_string(),
            Command::Stop => "Stop".to_string(),
            Command::SetTransportBpm(bpm) => format!("Set transport BPM to {:.1}", bpm),
            Command::SequenceReset => "Sequence reset".to_string(),
            Command::SoftReset => "Soft reset".to_string(),
            Command::HardReset => "Hard reset".to_string(),
        }
    }
}

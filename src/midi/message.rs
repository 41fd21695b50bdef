/// The MIDI messages the chopper reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    Clock,
    Start,
    Continue,
    Stop,
}

/// A message placed inside an audio block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MidiEvent {
    /// Sample offset within the block
    pub offset: usize,
    /// Arrival time in seconds, used to time clock pulses
    pub time_secs: f64,
    pub message: MidiMessage,
}

impl MidiMessage {
    /// Parse raw bytes. Returns `None` for anything the chopper ignores.
    pub fn parse(data: &[u8]) -> Option<Self> {
        let status = *data.first()?;
        match status {
            0xF8 => return Some(MidiMessage::Clock),
            0xFA => return Some(MidiMessage::Start),
            0xFB => return Some(MidiMessage::Continue),
            0xFC => return Some(MidiMessage::Stop),
            _ => {}
        }

        let channel = status & 0x0F;
        match status & 0xF0 {
            0x80 if data.len() >= 3 => Some(MidiMessage::NoteOff {
                channel,
                note: data[1] & 0x7F,
            }),
            // Note On with velocity 0 is a note off
            0x90 if data.len() >= 3 => {
                let note = data[1] & 0x7F;
                match data[2] & 0x7F {
                    0 => Some(MidiMessage::NoteOff { channel, note }),
                    velocity => Some(MidiMessage::NoteOn {
                        channel,
                        note,
                        velocity,
                    }),
                }
            }
            0xB0 if data.len() >= 3 => Some(MidiMessage::ControlChange {
                channel,
                controller: data[1] & 0x7F,
                value: data[2] & 0x7F,
            }),
            _ => None,
        }
    }

    /// Wire bytes and how many of them are used
    pub fn to_bytes(&self) -> ([u8; 3], usize) {
        match *self {
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            } => ([0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F], 3),
            MidiMessage::NoteOff { channel, note } => ([0x80 | (channel & 0x0F), note & 0x7F, 0], 3),
            MidiMessage::ControlChange {
                channel,
                controller,
                value,
            } => ([0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F], 3),
            MidiMessage::Clock => ([0xF8, 0, 0], 1),
            MidiMessage::Start => ([0xFA, 0, 0], 1),
            MidiMessage::Continue => ([0xFB, 0, 0], 1),
            MidiMessage::Stop => ([0xFC, 0, 0], 1),
        }
    }

    /// Channel of a channel-voice message
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiMessage::NoteOn { channel, .. }
            | MidiMessage::NoteOff { channel, .. }
            | MidiMessage::ControlChange { channel, .. } => Some(channel),
            _ => None,
        }
    }
}

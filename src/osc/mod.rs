pub mod bridge;

use rosc::{OscMessage, OscPacket, OscType};

use crate::control::ControlEvent;
use crate::sequencer::STEPS;

pub use bridge::{resolve_target, OscReceiver, OscSender, DEFAULT_OSC_HOST};

/// Messages the engine sends to the network once per tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OscOutbound {
    SequencePosition(i32),
    NoteSequencePosition(i32),
    /// Point the sender at a new host/port
    Retarget(std::net::SocketAddr),
}

impl OscOutbound {
    /// Wire form, `None` for control messages that never leave the process
    pub fn to_message(&self) -> Option<OscMessage> {
        let (addr, value) = match *self {
            OscOutbound::SequencePosition(v) => ("/sequencePosition", v),
            OscOutbound::NoteSequencePosition(v) => ("/noteSequencePosition", v),
            OscOutbound::Retarget(_) => return None,
        };
        Some(OscMessage {
            addr: addr.to_string(),
            args: vec![OscType::Int(value)],
        })
    }
}

/// First argument as a step index, if it is one
fn step_arg(msg: &OscMessage) -> Option<u8> {
    let value = match msg.args.first()? {
        OscType::Int(v) => *v as i64,
        OscType::Long(v) => *v,
        OscType::Float(v) if v.is_finite() => v.round() as i64,
        OscType::Double(v) if v.is_finite() => v.round() as i64,
        _ => return None,
    };
    (0..STEPS as i64).contains(&value).then_some(value as u8)
}

fn parse_message(msg: &OscMessage) -> Option<ControlEvent> {
    match msg.addr.as_str() {
        "/delayTime" => step_arg(msg).map(ControlEvent::DelayTime),
        "/setNoteSequencePosition" => step_arg(msg).map(ControlEvent::Note),
        "/sequenceReset" => Some(ControlEvent::SequenceReset),
        "/softReset" => Some(ControlEvent::SoftReset),
        "/hardReset" | "/timerReset" => Some(ControlEvent::HardReset),
        _ => None,
    }
}

/// Control events carried by a packet, bundles flattened in order.
/// Unknown addresses and bad arguments are dropped.
pub fn parse_packet(packet: &OscPacket, out: &mut Vec<ControlEvent>) {
    match packet {
        OscPacket::Message(msg) => {
            if let Some(event) = parse_message(msg) {
                out.push(event);
            }
        }
        OscPacket::Bundle(bundle) => {
            for inner in &bundle.content {
                parse_packet(inner, out);
            }
        }
    }
}

/// Decode a datagram. Malformed data yields no events.
pub fn parse_datagram(data: &[u8]) -> Vec<ControlEvent> {
    let mut events = Vec::new();
    if let Ok((_, packet)) = rosc::decoder::decode_udp(data) {
        parse_packet(&packet, &mut events);
    }
    events
}

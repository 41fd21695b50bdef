use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use midir::{MidiInput, MidiInputConnection, MidiOutput};

use super::message::{MidiEvent, MidiMessage};

const CLIENT_NAME: &str = "amenchop";
/// Raw input queue; the audio callback drains it every block
pub const INPUT_QUEUE_CAPACITY: usize = 1024;
const OUTPUT_QUEUE_CAPACITY: usize = 512;

/// Information about an available MIDI port
#[derive(Debug, Clone)]
pub struct MidiPortInfo {
    pub index: usize,
    pub name: String,
}

pub fn list_input_ports() -> Vec<MidiPortInfo> {
    let Ok(midi_in) = MidiInput::new(CLIENT_NAME) else {
        return Vec::new();
    };
    midi_in
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(index, port)| {
            midi_in
                .port_name(port)
                .ok()
                .map(|name| MidiPortInfo { index, name })
        })
        .collect()
}

pub fn list_output_ports() -> Vec<MidiPortInfo> {
    let Ok(midi_out) = MidiOutput::new(CLIENT_NAME) else {
        return Vec::new();
    };
    midi_out
        .ports()
        .iter()
        .enumerate()
        .filter_map(|(index, port)| {
            midi_out
                .port_name(port)
                .ok()
                .map(|name| MidiPortInfo { index, name })
        })
        .collect()
}

fn matches(name: &str, pattern: &str) -> bool {
    name.to_lowercase().contains(&pattern.to_lowercase())
}

/// Open MIDI input; parsed messages go to `tx` without blocking the driver thread
pub struct MidiInputLink {
    _connection: MidiInputConnection<()>,
    pub port_name: String,
}

impl MidiInputLink {
    pub fn connect(pattern: &str, tx: Sender<MidiEvent>) -> Result<Self> {
        let midi_in = MidiInput::new(CLIENT_NAME).context("Failed to open MIDI input client")?;
        let ports = midi_in.ports();
        let (port, port_name) = ports
            .iter()
            .find_map(|p| {
                let name = midi_in.port_name(p).ok()?;
                matches(&name, pattern).then(|| (p.clone(), name))
            })
            .ok_or_else(|| anyhow!("No MIDI input port matching '{}'", pattern))?;

        let connection = midi_in
            .connect(
                &port,
                "amenchop-input",
                move |stamp_us, bytes, _| {
                    if let Some(message) = MidiMessage::parse(bytes) {
                        let event = MidiEvent {
                            offset: 0,
                            time_secs: stamp_us as f64 / 1_000_000.0,
                            message,
                        };
                        if let Err(TrySendError::Full(_)) = tx.try_send(event) {
                            log::warn!(target: "midi", "MIDI input queue full, dropping message");
                        }
                    }
                },
                (),
            )
            .map_err(|e| anyhow!("Failed to connect MIDI input '{}': {}", port_name, e))?;

        log::info!(target: "midi", "MIDI input connected: {}", port_name);
        Ok(Self {
            _connection: connection,
            port_name,
        })
    }
}

/// Queue for outbound MIDI, drained by a dedicated sender thread
pub struct MidiOutputLink {
    tx: Sender<MidiMessage>,
    _handle: JoinHandle<()>,
    pub port_name: String,
}

impl MidiOutputLink {
    pub fn connect(pattern: &str) -> Result<Self> {
        let (tx, rx) = bounded::<MidiMessage>(OUTPUT_QUEUE_CAPACITY);
        let (ready_tx, ready_rx) = bounded::<Result<String>>(1);
        let pattern = pattern.to_string();

        let handle = thread::Builder::new()
            .name("midi-out".into())
            .spawn(move || output_loop(&pattern, rx, ready_tx))
            .context("Failed to spawn MIDI output thread")?;

        let port_name = ready_rx
            .recv()
            .map_err(|_| anyhow!("MIDI output thread exited before connecting"))??;
        log::info!(target: "midi", "MIDI output connected: {}", port_name);

        Ok(Self {
            tx,
            _handle: handle,
            port_name,
        })
    }

    pub fn sender(&self) -> Sender<MidiMessage> {
        self.tx.clone()
    }
}

fn output_loop(pattern: &str, rx: Receiver<MidiMessage>, ready: Sender<Result<String>>) {
    let connect = || -> Result<(midir::MidiOutputConnection, String)> {
        let midi_out = MidiOutput::new(CLIENT_NAME).context("Failed to open MIDI output client")?;
        let ports = midi_out.ports();
        let (port, name) = ports
            .iter()
            .find_map(|p| {
                let name = midi_out.port_name(p).ok()?;
                matches(&name, pattern).then(|| (p.clone(), name))
            })
            .ok_or_else(|| anyhow!("No MIDI output port matching '{}'", pattern))?;
        let conn = midi_out
            .connect(&port, "amenchop-output")
            .map_err(|e| anyhow!("Failed to connect MIDI output '{}': {}", name, e))?;
        Ok((conn, name))
    };

    let mut conn = match connect() {
        Ok((conn, name)) => {
            let _ = ready.send(Ok(name));
            conn
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Ends once every sender is dropped
    while let Ok(message) = rx.recv() {
        let (bytes, len) = message.to_bytes();
        if let Err(e) = conn.send(&bytes[..len]) {
            log::warn!(target: "midi", "MIDI send failed: {}", e);
        }
    }
}

pub mod io;
pub mod message;

pub use io::{
    list_input_ports, list_output_ports, MidiInputLink, MidiOutputLink, INPUT_QUEUE_CAPACITY,
};
pub use message::{MidiEvent, MidiMessage};

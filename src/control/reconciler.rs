use super::feedback::ControlEvent;
use crate::command::Command;
use crate::midi::MidiMessage;
use crate::params::{ParamId, ParamStore, TriggerMode};
use crate::sequencer::{PendingFlags, SequencerState, STEPS};

/// Controllers the reconciler listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CcRole {
    SeqReset,
    HardReset,
    SoftReset,
    AdjustForward,
    AdjustBackward,
}

const ROLES: [CcRole; 5] = [
    CcRole::SeqReset,
    CcRole::HardReset,
    CcRole::SoftReset,
    CcRole::AdjustForward,
    CcRole::AdjustBackward,
];

/// Per-block copy of the control parameters
#[derive(Debug, Clone, Copy)]
pub struct ControlConfig {
    pub input_channel: Option<u8>,
    controllers: [u8; 5],
    reset_modes: [TriggerMode; 3],
    pub adjust_step_ms: f64,
    /// Phase adjust accumulator, updated in place by CC buttons
    pub phase_adjust_ms: f64,
}

impl ControlConfig {
    pub fn from_params(params: &ParamStore) -> Self {
        Self {
            input_channel: params.input_channel(),
            controllers: [
                params.controller(ParamId::CcSeqReset),
                params.controller(ParamId::CcHardReset),
                params.controller(ParamId::CcSoftReset),
                params.controller(ParamId::CcAdjustForward),
                params.controller(ParamId::CcAdjustBackward),
            ],
            reset_modes: [
                params.trigger_mode(ParamId::CcSeqResetMode),
                params.trigger_mode(ParamId::CcHardResetMode),
                params.trigger_mode(ParamId::CcSoftResetMode),
            ],
            adjust_step_ms: params.get(ParamId::AdjustStepMs) as f64,
            phase_adjust_ms: params.get(ParamId::PhaseAdjustMs) as f64,
        }
    }
}

fn is_held(value: u8) -> bool {
    value >= 65
}

/// Turns control input into pending flags for the tick loop.
///
/// Controller history survives across blocks so edge triggers work no matter
/// how messages are split between blocks.
pub struct Reconciler {
    previous: [u8; 5],
    applied_phase_adjust_ms: f64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            previous: [0; 5],
            applied_phase_adjust_ms: 0.0,
        }
    }

    /// Incoming note trigger, from MIDI, the UI or OSC
    pub fn apply_note(&mut self, note: u8, flags: &mut PendingFlags, seq: &mut SequencerState) {
        if (note as usize) >= STEPS {
            return;
        }
        seq.set_note_position(note);
        flags.new_note = true;
        flags.last_received_note = note;
    }

    pub fn apply_command(&mut self, cmd: Command, flags: &mut PendingFlags) {
        match cmd {
            Command::SequenceReset => flags.sequence_reset = true,
            Command::SoftReset => flags.soft_reset = true,
            Command::HardReset => flags.hard_reset = true,
            _ => {}
        }
    }

    /// Network events except delay time, which bypasses the sequencer
    pub fn apply_event(
        &mut self,
        event: ControlEvent,
        flags: &mut PendingFlags,
        seq: &mut SequencerState,
    ) {
        match event {
            ControlEvent::Note(n) => self.apply_note(n, flags, seq),
            ControlEvent::SequenceReset => flags.sequence_reset = true,
            ControlEvent::SoftReset => flags.soft_reset = true,
            ControlEvent::HardReset => flags.hard_reset = true,
            ControlEvent::DelayTime(_) => {}
        }
    }

    /// Notes and controllers from the block's MIDI input
    pub fn apply_midi(
        &mut self,
        message: &MidiMessage,
        config: &mut ControlConfig,
        flags: &mut PendingFlags,
        seq: &mut SequencerState,
    ) {
        if let (Some(want), Some(ch)) = (config.input_channel, message.channel()) {
            if want != ch {
                return;
            }
        }
        match *message {
            MidiMessage::NoteOn { note, .. } => self.apply_note(note, flags, seq),
            MidiMessage::ControlChange {
                controller, value, ..
            } => self.apply_controller(controller, value, config, flags),
            _ => {}
        }
    }

    fn apply_controller(
        &mut self,
        controller: u8,
        value: u8,
        config: &mut ControlConfig,
        flags: &mut PendingFlags,
    ) {
        for (i, role) in ROLES.iter().enumerate() {
            if config.controllers[i] != controller {
                continue;
            }
            let previous = self.previous[i];
            match role {
                CcRole::SeqReset | CcRole::HardReset | CcRole::SoftReset => {
                    if config.reset_modes[i].fires(previous, value) {
                        match role {
                            CcRole::SeqReset => flags.sequence_reset = true,
                            CcRole::HardReset => flags.hard_reset = true,
                            _ => flags.soft_reset = true,
                        }
                    }
                }
                CcRole::AdjustForward | CcRole::AdjustBackward => {
                    if TriggerMode::GateOn.fires(previous, value) {
                        let other = if *role == CcRole::AdjustForward { 4 } else { 3 };
                        if is_held(self.previous[other]) {
                            config.phase_adjust_ms = 0.0;
                        } else if *role == CcRole::AdjustForward {
                            config.phase_adjust_ms += config.adjust_step_ms;
                        } else {
                            config.phase_adjust_ms -= config.adjust_step_ms;
                        }
                    }
                }
            }
            self.previous[i] = value;
        }
    }

    /// Portion of the phase adjust not yet applied to the tick grid, in beats
    pub fn take_phase_shift_beats(&mut self, phase_adjust_ms: f64, bpm: f64) -> f64 {
        let delta_ms = phase_adjust_ms - self.applied_phase_adjust_ms;
        self.applied_phase_adjust_ms = phase_adjust_ms;
        if delta_ms == 0.0 {
            return 0.0;
        }
        delta_ms / (60_000.0 / bpm)
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

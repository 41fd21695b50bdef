use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::sequencer::ClockMode;

/// Where step changes to the delay time come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlMode {
    /// Incoming notes recompute the delay time
    Internal,
    /// Delay time is driven by OSC `/delayTime` only
    Osc,
}

impl ControlMode {
    pub fn from_value(v: f32) -> Self {
        if v.round() as i32 == 1 {
            ControlMode::Osc
        } else {
            ControlMode::Internal
        }
    }

    pub fn value(&self) -> f32 {
        match self {
            ControlMode::Internal => 0.0,
            ControlMode::Osc => 1.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ControlMode::Internal => "Internal",
            ControlMode::Osc => "OSC",
        }
    }
}

/// Edge policy for a reset controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerMode {
    /// Fires when the value crosses from below 65 to 65 or above
    GateOn,
    /// Fires when the value crosses from above 63 to 63 or below
    GateOff,
    /// Fires on every message
    Any,
}

impl TriggerMode {
    pub fn from_value(v: f32) -> Self {
        match v.round() as i32 {
            1 => TriggerMode::GateOff,
            2 => TriggerMode::Any,
            _ => TriggerMode::GateOn,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            TriggerMode::GateOn => "Gate-On",
            TriggerMode::GateOff => "Gate-Off",
            TriggerMode::Any => "Any",
        }
    }

    pub fn fires(&self, previous: u8, current: u8) -> bool {
        match self {
            TriggerMode::Any => true,
            TriggerMode::GateOn => previous < 65 && current >= 65,
            TriggerMode::GateOff => previous > 63 && current <= 63,
        }
    }
}

/// What feeds the circular buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputSource {
    Live,
    Sample,
}

impl InputSource {
    pub fn from_value(v: f32) -> Self {
        if v.round() as i32 == 1 {
            InputSource::Sample
        } else {
            InputSource::Live
        }
    }

    pub fn value(&self) -> f32 {
        match self {
            InputSource::Live => 0.0,
            InputSource::Sample => 1.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InputSource::Live => "Live",
            InputSource::Sample => "Sample",
        }
    }
}

pub const PARAM_COUNT: usize = 21;

/// Every tunable parameter of the chopper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamId {
    ControlMode,
    DelayTime,
    SequencePosition,
    NoteSequencePosition,
    MidiInputChannel,
    MidiOutputChannel,
    OscSendPort,
    OscReceivePort,
    CcSeqReset,
    CcSeqResetMode,
    CcHardReset,
    CcHardResetMode,
    CcSoftReset,
    CcSoftResetMode,
    CcAdjustForward,
    CcAdjustBackward,
    AdjustStepMs,
    PhaseAdjustMs,
    ClockMode,
    ManualBpm,
    InputSource,
}

const ALL_PARAMS: [ParamId; PARAM_COUNT] = [
    ParamId::ControlMode,
    ParamId::DelayTime,
    ParamId::SequencePosition,
    ParamId::NoteSequencePosition,
    ParamId::MidiInputChannel,
    ParamId::MidiOutputChannel,
    ParamId::OscSendPort,
    ParamId::OscReceivePort,
    ParamId::CcSeqReset,
    ParamId::CcSeqResetMode,
    ParamId::CcHardReset,
    ParamId::CcHardResetMode,
    ParamId::CcSoftReset,
    ParamId::CcSoftResetMode,
    ParamId::CcAdjustForward,
    ParamId::CcAdjustBackward,
    ParamId::AdjustStepMs,
    ParamId::PhaseAdjustMs,
    ParamId::ClockMode,
    ParamId::ManualBpm,
    ParamId::InputSource,
];

impl ParamId {
    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            ParamId::ControlMode => "Control Mode",
            ParamId::DelayTime => "Delay Time",
            ParamId::SequencePosition => "Sequence Position",
            ParamId::NoteSequencePosition => "Note Sequence Position",
            ParamId::MidiInputChannel => "MIDI In Channel",
            ParamId::MidiOutputChannel => "MIDI Out Channel",
            ParamId::OscSendPort => "OSC Send Port",
            ParamId::OscReceivePort => "OSC Receive Port",
            ParamId::CcSeqReset => "Seq Reset CC",
            ParamId::CcSeqResetMode => "Seq Reset Mode",
            ParamId::CcHardReset => "Hard Reset CC",
            ParamId::CcHardResetMode => "Hard Reset Mode",
            ParamId::CcSoftReset => "Soft Reset CC",
            ParamId::CcSoftResetMode => "Soft Reset Mode",
            ParamId::CcAdjustForward => "Adjust Fwd CC",
            ParamId::CcAdjustBackward => "Adjust Bwd CC",
            ParamId::AdjustStepMs => "Adjust Step (ms)",
            ParamId::PhaseAdjustMs => "Phase Adjust (ms)",
            ParamId::ClockMode => "BPM Sync",
            ParamId::ManualBpm => "Manual BPM",
            ParamId::InputSource => "Input Source",
        }
    }

    /// Key used at the UI, OSC and settings-file boundary
    pub fn key(&self) -> &'static str {
        match self {
            ParamId::ControlMode => "controlMode",
            ParamId::DelayTime => "delayTime",
            ParamId::SequencePosition => "sequencePosition",
            ParamId::NoteSequencePosition => "noteSequencePosition",
            ParamId::MidiInputChannel => "midiInputChannel",
            ParamId::MidiOutputChannel => "midiOutputChannel",
            ParamId::OscSendPort => "oscSendPort",
            ParamId::OscReceivePort => "oscReceivePort",
            ParamId::CcSeqReset => "midiCcSeqReset",
            ParamId::CcSeqResetMode => "midiCcSeqResetMode",
            ParamId::CcHardReset => "midiCcHardReset",
            ParamId::CcHardResetMode => "midiCcHardResetMode",
            ParamId::CcSoftReset => "midiCcSoftReset",
            ParamId::CcSoftResetMode => "midiCcSoftResetMode",
            ParamId::CcAdjustForward => "midiCcDelayAdjustFwd",
            ParamId::CcAdjustBackward => "midiCcDelayAdjustBwd",
            ParamId::AdjustStepMs => "delayAdjustCcStep",
            ParamId::PhaseAdjustMs => "delayAdjust",
            ParamId::ClockMode => "bpmSyncMode",
            ParamId::ManualBpm => "manualBpm",
            ParamId::InputSource => "inputSource",
        }
    }

    /// Returns (min, max, default) for this parameter
    pub fn range(&self) -> (f32, f32, f32) {
        match self {
            ParamId::ControlMode => (0.0, 1.0, 0.0),
            ParamId::DelayTime => (0.0, 15.0, 0.0),
            ParamId::SequencePosition => (0.0, 15.0, 0.0),
            ParamId::NoteSequencePosition => (0.0, 15.0, 0.0),
            ParamId::MidiInputChannel => (0.0, 16.0, 0.0),
            ParamId::MidiOutputChannel => (1.0, 16.0, 1.0),
            ParamId::OscSendPort => (1.0, 65535.0, 9001.0),
            ParamId::OscReceivePort => (1.0, 65535.0, 9002.0),
            ParamId::CcSeqReset => (0.0, 127.0, 93.0),
            ParamId::CcSeqResetMode => (0.0, 2.0, 0.0),
            ParamId::CcHardReset => (0.0, 127.0, 106.0),
            ParamId::CcHardResetMode => (0.0, 2.0, 0.0),
            ParamId::CcSoftReset => (0.0, 127.0, 97.0),
            ParamId::CcSoftResetMode => (0.0, 2.0, 0.0),
            ParamId::CcAdjustForward => (0.0, 127.0, 21.0),
            ParamId::CcAdjustBackward => (0.0, 127.0, 19.0),
            ParamId::AdjustStepMs => (1.0, 128.0, 10.0),
            ParamId::PhaseAdjustMs => (-2000.0, 2000.0, 0.0),
            ParamId::ClockMode => (0.0, 2.0, 0.0),
            ParamId::ManualBpm => (30.0, 300.0, 120.0),
            ParamId::InputSource => (0.0, 1.0, 0.0),
        }
    }

    pub fn default_value(&self) -> f32 {
        self.range().2
    }

    /// Continuous parameters keep fractional values, the rest are rounded
    pub fn is_continuous(&self) -> bool {
        matches!(self, ParamId::ManualBpm | ParamId::PhaseAdjustMs)
    }

    /// Values the engine rewrites on its own and that never reach a settings file
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ParamId::DelayTime | ParamId::SequencePosition | ParamId::NoteSequencePosition
        )
    }

    pub fn from_key(key: &str) -> Option<Self> {
        ALL_PARAMS.iter().copied().find(|p| p.key() == key)
    }

    /// All params in display order
    pub fn all() -> &'static [ParamId] {
        &ALL_PARAMS
    }

    pub fn clamp(&self, value: f32) -> f32 {
        let (min, max, default) = self.range();
        if !value.is_finite() {
            return default;
        }
        let v = value.clamp(min, max);
        if self.is_continuous() {
            v
        } else {
            v.round()
        }
    }
}

/// Lock-free parameter storage shared by the audio thread and the control side
pub struct ParamStore {
    values: [AtomicU32; PARAM_COUNT],
}

impl ParamStore {
    pub fn new() -> Self {
        let values = std::array::from_fn(|i| AtomicU32::new(ALL_PARAMS[i].default_value().to_bits()));
        Self { values }
    }

    pub fn get(&self, id: ParamId) -> f32 {
        f32::from_bits(self.values[id.index()].load(Ordering::Relaxed))
    }

    /// Store a clamped value and return what was stored
    pub fn set(&self, id: ParamId, value: f32) -> f32 {
        let v = id.clamp(value);
        self.values[id.index()].store(v.to_bits(), Ordering::Relaxed);
        v
    }

    pub fn get_int(&self, id: ParamId) -> i32 {
        self.get(id).round() as i32
    }

    pub fn reset_transient(&self) {
        for id in ALL_PARAMS.iter().filter(|p| p.is_transient()) {
            self.set(*id, id.default_value());
        }
    }

    pub fn clock_mode(&self) -> ClockMode {
        ClockMode::from_value(self.get(ParamId::ClockMode))
    }

    pub fn control_mode(&self) -> ControlMode {
        ControlMode::from_value(self.get(ParamId::ControlMode))
    }

    pub fn input_source(&self) -> InputSource {
        InputSource::from_value(self.get(ParamId::InputSource))
    }

    pub fn trigger_mode(&self, id: ParamId) -> TriggerMode {
        TriggerMode::from_value(self.get(id))
    }

    pub fn controller(&self, id: ParamId) -> u8 {
        self.get_int(id).clamp(0, 127) as u8
    }

    /// Output channel as a 0-based MIDI channel nibble
    pub fn output_channel(&self) -> u8 {
        (self.get_int(ParamId::MidiOutputChannel).clamp(1, 16) - 1) as u8
    }

    /// Input channel filter, `None` for omni
    pub fn input_channel(&self) -> Option<u8> {
        match self.get_int(ParamId::MidiInputChannel) {
            ch @ 1..=16 => Some((ch - 1) as u8),
            _ => None,
        }
    }

    pub fn snapshot(&self) -> Vec<(ParamId, f32)> {
        ALL_PARAMS.iter().map(|p| (*p, self.get(*p))).collect()
    }
}

impl Default for ParamStore {
    fn default() -> Self {
        Self::new()
    }
}

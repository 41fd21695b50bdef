use std::sync::Arc;

use crossbeam_channel::Sender;

use super::buffer::{delay_samples, CircularBuffer};
use super::published::{EngineSnapshot, PublishedState};
use super::sample::{LoadedSample, SampleSlots};
use crate::command::Command;
use crate::control::{ControlConfig, ControlEvent, FeedbackQueue, Reconciler, UiNoteSlot};
use crate::midi::{MidiEvent, MidiMessage};
use crate::osc::OscOutbound;
use crate::params::{InputSource, ParamId, ParamStore};
use crate::sequencer::clock::ClockSnapshot;
use crate::sequencer::stepper::TICK_BEATS;
use crate::sequencer::{
    ClockMode, ClockResolver, HostTransport, MidiClockTracker, PendingFlags, SequencerState,
    StepEvents, Tick, STEPS,
};

/// Most MIDI messages one block can emit
pub const MAX_MIDI_OUT: usize = 256;
/// Beats covered by one pass over a static sample
const LOOP_BEATS: f64 = STEPS as f64 * TICK_BEATS;

/// Notifications from the audio thread to whoever observes it
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EngineEvent {
    NoteTriggered { note1: u8, note2: u8 },
    ParamChanged { id: ParamId, value: f32 },
}

/// Handles shared between the audio thread and the control side
#[derive(Clone, Default)]
pub struct EngineShared {
    pub params: Arc<ParamStore>,
    pub published: Arc<PublishedState>,
    pub samples: Arc<SampleSlots>,
    pub ui_note: Arc<UiNoteSlot>,
    pub feedback: Arc<FeedbackQueue>,
}

/// Where the processor sends what it produces besides audio
#[derive(Clone, Default)]
pub struct ProcessorOutputs {
    pub events: Option<Sender<EngineEvent>>,
    pub osc: Option<Sender<OscOutbound>>,
}

fn notify(events: &Option<Sender<EngineEvent>>, event: EngineEvent) {
    if let Some(tx) = events {
        // The observer may be gone or slow; either way the audio thread moves on
        let _ = tx.try_send(event);
    }
}

fn set_and_notify(
    params: &ParamStore,
    events: &Option<Sender<EngineEvent>>,
    id: ParamId,
    value: f32,
) {
    let stored = params.set(id, value);
    notify(events, EngineEvent::ParamChanged { id, value: stored });
}

/// Collects tick output for one block
struct TickSink<'a> {
    params: &'a ParamStore,
    outputs: &'a ProcessorOutputs,
    midi: &'a mut Vec<MidiEvent>,
    channel: u8,
    even_step: bool,
}

impl TickSink<'_> {
    fn push(&mut self, offset: usize, message: MidiMessage) {
        // Capacity is reserved up front; never grow on the audio thread
        if self.midi.len() < self.midi.capacity() {
            self.midi.push(MidiEvent {
                offset,
                time_secs: 0.0,
                message,
            });
        }
    }
}

impl StepEvents for TickSink<'_> {
    fn note_on(&mut self, offset: usize, note: u8, velocity: u8) {
        let channel = self.channel;
        self.push(
            offset,
            MidiMessage::NoteOn {
                channel,
                note,
                velocity,
            },
        );
    }

    fn note_off(&mut self, offset: usize, note: u8) {
        let channel = self.channel;
        self.push(offset, MidiMessage::NoteOff { channel, note });
    }

    fn delay_time_changed(&mut self, steps: u8) {
        set_and_notify(self.params, &self.outputs.events, ParamId::DelayTime, steps as f32);
    }

    fn tick(&mut self, tick: &Tick) {
        if tick.sequence_position % 2 == 0 {
            self.even_step = true;
        }
        let events = &self.outputs.events;
        set_and_notify(
            self.params,
            events,
            ParamId::SequencePosition,
            tick.sequence_position as f32,
        );
        set_and_notify(
            self.params,
            events,
            ParamId::NoteSequencePosition,
            tick.note_sequence_position as f32,
        );
        notify(
            events,
            EngineEvent::NoteTriggered {
                note1: tick.notes.0,
                note2: tick.notes.1,
            },
        );
        if let Some(osc) = &self.outputs.osc {
            let _ = osc.try_send(OscOutbound::SequencePosition(tick.sequence_position as i32));
            let _ = osc.try_send(OscOutbound::NoteSequencePosition(
                tick.note_sequence_position as i32,
            ));
        }
    }
}

/// The whole chopper for one stream: clock, control, sequencer and audio path.
///
/// Created when the stream starts and moved into the audio callback. Every
/// call to [`process_block`](Self::process_block) runs without locking,
/// allocating or logging.
pub struct ChopProcessor {
    sample_rate: f64,
    shared: EngineShared,
    outputs: ProcessorOutputs,
    buffer: CircularBuffer,
    clock: ClockResolver,
    tracker: MidiClockTracker,
    reconciler: Reconciler,
    sequencer: SequencerState,
    flags: PendingFlags,
    midi_out: Vec<MidiEvent>,
}

impl ChopProcessor {
    pub fn new(sample_rate: f64, shared: EngineShared, outputs: ProcessorOutputs) -> Self {
        // A new stream starts from scratch
        shared.params.reset_transient();
        Self {
            sample_rate,
            buffer: CircularBuffer::new(sample_rate),
            shared,
            outputs,
            clock: ClockResolver::new(),
            tracker: MidiClockTracker::new(),
            reconciler: Reconciler::new(),
            sequencer: SequencerState::new(),
            flags: PendingFlags::default(),
            midi_out: Vec::with_capacity(MAX_MIDI_OUT),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn buffer_reader(&self) -> super::buffer::BufferReader {
        self.buffer.reader()
    }

    /// Reset requests from the command bus
    pub fn apply_command(&mut self, cmd: Command) {
        self.reconciler.apply_command(cmd, &mut self.flags);
    }

    /// Process one block in place. Returns the MIDI produced by the block.
    pub fn process_block(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        host: Option<HostTransport>,
        midi_in: &[MidiEvent],
    ) -> &[MidiEvent] {
        let len = left.len().min(right.len());
        self.midi_out.clear();

        let params = &*self.shared.params;
        let events = &self.outputs.events;
        let mut config = ControlConfig::from_params(params);
        let phase_adjust_before = config.phase_adjust_ms;
        let clock_mode = params.clock_mode();

        if let Some(note) = self.shared.ui_note.take() {
            self.reconciler
                .apply_note(note, &mut self.flags, &mut self.sequencer);
        }

        let mut delay_request = None;
        self.shared.feedback.drain(|event| match event {
            ControlEvent::DelayTime(steps) => delay_request = Some(steps),
            other => self
                .reconciler
                .apply_event(other, &mut self.flags, &mut self.sequencer),
        });
        if let Some(steps) = delay_request {
            set_and_notify(params, events, ParamId::DelayTime, steps as f32);
        }

        for event in midi_in {
            match event.message {
                MidiMessage::Clock => self.tracker.process_pulse(event.time_secs),
                MidiMessage::Start => {
                    self.tracker.reset();
                    if clock_mode == ClockMode::MidiClock {
                        self.clock.restart();
                    }
                }
                MidiMessage::Continue | MidiMessage::Stop => {}
                ref message => self.reconciler.apply_midi(
                    message,
                    &mut config,
                    &mut self.flags,
                    &mut self.sequencer,
                ),
            }
        }
        if config.phase_adjust_ms != phase_adjust_before {
            set_and_notify(
                params,
                events,
                ParamId::PhaseAdjustMs,
                config.phase_adjust_ms as f32,
            );
        }

        let snapshot = self.clock.resolve(
            clock_mode,
            host,
            self.tracker.bpm(),
            params.get(ParamId::ManualBpm) as f64,
            len,
            self.sample_rate,
        );
        // A stopped grid has nothing to shift; the change waits for playback
        let shift = if snapshot.playing {
            self.reconciler
                .take_phase_shift_beats(params.get(ParamId::PhaseAdjustMs) as f64, snapshot.bpm)
        } else {
            0.0
        };

        let mut sink = TickSink {
            params,
            outputs: &self.outputs,
            midi: &mut self.midi_out,
            channel: params.output_channel(),
            even_step: false,
        };
        let ticks = self.sequencer.advance(
            &snapshot,
            len,
            self.sample_rate,
            &mut self.flags,
            params.control_mode(),
            shift,
            &mut sink,
        );
        if sink.even_step || !snapshot.playing {
            self.shared.samples.activate_pending();
        }

        let delay_steps = params.get_int(ParamId::DelayTime).clamp(0, STEPS as i32 - 1) as u8;
        let use_sample = params.input_source() == InputSource::Sample;
        let sample_active = use_sample
            && self
                .shared
                .samples
                .with_active(|sample| {
                    render_static(sample, &mut left[..len], &mut right[..len], &snapshot, self.sample_rate, delay_steps)
                })
                .is_some();
        if !sample_active {
            self.render_live(&mut left[..len], &mut right[..len], &snapshot, delay_steps);
        }
        self.buffer.advance(len);

        self.shared.published.publish(&EngineSnapshot {
            bpm: snapshot.bpm,
            write_cursor: self.buffer.write_cursor(),
            sequence_position: self.sequencer.current_position,
            note_sequence_position: self.sequencer.current_note_position,
            samples_to_next_beat: self.sequencer.samples_to_next_tick,
            waveform_rotation: self.sequencer.waveform_rotation,
            playing: snapshot.playing,
            source: snapshot.source,
            sample_active,
        });
        if ticks > 0 || !snapshot.playing {
            self.shared.published.mark_waveform_dirty();
        }

        &self.midi_out
    }

    /// Record the input, then replace it with the delayed signal
    fn render_live(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        clock: &ClockSnapshot,
        delay_steps: u8,
    ) {
        let cursor = self.buffer.write_cursor();
        for (i, (l, r)) in left.iter().zip(right.iter()).enumerate() {
            self.buffer.write(0, cursor + i, *l);
            self.buffer.write(1, cursor + i, *r);
        }
        if !clock.playing || delay_steps == 0 {
            return;
        }
        let delay = delay_samples(clock.bpm, delay_steps, self.sample_rate)
            .min(self.buffer.capacity() - 1);
        for (i, (l, r)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
            *l = self.buffer.read_delayed(0, cursor, delay, i);
            *r = self.buffer.read_delayed(1, cursor, delay, i);
        }
    }
}

/// Phase-locked playback: sixteen steps always span the whole sample
fn render_static(
    sample: &LoadedSample,
    left: &mut [f32],
    right: &mut [f32],
    clock: &ClockSnapshot,
    sample_rate: f64,
    delay_steps: u8,
) {
    if !clock.playing || sample.is_empty() {
        left.fill(0.0);
        right.fill(0.0);
        return;
    }
    let beats_per_sample = clock.beats_per_sample(sample_rate);
    let start = clock.position_beats - delay_steps as f64 * TICK_BEATS;
    let frames = sample.len() as f64;
    for (i, (l, r)) in left.iter_mut().zip(right.iter_mut()).enumerate() {
        let beats = start + i as f64 * beats_per_sample;
        let phase = beats.rem_euclid(LOOP_BEATS) / LOOP_BEATS;
        let (sl, sr) = sample.frame_at(phase * frames);
        *l = sl;
        *r = sr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::{bounded, Receiver};

    const SR: f64 = 44100.0;
    const BLOCK: usize = 512;

    struct Rig {
        processor: ChopProcessor,
        shared: EngineShared,
        events: Receiver<EngineEvent>,
        osc: Receiver<OscOutbound>,
        position: f64,
        sample_index: usize,
    }

    impl Rig {
        fn new() -> Self {
            let shared = EngineShared::default();
            let (event_tx, events) = bounded(4096);
            let (osc_tx, osc) = bounded(4096);
            let outputs = ProcessorOutputs {
                events: Some(event_tx),
                osc: Some(osc_tx),
            };
            Self {
                processor: ChopProcessor::new(SR, shared.clone(), outputs),
                shared,
                events,
                osc,
                position: 0.0,
                sample_index: 0,
            }
        }

        fn input(index: usize) -> f32 {
            ((index % 1000) as f32) / 1000.0
        }

        /// Run one block of a ramp signal with a playing 120 BPM host
        fn block(&mut self, midi: &[MidiEvent]) -> (Vec<f32>, Vec<f32>, Vec<MidiEvent>) {
            self.block_with(Some(HostTransport {
                bpm: 120.0,
                position_beats: self.position,
                playing: true,
            }), midi)
        }

        fn block_with(
            &mut self,
            host: Option<HostTransport>,
            midi: &[MidiEvent],
        ) -> (Vec<f32>, Vec<f32>, Vec<MidiEvent>) {
            let mut left: Vec<f32> = (0..BLOCK).map(|i| Self::input(self.sample_index + i)).collect();
            let mut right = left.clone();
            let out = self
                .processor
                .process_block(&mut left, &mut right, host, midi)
                .to_vec();
            self.sample_index += BLOCK;
            self.position += BLOCK as f64 * 120.0 / (60.0 * SR);
            (left, right, out)
        }

        fn drain_events(&self) -> Vec<EngineEvent> {
            self.events.try_iter().collect()
        }
    }

    fn note_on(note: u8) -> MidiEvent {
        MidiEvent {
            offset: 0,
            time_secs: 0.0,
            message: MidiMessage::NoteOn {
                channel: 0,
                note,
                velocity: 100,
            },
        }
    }

    #[test]
    fn zero_delay_passes_input_through() {
        let mut rig = Rig::new();
        for _ in 0..20 {
            let start = rig.sample_index;
            let (l, r, _) = rig.block(&[]);
            for i in 0..BLOCK {
                assert_eq!(l[i], Rig::input(start + i));
                assert_eq!(r[i], Rig::input(start + i));
            }
        }
    }

    #[test]
    fn delay_reads_history_one_step_back() {
        let mut rig = Rig::new();
        rig.shared.params.set(ParamId::ControlMode, 1.0);
        rig.shared.params.set(ParamId::DelayTime, 1.0);
        let delay = delay_samples(120.0, 1, SR);
        for _ in 0..60 {
            let start = rig.sample_index;
            let (l, _, _) = rig.block(&[]);
            if start >= delay {
                for i in 0..BLOCK {
                    assert_eq!(l[i], Rig::input(start + i - delay));
                }
            }
        }
    }

    #[test]
    fn ticks_emit_note_pairs_on_output_channel() {
        let mut rig = Rig::new();
        rig.shared.params.set(ParamId::MidiOutputChannel, 3.0);
        let (_, _, midi) = rig.block(&[]);
        assert_eq!(
            midi.iter().map(|e| e.message).collect::<Vec<_>>(),
            vec![
                MidiMessage::NoteOn {
                    channel: 2,
                    note: 0,
                    velocity: 100
                },
                MidiMessage::NoteOn {
                    channel: 2,
                    note: 32,
                    velocity: 100
                },
            ]
        );
        let events = rig.drain_events();
        assert!(events.contains(&EngineEvent::NoteTriggered { note1: 0, note2: 32 }));
        let osc: Vec<_> = rig.osc.try_iter().collect();
        assert_eq!(
            osc,
            vec![
                OscOutbound::SequencePosition(0),
                OscOutbound::NoteSequencePosition(0)
            ]
        );
    }

    #[test]
    fn incoming_note_sets_delay_at_next_tick() {
        let mut rig = Rig::new();
        // Park on step 4 so the next tick sounds step 5
        while rig.shared.published.load().sequence_position != 4 {
            rig.block(&[]);
        }
        rig.drain_events();
        // Send note 9 then run until the next tick
        rig.block(&[note_on(9)]);
        while rig.shared.published.load().sequence_position == 4 {
            rig.block(&[]);
        }
        assert_eq!(rig.shared.params.get(ParamId::DelayTime), 12.0);
        let events = rig.drain_events();
        assert!(events.contains(&EngineEvent::ParamChanged {
            id: ParamId::DelayTime,
            value: 12.0
        }));
        assert!(events.contains(&EngineEvent::NoteTriggered { note1: 9, note2: 37 }));
    }

    #[test]
    fn ui_note_and_network_delay_reach_the_engine() {
        let mut rig = Rig::new();
        rig.shared.ui_note.trigger(4);
        rig.shared.feedback.push(ControlEvent::DelayTime(6));
        let (_, _, midi) = rig.block(&[]);
        assert_eq!(
            midi[0].message,
            MidiMessage::NoteOn {
                channel: 0,
                note: 4,
                velocity: 100
            }
        );
        // Internal mode: the note recomputes delay after the network value lands
        assert_eq!(rig.shared.params.get(ParamId::DelayTime), 12.0);
    }

    #[test]
    fn switching_to_manual_keeps_steps_continuous() {
        let mut rig = Rig::new();
        rig.shared.params.set(ParamId::ManualBpm, 120.0);
        let mut last = rig.shared.published.load().sequence_position;
        for b in 0..400 {
            if b == 200 {
                rig.shared.params.set(ParamId::ClockMode, ClockMode::Manual.value());
            }
            rig.block(&[]);
            let pos = rig.shared.published.load().sequence_position;
            let moved = (pos + STEPS - last) % STEPS;
            assert!(moved <= 1, "block {} jumped {} steps", b, moved);
            last = pos;
        }
        assert_eq!(rig.shared.published.load().source, ClockMode::Manual);
    }

    #[test]
    fn stopped_host_passes_audio_and_stays_silent_on_midi() {
        let mut rig = Rig::new();
        let host = Some(HostTransport {
            bpm: 120.0,
            position_beats: 0.0,
            playing: false,
        });
        rig.shared.params.set(ParamId::DelayTime, 3.0);
        let start = rig.sample_index;
        let (l, _, midi) = rig.block_with(host, &[]);
        assert!(midi.is_empty());
        assert_eq!(l[10], Rig::input(start + 10));
        assert!(!rig.shared.published.load().playing);
    }

    #[test]
    fn stopped_transport_keeps_the_waveform_fresh() {
        let mut rig = Rig::new();
        let stopped = Some(HostTransport {
            bpm: 120.0,
            position_beats: 0.0,
            playing: false,
        });
        assert!(rig.shared.published.take_waveform_dirty());
        for _ in 0..3 {
            rig.block_with(stopped, &[]);
            assert!(rig.shared.published.take_waveform_dirty());
        }
    }

    #[test]
    fn phase_adjust_made_while_stopped_lands_on_play() {
        let mut rig = Rig::new();
        let stopped = Some(HostTransport {
            bpm: 120.0,
            position_beats: 0.0,
            playing: false,
        });
        // 100 ms at 120 BPM pulls the grid 0.2 beats earlier
        rig.shared.params.set(ParamId::PhaseAdjustMs, 100.0);
        rig.block_with(stopped, &[]);
        rig.block_with(stopped, &[]);
        rig.position = 0.0;

        let mut tick_blocks = Vec::new();
        for b in 0..30 {
            if !rig.block(&[]).2.is_empty() {
                tick_blocks.push(b);
            }
        }
        // Step 0 at beat 0, step 1 at beat 0.3 (sample 6615) instead of 0.5
        assert_eq!(tick_blocks[..2], [0, 12]);
    }

    #[test]
    fn hard_reset_command_restarts_sequence() {
        let mut rig = Rig::new();
        while rig.shared.published.load().sequence_position != 6 {
            rig.block(&[]);
        }
        rig.processor.apply_command(Command::HardReset);
        let mut midi = Vec::new();
        while midi.is_empty() {
            midi = rig.block(&[]).2;
        }
        assert_eq!(midi[0].offset, 0);
        assert!(matches!(midi[0].message, MidiMessage::NoteOff { .. }));
        assert!(midi.iter().any(|e| e.message
            == MidiMessage::NoteOn {
                channel: 0,
                note: 32,
                velocity: 100
            }));
    }

    #[test]
    fn reset_controller_from_midi() {
        let mut rig = Rig::new();
        while rig.shared.published.load().sequence_position != 2 {
            rig.block(&[]);
        }
        let cc = MidiEvent {
            offset: 0,
            time_secs: 0.0,
            message: MidiMessage::ControlChange {
                channel: 0,
                controller: 97,
                value: 127,
            },
        };
        rig.block(&[cc]);
        while rig.shared.published.load().sequence_position == 2 {
            rig.block(&[]);
        }
        let published = rig.shared.published.load();
        assert_eq!(published.waveform_rotation, 3);
        assert_eq!(published.sequence_position, 0);
    }

    #[test]
    fn midi_clock_mode_follows_pulses() {
        let mut rig = Rig::new();
        rig.shared
            .params
            .set(ParamId::ClockMode, ClockMode::MidiClock.value());
        let interval = 60.0 / (24.0 * 100.0);
        let pulses: Vec<MidiEvent> = (0..48)
            .map(|i| MidiEvent {
                offset: 0,
                time_secs: i as f64 * interval,
                message: MidiMessage::Clock,
            })
            .collect();
        rig.block_with(None, &pulses);
        rig.block_with(None, &[]);
        let published = rig.shared.published.load();
        assert!((published.bpm - 100.0).abs() < 0.5);
        assert!(published.playing);
    }

    fn sample_rig(len: usize) -> Rig {
        let rig = Rig::new();
        let frames: Vec<f32> = (0..len).map(|i| i as f32 / len as f32).collect();
        rig.shared
            .samples
            .stage(LoadedSample::from_channels("amen160.wav", 44100, frames.clone(), frames));
        rig.shared.params.set(ParamId::InputSource, 1.0);
        rig
    }

    #[test]
    fn static_sample_is_phase_locked_to_the_grid() {
        let len = 10_000;
        let mut rig = sample_rig(len);
        for _ in 0..50 {
            let position = rig.position;
            let (l, _, _) = rig.block(&[]);
            if !rig.shared.published.load().sample_active {
                continue;
            }
            let beats_per_sample = 120.0 / (60.0 * SR);
            for i in [0usize, 100, 511] {
                let beats = position + i as f64 * beats_per_sample;
                let phase = beats.rem_euclid(LOOP_BEATS) / LOOP_BEATS;
                let expected = phase * len as f64;
                let idx = expected as usize % len;
                let frac = (expected - expected.floor()) as f32;
                let a = idx as f32 / len as f32;
                let b = ((idx + 1) % len) as f32 / len as f32;
                assert!((l[i] - (a + (b - a) * frac)).abs() < 1e-4);
            }
        }
        assert!(rig.shared.published.load().sample_active);
    }

    #[test]
    fn sample_swap_waits_for_even_step() {
        let mut rig = sample_rig(1000);
        // Step 0 fires in the first block and activates the first sample
        rig.block(&[]);
        assert!(rig.shared.published.load().sample_active);

        // Park on step 1 so the next tick is step 2
        while rig.shared.published.load().sequence_position != 1 {
            rig.block(&[]);
        }
        let frames = vec![0.25f32; 1000];
        rig.shared
            .samples
            .stage(LoadedSample::from_channels("b", 44100, frames.clone(), frames));
        assert!(rig.shared.samples.has_pending());
        rig.block(&[]);
        while rig.shared.published.load().sequence_position == 1 {
            assert!(rig.shared.samples.has_pending());
            rig.block(&[]);
        }
        assert!(!rig.shared.samples.has_pending());
        assert_eq!(rig.shared.samples.active_name().as_deref(), Some("b"));
    }

    #[test]
    fn stopped_transport_activates_staged_sample_immediately() {
        let mut rig = sample_rig(1000);
        let host = Some(HostTransport {
            bpm: 120.0,
            position_beats: 0.0,
            playing: false,
        });
        let (l, _, _) = rig.block_with(host, &[]);
        assert!(!rig.shared.samples.has_pending());
        assert!(l.iter().all(|v| *v == 0.0));
    }
}

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use crossbeam_channel::{Receiver, Sender};
use serde::Serialize;

use crate::audio::sample::{load_wav, resolve_sample_path, search_dirs};
use crate::audio::waveform::{self, Waveform, WAVEFORM_LEN};
use crate::audio::{BufferReader, EngineEvent, EngineShared, LoadedSample};
use crate::command::{Command, CommandSender};
use crate::control::ControlEvent;
use crate::osc::{resolve_target, OscOutbound, OscReceiver, OscSender};
use crate::params::{InputSource, ParamId, ParamStore};
use crate::sequencer::{ClockMode, STEPS};

/// Everything a front end needs to draw one frame
#[derive(Debug, Clone, Serialize)]
pub struct StateSnapshot {
    pub params: BTreeMap<String, f32>,
    pub sequence_position: usize,
    pub note_sequence_position: usize,
    pub bpm: f64,
    pub clock_source: String,
    pub playing: bool,
    pub sample: Option<String>,
    pub sample_pending: bool,
    pub osc_host: String,
}

/// The control surface of the chopper.
///
/// Lives on the UI thread. Talks to the audio thread only through the shared
/// atomics, the command bus and the engine event channel.
pub struct Controller {
    shared: EngineShared,
    commands: CommandSender,
    events: Receiver<EngineEvent>,
    audio: Option<(BufferReader, f64)>,
    waveform: Waveform,
    osc_host: String,
    osc_receiver: Option<OscReceiver>,
    osc_sender: Option<OscSender>,
}

impl Controller {
    pub fn new(
        shared: EngineShared,
        commands: CommandSender,
        events: Receiver<EngineEvent>,
        osc_host: &str,
    ) -> Self {
        Self {
            shared,
            commands,
            events,
            audio: None,
            waveform: [0.0; WAVEFORM_LEN],
            osc_host: osc_host.to_string(),
            osc_receiver: None,
            osc_sender: None,
        }
    }

    /// Start the OSC threads. Returns the queue the engine sends positions to.
    /// Failures are logged; the receiver is retried when its port changes.
    pub fn start_osc(&mut self) -> Option<Sender<OscOutbound>> {
        self.restart_osc_receiver();
        let port = self.shared.params.get_int(ParamId::OscSendPort) as u16;
        let target = resolve_target(&self.osc_host, port).or_else(|e| {
            log::warn!(target: "osc", "{:#}, falling back to localhost", e);
            resolve_target(crate::osc::DEFAULT_OSC_HOST, port)
        });
        match target.and_then(OscSender::spawn) {
            Ok(sender) => {
                let tx = sender.sender();
                self.osc_sender = Some(sender);
                Some(tx)
            }
            Err(e) => {
                log::error!(target: "osc", "OSC output disabled: {:#}", e);
                None
            }
        }
    }

    /// Hook up the running audio engine for waveform extraction
    pub fn attach_audio(&mut self, reader: BufferReader, sample_rate: f64) {
        self.audio = Some((reader, sample_rate));
        self.shared.published.mark_waveform_dirty();
    }

    pub fn request_current_state(&self) -> StateSnapshot {
        let engine = self.shared.published.load();
        let params = self
            .shared
            .params
            .snapshot()
            .into_iter()
            .map(|(id, value)| (id.key().to_string(), value))
            .collect();
        StateSnapshot {
            params,
            sequence_position: engine.sequence_position,
            note_sequence_position: engine.note_sequence_position,
            bpm: engine.bpm,
            clock_source: engine.source.name().to_string(),
            playing: engine.playing,
            sample: self.shared.samples.active_name(),
            sample_pending: self.shared.samples.has_pending(),
            osc_host: self.osc_host.clone(),
        }
    }

    /// Queue a note trigger for the next tick. Notes outside 0-15 are ignored.
    pub fn trigger_note(&self, note: u8) -> bool {
        if note as usize >= STEPS {
            return false;
        }
        self.shared.ui_note.trigger(note);
        true
    }

    pub fn perform_sequence_reset(&self) -> bool {
        self.send(Command::SequenceReset)
    }

    pub fn perform_soft_reset(&self) -> bool {
        self.send(Command::SoftReset)
    }

    pub fn perform_hard_reset(&self) -> bool {
        self.send(Command::HardReset)
    }

    pub fn play(&self) -> bool {
        self.send(Command::Play)
    }

    pub fn pause(&self) -> bool {
        self.send(Command::Pause)
    }

    pub fn stop(&self) -> bool {
        self.send(Command::Stop)
    }

    pub fn set_transport_bpm(&self, bpm: f32) -> bool {
        self.send(Command::SetTransportBpm(bpm))
    }

    fn send(&self, cmd: Command) -> bool {
        self.commands.send(cmd)
    }

    /// Set a parameter by its external key. Returns the value actually stored.
    pub fn set_parameter(&mut self, key: &str, value: f32) -> Result<f32> {
        let id = ParamId::from_key(key).ok_or_else(|| anyhow!("Unknown parameter '{}'", key))?;
        match id {
            ParamId::SequencePosition => bail!("'{}' is read-only", key),
            // Engine-owned values go through the audio thread
            ParamId::DelayTime => {
                let steps = id.clamp(value);
                if !self.shared.feedback.push(ControlEvent::DelayTime(steps as u8)) {
                    bail!("Engine is not keeping up, delay change dropped");
                }
                return Ok(steps);
            }
            ParamId::NoteSequencePosition => {
                let note = id.clamp(value);
                self.trigger_note(note as u8);
                return Ok(note);
            }
            _ => {}
        }

        let previous = self.shared.params.get(id);
        let stored = self.shared.params.set(id, value);
        if stored != previous {
            match id {
                ParamId::OscReceivePort => self.restart_osc_receiver(),
                ParamId::OscSendPort => self.retarget_osc(),
                _ => {}
            }
        }
        Ok(stored)
    }

    pub fn params(&self) -> &ParamStore {
        &self.shared.params
    }

    pub fn osc_host(&self) -> &str {
        &self.osc_host
    }

    /// Send OSC to `host` on the current send port. A host that does not
    /// resolve leaves the previous target in place.
    pub fn set_osc_host(&mut self, host: &str) -> Result<()> {
        let host = host.trim();
        if host.is_empty() {
            bail!("OSC host cannot be empty");
        }
        let port = self.shared.params.get_int(ParamId::OscSendPort) as u16;
        let addr = resolve_target(host, port)?;
        if let Some(sender) = self.osc_sender.as_mut() {
            sender.retarget(addr);
        }
        log::info!(target: "osc", "OSC host {} -> {}", self.osc_host, host);
        self.osc_host = host.to_string();
        Ok(())
    }

    fn restart_osc_receiver(&mut self) {
        // Release the old port before binding the new one
        if let Some(mut old) = self.osc_receiver.take() {
            old.stop();
        }
        let port = self.shared.params.get_int(ParamId::OscReceivePort) as u16;
        match OscReceiver::bind(port, Arc::clone(&self.shared.feedback)) {
            Ok(receiver) => self.osc_receiver = Some(receiver),
            Err(e) => log::error!(target: "osc", "{:#}", e),
        }
    }

    fn retarget_osc(&mut self) {
        let Some(sender) = self.osc_sender.as_mut() else {
            return;
        };
        let port = self.shared.params.get_int(ParamId::OscSendPort) as u16;
        match resolve_target(&self.osc_host, port) {
            Ok(addr) => sender.retarget(addr),
            Err(e) => log::warn!(target: "osc", "{:#}", e),
        }
    }

    /// Look up a sample by name in the sample directories and queue it
    pub fn load_built_in_sample(&self, name: &str) -> Result<()> {
        let path = resolve_sample_path(name, &search_dirs())
            .ok_or_else(|| anyhow!("Sample not found: {}", name))?;
        self.load_sample_file(&path)
    }

    pub fn load_sample_file(&self, path: &Path) -> Result<()> {
        match load_wav(path) {
            Ok(sample) => {
                self.install_sample(sample);
                Ok(())
            }
            Err(e) => {
                log::error!(target: "audio", "{:#}", e);
                Err(e)
            }
        }
    }

    /// Stage a decoded sample and switch the engine over to it
    pub fn install_sample(&self, sample: LoadedSample) {
        let params = &self.shared.params;
        log::info!(
            target: "audio",
            "Loaded {} ({} frames, tempo {:?})",
            sample.name,
            sample.len(),
            sample.tempo
        );
        if let Some(tempo) = sample.tempo {
            params.set(ParamId::ManualBpm, tempo as f32);
        }
        self.shared.samples.stage(sample);
        params.set(ParamId::InputSource, InputSource::Sample.value());
        params.set(ParamId::ClockMode, ClockMode::Manual.value());
    }

    /// Per-step peaks, recomputed only when the engine marked them dirty
    pub fn waveform_snapshot(&mut self) -> &Waveform {
        if let Some((reader, sample_rate)) = &self.audio {
            if self.shared.published.take_waveform_dirty() {
                let engine = self.shared.published.load();
                self.waveform = waveform::extract(&engine, *sample_rate, reader, &self.shared.samples);
            }
        }
        &self.waveform
    }

    /// Note triggers and parameter changes since the last call
    pub fn poll_events(&self) -> Vec<EngineEvent> {
        self.events.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::processor::ChopProcessor;
    use crate::audio::ProcessorOutputs;
    use crate::command::{CommandBus, CommandReceiver};
    use crate::midi::MidiMessage;
    use crate::sequencer::HostTransport;
    use crossbeam_channel::bounded;
    use std::net::UdpSocket;
    use std::time::Duration;

    const SR: f64 = 44100.0;
    const BLOCK: usize = 512;

    struct Rig {
        controller: Controller,
        processor: ChopProcessor,
        commands: CommandReceiver,
        position: f64,
    }

    impl Rig {
        fn new() -> Self {
            let shared = EngineShared::default();
            let bus = CommandBus::new();
            let (event_tx, event_rx) = bounded(4096);
            let mut controller = Controller::new(shared.clone(), bus.sender(), event_rx, "127.0.0.1");
            let processor = ChopProcessor::new(
                SR,
                shared,
                ProcessorOutputs {
                    events: Some(event_tx),
                    osc: None,
                },
            );
            controller.attach_audio(processor.buffer_reader(), SR);
            Self {
                controller,
                processor,
                commands: bus.receiver(),
                position: 0.0,
            }
        }

        /// Run one block; true if a tick fired in it
        fn block(&mut self) -> bool {
            let processor = &mut self.processor;
            self.commands.drain(|cmd| processor.apply_command(cmd));
            let mut l = vec![0.5f32; BLOCK];
            let mut r = vec![0.5f32; BLOCK];
            let host = HostTransport {
                bpm: 120.0,
                position_beats: self.position,
                playing: true,
            };
            let ticked = self
                .processor
                .process_block(&mut l, &mut r, Some(host), &[])
                .iter()
                .any(|e| matches!(e.message, MidiMessage::NoteOn { .. }));
            self.position += BLOCK as f64 * 120.0 / (60.0 * SR);
            ticked
        }

        fn run_until_tick(&mut self) {
            while !self.block() {}
        }
    }

    #[test]
    fn state_snapshot_reports_params_and_positions() {
        let mut rig = Rig::new();
        rig.block();
        rig.run_until_tick();
        rig.run_until_tick();
        let state = rig.controller.request_current_state();
        assert_eq!(state.sequence_position, 2);
        assert_eq!(state.params["sequencePosition"], 2.0);
        assert_eq!(state.note_sequence_position as f32, state.params["noteSequencePosition"]);
        assert_eq!(state.params.get("midiCcSeqReset"), Some(&93.0));
        assert_eq!(state.clock_source, ClockMode::Host.name());
        assert!(state.playing);
        assert!(serde_json::to_string(&state).is_ok());
    }

    #[test]
    fn triggered_note_is_reported_as_event() {
        let mut rig = Rig::new();
        rig.block();
        rig.controller.poll_events();
        assert!(rig.controller.trigger_note(6));
        assert!(!rig.controller.trigger_note(16));
        rig.run_until_tick();
        let events = rig.controller.poll_events();
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::NoteTriggered { note1: 6, .. })));
    }

    #[test]
    fn soft_reset_rotates_the_cycle() {
        let mut rig = Rig::new();
        for _ in 0..4 {
            rig.run_until_tick();
        }
        assert_eq!(rig.controller.request_current_state().sequence_position, 3);
        assert!(rig.controller.perform_soft_reset());
        rig.run_until_tick();
        let state = rig.controller.request_current_state();
        assert_eq!(state.sequence_position, 0);
        assert_eq!(rig.controller.shared.published.load().waveform_rotation, 4);
    }

    #[test]
    fn set_parameter_by_key() {
        let mut rig = Rig::new();
        assert_eq!(rig.controller.set_parameter("manualBpm", 500.0).unwrap(), 300.0);
        assert_eq!(rig.controller.set_parameter("midiCcHardReset", 12.4).unwrap(), 12.0);
        assert!(rig.controller.set_parameter("nope", 1.0).is_err());
        assert!(rig.controller.set_parameter("sequencePosition", 3.0).is_err());
    }

    #[test]
    fn delay_parameter_goes_through_the_engine() {
        let mut rig = Rig::new();
        rig.controller.set_parameter("delayTime", 5.0).unwrap();
        rig.block();
        let events = rig.controller.poll_events();
        assert!(events.contains(&EngineEvent::ParamChanged {
            id: ParamId::DelayTime,
            value: 5.0
        }));
        assert_eq!(rig.controller.request_current_state().params["delayTime"], 5.0);
    }

    #[test]
    fn delay_change_fails_when_the_engine_is_behind() {
        let mut rig = Rig::new();
        while rig.controller.shared.feedback.push(ControlEvent::DelayTime(1)) {}
        assert!(rig.controller.set_parameter("delayTime", 7.0).is_err());
        // Once the engine catches up the change goes through
        rig.block();
        assert_eq!(rig.controller.set_parameter("delayTime", 7.0).unwrap(), 7.0);
    }

    #[test]
    fn osc_host_change_moves_the_sender() {
        let old = UdpSocket::bind("127.0.0.1:0").unwrap();
        let new = UdpSocket::bind("127.0.0.1:0").unwrap();
        new.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

        let mut rig = Rig::new();
        let sender = OscSender::spawn(old.local_addr().unwrap()).unwrap();
        let tx = sender.sender();
        rig.controller.osc_sender = Some(sender);
        rig.controller.osc_host = "192.0.2.1".to_string();
        rig.controller
            .shared
            .params
            .set(ParamId::OscSendPort, new.local_addr().unwrap().port() as f32);

        rig.controller.set_osc_host(" 127.0.0.1 ").unwrap();
        assert_eq!(rig.controller.osc_host(), "127.0.0.1");
        assert_eq!(rig.controller.request_current_state().osc_host, "127.0.0.1");
        tx.send(OscOutbound::SequencePosition(2)).unwrap();
        let mut buf = [0u8; 1024];
        assert!(new.recv(&mut buf).unwrap() > 0);

        let target = rig.controller.osc_sender.as_ref().unwrap().target();
        assert!(rig.controller.set_osc_host("  ").is_err());
        assert_eq!(rig.controller.osc_host(), "127.0.0.1");
        assert_eq!(rig.controller.osc_sender.as_ref().unwrap().target(), target);
    }

    #[test]
    fn installing_a_sample_switches_source_and_tempo() {
        let mut rig = Rig::new();
        let frames = vec![0.25f32; 4096];
        rig.controller
            .install_sample(LoadedSample::from_channels("amen160.wav", 44100, frames.clone(), frames));
        let params = &rig.controller.shared.params;
        assert_eq!(params.input_source(), InputSource::Sample);
        assert_eq!(params.clock_mode(), ClockMode::Manual);
        assert_eq!(params.get(ParamId::ManualBpm), 160.0);
        rig.block();
        let state = rig.controller.request_current_state();
        assert_eq!(state.sample.as_deref(), Some("amen160.wav"));
        assert_eq!(state.bpm, 160.0);
        assert!(rig.controller.waveform_snapshot().iter().all(|v| *v == 0.25));
    }

    #[test]
    fn loading_a_missing_sample_keeps_the_current_one() {
        let rig = Rig::new();
        assert!(rig.controller.load_built_in_sample("definitely-not-a-sample-xyz").is_err());
        assert!(rig
            .controller
            .load_sample_file(Path::new("/definitely/not/here.wav"))
            .is_err());
        assert_eq!(rig.controller.shared.params.input_source(), InputSource::Live);
    }

    #[test]
    fn loading_a_wav_file_stages_it() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("amen180.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..2048 {
            writer.write_sample(8192i16).unwrap();
        }
        writer.finalize().unwrap();

        let rig = Rig::new();
        rig.controller.load_sample_file(&path).unwrap();
        assert!(rig.controller.shared.samples.has_pending());
        assert_eq!(rig.controller.shared.params.get(ParamId::ManualBpm), 180.0);
    }

    #[test]
    fn waveform_is_cached_between_dirty_marks() {
        let mut rig = Rig::new();
        rig.block();
        let first = *rig.controller.waveform_snapshot();
        // Nothing new published, so the cache is returned
        assert!(!rig.controller.shared.published.take_waveform_dirty());
        assert_eq!(*rig.controller.waveform_snapshot(), first);
    }
}

use std::io::{self, Stdout};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossbeam_channel::bounded;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};
use ratatui::Terminal;

use crate::audio::{
    AudioEngine, EngineEvent, EngineIo, EngineShared, ProcessorOutputs, BUILT_IN_SAMPLES,
};
use crate::command::CommandBus;
use crate::config::{save_settings, Settings};
use crate::controller::{Controller, StateSnapshot};
use crate::midi::{MidiInputLink, MidiOutputLink, INPUT_QUEUE_CAPACITY};
use crate::params::{ControlMode, InputSource, ParamId};
use crate::sequencer::ClockMode;
use crate::ui::{
    adjust_step, render_params, render_steps, render_transport, render_waveform,
    ParamEditorState, Theme,
};

const EVENT_QUEUE_CAPACITY: usize = 4096;
/// Monitor refresh, about 30 Hz
const FRAME_INTERVAL: Duration = Duration::from_millis(33);

/// Current UI view
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum View {
    Steps,
    Params,
}

/// Everything the monitor needs to start
pub struct AppConfig {
    pub theme: Theme,
    pub shared: EngineShared,
    pub settings_path: PathBuf,
    pub osc_host: String,
    pub midi_in: Option<String>,
    pub midi_out: Option<String>,
    pub with_input: bool,
    pub transport_bpm: f64,
    pub sample: Option<String>,
    pub autoplay: bool,
}

/// Application state
pub struct App {
    theme: Theme,
    controller: Controller,
    _audio: AudioEngine,
    _midi_in: Option<MidiInputLink>,
    _midi_out: Option<MidiOutputLink>,
    settings_path: PathBuf,
    param_editor: ParamEditorState,
    view: View,
    should_quit: bool,
    /// Index into the built-in sample list for cycling
    sample_index: Option<usize>,
    last_notes: Option<(u8, u8)>,
    /// Temporary status message (e.g., "Saved: amenchop.json")
    status_message: Option<(String, Instant)>,
    /// OSC host being typed, while the prompt is open
    host_entry: Option<String>,
}

impl App {
    pub fn new(config: AppConfig) -> Result<Self> {
        let command_bus = CommandBus::new();
        let (event_tx, event_rx) = bounded(EVENT_QUEUE_CAPACITY);
        let mut controller = Controller::new(
            config.shared.clone(),
            command_bus.sender(),
            event_rx,
            &config.osc_host,
        );
        let osc = controller.start_osc();

        // MIDI is optional; a missing port only costs that direction
        let (midi_in_link, midi_in) = match &config.midi_in {
            Some(pattern) => {
                let (tx, rx) = bounded(INPUT_QUEUE_CAPACITY);
                match MidiInputLink::connect(pattern, tx) {
                    Ok(link) => (Some(link), Some(rx)),
                    Err(e) => {
                        log::error!(target: "midi", "{:#}", e);
                        (None, None)
                    }
                }
            }
            None => (None, None),
        };
        let midi_out_link = match &config.midi_out {
            Some(pattern) => MidiOutputLink::connect(pattern)
                .map_err(|e| log::error!(target: "midi", "{:#}", e))
                .ok(),
            None => None,
        };

        let io = EngineIo {
            commands: command_bus.receiver(),
            midi_in,
            midi_out: midi_out_link.as_ref().map(|l| l.sender()),
        };
        let outputs = ProcessorOutputs {
            events: Some(event_tx),
            osc,
        };
        let audio = AudioEngine::new(
            config.shared,
            outputs,
            io,
            config.with_input,
            config.transport_bpm,
        )?;
        controller.attach_audio(audio.buffer_reader(), audio.sample_rate());

        let mut app = Self {
            theme: config.theme,
            controller,
            _audio: audio,
            _midi_in: midi_in_link,
            _midi_out: midi_out_link,
            settings_path: config.settings_path,
            param_editor: ParamEditorState::new(),
            view: View::Steps,
            should_quit: false,
            sample_index: None,
            last_notes: None,
            status_message: None,
            host_entry: None,
        };

        if let Some(name) = config.sample {
            app.load_sample(&name);
        }
        if config.autoplay {
            app.controller.play();
        }
        Ok(app)
    }

    /// Run the main application loop
    pub fn run(&mut self) -> Result<()> {
        let mut terminal = Self::setup_terminal()?;
        let result = self.main_loop(&mut terminal);
        Self::restore_terminal(&mut terminal)?;
        result
    }

    /// Setup the terminal for TUI
    fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        stdout.execute(EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let terminal = Terminal::new(backend)?;
        Ok(terminal)
    }

    /// Restore terminal to normal state
    fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        disable_raw_mode()?;
        terminal.backend_mut().execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        Ok(())
    }

    fn main_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        loop {
            self.drain_engine_events();
            let state = self.controller.request_current_state();
            terminal.draw(|frame| self.render(frame, &state))?;

            if event::poll(FRAME_INTERVAL)? {
                if let Event::Key(key) = event::read()? {
                    if key.kind == KeyEventKind::Press {
                        self.handle_key(key, &state);
                    }
                }
            }

            if self.should_quit {
                break;
            }
        }
        Ok(())
    }

    fn drain_engine_events(&mut self) {
        for event in self.controller.poll_events() {
            match event {
                EngineEvent::NoteTriggered { note1, note2 } => {
                    self.last_notes = Some((note1, note2));
                }
                EngineEvent::ParamChanged { id, value } => {
                    log::debug!(target: "control", "{} = {}", id.key(), value);
                }
            }
        }
    }

    /// Set a temporary status message shown in the footer
    fn set_status(&mut self, msg: String) {
        self.status_message = Some((msg, Instant::now()));
    }

    fn set_param(&mut self, id: ParamId, value: f32) {
        match self.controller.set_parameter(id.key(), value) {
            Ok(v) => {
                let shown = crate::ui::params::format_value(id, v);
                self.set_status(format!("{}: {}", id.name(), shown));
            }
            Err(e) => self.set_status(format!("{}", e)),
        }
    }

    /// Load a WAV by path, or by name from the sample directories
    fn load_sample(&mut self, name: &str) {
        let path = Path::new(name);
        let result = if path.is_file() {
            self.controller.load_sample_file(path)
        } else {
            self.controller.load_built_in_sample(name)
        };
        match result {
            Ok(()) => self.set_status(format!("Loading: {}", name)),
            Err(e) => self.set_status(format!("Load failed: {}", e)),
        }
    }

    fn cycle_sample(&mut self) {
        let next = self
            .sample_index
            .map_or(0, |i| (i + 1) % BUILT_IN_SAMPLES.len());
        self.sample_index = Some(next);
        self.load_sample(BUILT_IN_SAMPLES[next]);
    }

    fn save_settings_action(&mut self) {
        let state = self.controller.request_current_state();
        let settings = Settings::capture(
            self.controller.params(),
            self.controller.osc_host(),
            state.sample,
        );
        match save_settings(&settings, &self.settings_path) {
            Ok(()) => {
                let name = self
                    .settings_path
                    .file_name()
                    .unwrap_or_default()
                    .to_string_lossy()
                    .to_string();
                self.set_status(format!("Saved: {}", name));
            }
            Err(e) => {
                log::error!(target: "config", "{:#}", e);
                self.set_status(format!("Save failed: {}", e));
            }
        }
    }

    /// Handle key press events
    fn handle_key(&mut self, key: KeyEvent, state: &StateSnapshot) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            if key.code == KeyCode::Char('s') {
                self.save_settings_action();
            }
            return;
        }

        if self.host_entry.is_some() {
            self.handle_host_key(key.code);
            return;
        }

        if self.view == View::Params && self.handle_params_key(key.code, state) {
            return;
        }

        let param = |id: ParamId| state.params.get(id.key()).copied().unwrap_or(0.0);
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Tab => {
                self.view = match self.view {
                    View::Steps => View::Params,
                    View::Params => View::Steps,
                };
            }
            KeyCode::Char(c) if c.is_ascii_hexdigit() && !c.is_ascii_uppercase() => {
                if let Some(note) = c.to_digit(16) {
                    self.controller.trigger_note(note as u8);
                }
            }
            KeyCode::Char(' ') => {
                if state.playing {
                    self.controller.stop();
                } else {
                    self.controller.play();
                }
            }
            KeyCode::Char('p') => {
                if state.playing {
                    self.controller.pause();
                } else {
                    self.controller.play();
                }
            }
            KeyCode::Char('r') => {
                self.controller.perform_sequence_reset();
                self.set_status("Sequence reset".into());
            }
            KeyCode::Char('s') => {
                self.controller.perform_soft_reset();
                self.set_status("Soft reset".into());
            }
            KeyCode::Char('h') => {
                self.controller.perform_hard_reset();
                self.set_status("Hard reset".into());
            }
            KeyCode::Char('m') => {
                let next = ClockMode::from_value(param(ParamId::ClockMode)).next();
                self.set_param(ParamId::ClockMode, next.value());
            }
            KeyCode::Char('i') => {
                let next = match InputSource::from_value(param(ParamId::InputSource)) {
                    InputSource::Live => InputSource::Sample,
                    InputSource::Sample => InputSource::Live,
                };
                self.set_param(ParamId::InputSource, next.value());
            }
            KeyCode::Char('o') => {
                let next = match ControlMode::from_value(param(ParamId::ControlMode)) {
                    ControlMode::Internal => ControlMode::Osc,
                    ControlMode::Osc => ControlMode::Internal,
                };
                self.set_param(ParamId::ControlMode, next.value());
            }
            KeyCode::Char('[') => {
                self.set_param(ParamId::DelayTime, param(ParamId::DelayTime) - 1.0);
            }
            KeyCode::Char(']') => {
                self.set_param(ParamId::DelayTime, param(ParamId::DelayTime) + 1.0);
            }
            KeyCode::Char('-') | KeyCode::Char('+') | KeyCode::Char('=') => {
                let delta = if key.code == KeyCode::Char('-') { -1.0 } else { 1.0 };
                if ClockMode::from_value(param(ParamId::ClockMode)) == ClockMode::Manual {
                    self.set_param(ParamId::ManualBpm, param(ParamId::ManualBpm) + delta);
                } else {
                    let bpm = (state.bpm as f32 + delta).round();
                    self.controller.set_transport_bpm(bpm);
                }
            }
            KeyCode::Char('n') => self.cycle_sample(),
            KeyCode::Char('O') => {
                self.host_entry = Some(self.controller.osc_host().to_string());
            }
            _ => {}
        }
    }

    /// Returns true when the key was consumed by the editor
    fn handle_host_key(&mut self, key: KeyCode) {
        match key {
            KeyCode::Char(c) if !c.is_whitespace() => {
                if let Some(entry) = self.host_entry.as_mut() {
                    entry.push(c);
                }
            }
            KeyCode::Backspace => {
                if let Some(entry) = self.host_entry.as_mut() {
                    entry.pop();
                }
            }
            KeyCode::Esc => self.host_entry = None,
            KeyCode::Enter => {
                let host = self.host_entry.take().unwrap_or_default();
                match self.controller.set_osc_host(&host) {
                    Ok(()) => self.set_status(format!("OSC host: {}", host)),
                    Err(e) => self.set_status(format!("{:#}", e)),
                }
            }
            _ => {}
        }
    }

    fn handle_params_key(&mut self, key: KeyCode, state: &StateSnapshot) -> bool {
        let id = self.param_editor.current_param();
        let current = state.params.get(id.key()).copied().unwrap_or(0.0);
        match key {
            KeyCode::Up => self.param_editor.move_selection(-1),
            KeyCode::Down => self.param_editor.move_selection(1),
            KeyCode::Left => self.set_param(id, current - adjust_step(id, false)),
            KeyCode::Right => self.set_param(id, current + adjust_step(id, false)),
            KeyCode::PageDown => self.set_param(id, current - adjust_step(id, true)),
            KeyCode::PageUp => self.set_param(id, current + adjust_step(id, true)),
            KeyCode::Backspace => self.set_param(id, id.default_value()),
            _ => return false,
        }
        true
    }

    fn render(&mut self, frame: &mut Frame, state: &StateSnapshot) {
        let area = frame.area();
        let bg_block = Block::default().style(Style::default().bg(self.theme.bg));
        frame.render_widget(bg_block, area);

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Length(3), // Transport
                Constraint::Min(6),    // Main content
                Constraint::Length(3), // Footer
            ])
            .split(area);

        self.render_header(frame, chunks[0]);
        render_transport(frame, chunks[1], state, &self.theme);

        match self.view {
            View::Steps => {
                let main = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Length(7), Constraint::Min(3)])
                    .split(chunks[2]);
                render_steps(frame, main[0], state, self.last_notes, &self.theme);
                let current = state.playing.then_some(state.sequence_position);
                let wave = *self.controller.waveform_snapshot();
                render_waveform(frame, main[1], &wave, current, &self.theme);
            }
            View::Params => {
                render_params(frame, chunks[2], state, &self.param_editor, &self.theme);
            }
        }

        self.render_footer(frame, chunks[3]);
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let view_indicator = match self.view {
            View::Steps => "[STEPS]",
            View::Params => "[PARAMS]",
        };
        let title = format!(" AMENCHOP v{} {} ", env!("CARGO_PKG_VERSION"), view_indicator);
        let header = Paragraph::new(title)
            .style(
                Style::default()
                    .fg(self.theme.highlight)
                    .bg(self.theme.bg)
                    .bold(),
            )
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.border))
                    .style(Style::default().bg(self.theme.bg)),
            );
        frame.render_widget(header, area);
    }

    /// Render the footer with help or status message
    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let text = match (&self.host_entry, &self.status_message) {
            (Some(entry), _) => format!("OSC host: {}_  (Enter:Apply | Esc:Cancel)", entry),
            (None, Some((msg, instant))) if instant.elapsed().as_secs() < 3 => msg.clone(),
            _ => self.footer_help(),
        };

        let footer = Paragraph::new(text)
            .style(Style::default().fg(self.theme.dimmed).bg(self.theme.bg))
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.border))
                    .style(Style::default().bg(self.theme.bg)),
            );
        frame.render_widget(footer, area);
    }

    fn footer_help(&self) -> String {
        match self.view {
            View::Steps => format!(
                "0-f:Note | SPACE:Play/Stop | R/S/H:Seq/Soft/Hard reset | [/]:Delay | -/+:BPM | M:Clock | I:Input | O:Ctl | Shift-O:OSC host | N:Sample | C-s:Save | TAB:Params | Q:Quit | {}",
                self.theme.name
            ),
            View::Params => format!(
                "Up/Down:Select | Left/Right:Adjust | PgUp/PgDn:Coarse | BKSP:Default | C-s:Save | TAB:Steps | Q:Quit | {}",
                self.theme.name
            ),
        }
    }
}

use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::controller::StateSnapshot;
use crate::params::{ControlMode, InputSource, ParamId, TriggerMode};
use crate::sequencer::ClockMode;
use crate::ui::Theme;

/// Selection state for the parameter editor view
pub struct ParamEditorState {
    pub param_index: usize,
}

impl ParamEditorState {
    pub fn new() -> Self {
        Self { param_index: 0 }
    }

    pub fn current_param(&self) -> ParamId {
        ParamId::all()[self.param_index]
    }

    /// Move parameter selection up/down
    pub fn move_selection(&mut self, dy: i32) {
        let len = ParamId::all().len() as i32;
        self.param_index = ((self.param_index as i32 + dy).rem_euclid(len)) as usize;
    }
}

impl Default for ParamEditorState {
    fn default() -> Self {
        Self::new()
    }
}

/// Increment for one Left/Right press
pub fn adjust_step(id: ParamId, coarse: bool) -> f32 {
    let fine = match id {
        ParamId::PhaseAdjustMs => 5.0,
        ParamId::ManualBpm => 0.5,
        _ => 1.0,
    };
    if coarse {
        fine * 10.0
    } else {
        fine
    }
}

/// Display form of a parameter value
pub fn format_value(id: ParamId, value: f32) -> String {
    match id {
        ParamId::ControlMode => ControlMode::from_value(value).name().to_string(),
        ParamId::ClockMode => ClockMode::from_value(value).name().to_string(),
        ParamId::InputSource => InputSource::from_value(value).name().to_string(),
        ParamId::CcSeqResetMode | ParamId::CcHardResetMode | ParamId::CcSoftResetMode => {
            TriggerMode::from_value(value).name().to_string()
        }
        ParamId::MidiInputChannel if value < 1.0 => "Omni".to_string(),
        ParamId::ManualBpm => format!("{:.1}", value),
        ParamId::PhaseAdjustMs => format!("{:+.0} ms", value),
        ParamId::AdjustStepMs => format!("{:.0} ms", value),
        _ => format!("{:.0}", value),
    }
}

/// Render the parameter editor view
pub fn render_params(
    frame: &mut Frame,
    area: Rect,
    state: &StateSnapshot,
    editor: &ParamEditorState,
    theme: &Theme,
) {
    let block = Block::default()
        .title(Span::styled(" Parameters ", Style::default().fg(theme.label)))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(Style::default().bg(theme.bg));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    // Keep the selection visible in short terminals
    let visible = inner.height.max(1) as usize;
    let first = editor.param_index.saturating_sub(visible - 1);

    let mut lines = Vec::new();
    for (i, id) in ParamId::all().iter().enumerate().skip(first).take(visible) {
        let is_selected = i == editor.param_index;
        let value = state
            .params
            .get(id.key())
            .copied()
            .unwrap_or_else(|| id.default_value());
        let (min, max, _default) = id.range();
        let normalized = if max > min { (value - min) / (max - min) } else { 0.0 };

        let bar_width = 20;
        let filled = (normalized * bar_width as f32) as usize;
        let bar: String = (0..bar_width)
            .map(|i| if i < filled { '=' } else { '-' })
            .collect();

        let style = if is_selected {
            Style::default().fg(theme.highlight).bold()
        } else if id.is_transient() {
            Style::default().fg(theme.dimmed)
        } else {
            Style::default().fg(theme.fg)
        };
        let bar_style = if is_selected {
            Style::default().fg(theme.beat_lane)
        } else {
            Style::default().fg(theme.dimmed)
        };
        let cursor = if is_selected { ">" } else { " " };

        lines.push(Line::from(vec![
            Span::styled(cursor, style),
            Span::styled(format!("{:>20}", id.name()), style),
            Span::styled(" [", Style::default().fg(theme.border)),
            Span::styled(bar, bar_style),
            Span::styled("] ", Style::default().fg(theme.border)),
            Span::styled(format_value(*id, value), style),
        ]));
    }

    frame.render_widget(
        Paragraph::new(lines).style(Style::default().bg(theme.bg)),
        inner,
    );
}

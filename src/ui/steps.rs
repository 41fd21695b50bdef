use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::controller::StateSnapshot;
use crate::params::{ControlMode, InputSource, ParamId};
use crate::sequencer::STEPS;
use crate::ui::Theme;

/// Step the delayed read is pulling from while `current` sounds
fn delay_source(current: usize, delay: usize) -> usize {
    (current + STEPS - delay % STEPS) % STEPS
}

fn param(state: &StateSnapshot, id: ParamId) -> f32 {
    state.params.get(id.key()).copied().unwrap_or_else(|| id.default_value())
}

/// Render transport status bar
pub fn render_transport(frame: &mut Frame, area: Rect, state: &StateSnapshot, theme: &Theme) {
    let status = if state.playing { "PLAY" } else { "STOP" };
    let status_style = if state.playing {
        Style::default().fg(theme.beat_lane).bold()
    } else {
        Style::default().fg(theme.dimmed)
    };
    let sep = || Span::styled(" | ", Style::default().fg(theme.border));
    let text = |s: String| Span::styled(s, Style::default().fg(theme.fg));

    let control = ControlMode::from_value(param(state, ParamId::ControlMode));
    let source = InputSource::from_value(param(state, ParamId::InputSource));
    let sample = match (&state.sample, state.sample_pending) {
        (_, true) => "(loading)".to_string(),
        (Some(name), false) => name.clone(),
        (None, false) => "-".to_string(),
    };

    let spans = vec![
        Span::styled(format!(" {} ", status), status_style),
        sep(),
        text(format!("{:.1} BPM [{}]", state.bpm, state.clock_source)),
        sep(),
        text(format!("Delay: {:2}", param(state, ParamId::DelayTime) as u8)),
        sep(),
        text(format!("Adj: {:+.0}ms", param(state, ParamId::PhaseAdjustMs))),
        sep(),
        text(format!("Ctl: {}", control.name())),
        sep(),
        text(format!("In: {} {}", source.name(), sample)),
    ];

    let transport = Paragraph::new(Line::from(spans))
        .style(Style::default().bg(theme.bg))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(theme.border))
                .style(Style::default().bg(theme.bg)),
        );
    frame.render_widget(transport, area);
}

/// Render both lanes of the sixteen-step cycle
pub fn render_steps(
    frame: &mut Frame,
    area: Rect,
    state: &StateSnapshot,
    last_notes: Option<(u8, u8)>,
    theme: &Theme,
) {
    let block = Block::default()
        .title(Span::styled(" Steps ", Style::default().fg(theme.label)))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(Style::default().bg(theme.bg));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let label_width = 6u16;
    let cell_width = (inner.width.saturating_sub(label_width) / STEPS as u16).max(2);
    let beat = state.sequence_position;
    let note = state.note_sequence_position;
    let delay = param(state, ParamId::DelayTime) as usize;
    let source_step = delay_source(beat, delay);

    let rows: [(&str, usize, Color); 2] = [
        ("BEAT", beat, theme.beat_lane),
        ("NOTE", note, theme.note_lane),
    ];

    let mut lines = Vec::new();
    let mut header = vec![Span::raw(" ".repeat(label_width as usize))];
    for step in 0..STEPS {
        let style = if step % 4 == 0 {
            Style::default().fg(theme.label)
        } else {
            Style::default().fg(theme.dimmed)
        };
        header.push(Span::styled(
            format!("{:<w$}", format!("{:X}", step), w = cell_width as usize),
            style,
        ));
    }
    lines.push(Line::from(header));

    for (label, active, color) in rows {
        let mut spans = vec![Span::styled(
            format!("{:>5} ", label),
            Style::default().fg(theme.label),
        )];
        for step in 0..STEPS {
            let (symbol, style) = if state.playing && step == active {
                ("##", Style::default().fg(theme.bg).bg(color).bold())
            } else if step % 4 == 0 {
                (". ", Style::default().fg(theme.dimmed))
            } else {
                ("- ", Style::default().fg(theme.step_idle))
            };
            spans.push(Span::styled(
                format!("{:<w$}", symbol, w = cell_width as usize),
                style,
            ));
        }
        lines.push(Line::from(spans));
    }

    let mut delay_row = vec![Span::styled(
        format!("{:>5} ", "SRC"),
        Style::default().fg(theme.label),
    )];
    for step in 0..STEPS {
        let symbol = if state.playing && delay > 0 && step == source_step {
            "^^"
        } else {
            "  "
        };
        delay_row.push(Span::styled(
            format!("{:<w$}", symbol, w = cell_width as usize),
            Style::default().fg(theme.delay_marker),
        ));
    }
    lines.push(Line::from(delay_row));

    if let Some((note1, note2)) = last_notes {
        lines.push(Line::from(Span::styled(
            format!(" Last notes out: {} / {}", note1, note2),
            Style::default().fg(theme.dimmed),
        )));
    }

    frame.render_widget(
        Paragraph::new(lines).style(Style::default().bg(theme.bg)),
        inner,
    );
}

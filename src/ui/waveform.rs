use ratatui::prelude::*;
use ratatui::widgets::{Block, Borders, Paragraph};

use crate::audio::waveform::{Waveform, POINTS_PER_STEP};
use crate::sequencer::STEPS;
use crate::ui::Theme;

const BARS: [char; 9] = [' ', '▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Peak per column when each step gets `columns` columns
pub fn column_peaks(wave: &Waveform, columns: usize) -> Vec<f32> {
    let columns = columns.max(1);
    let mut out = Vec::with_capacity(STEPS * columns);
    for step in 0..STEPS {
        let points = &wave[step * POINTS_PER_STEP..(step + 1) * POINTS_PER_STEP];
        for c in 0..columns {
            let from = c * POINTS_PER_STEP / columns;
            let to = ((c + 1) * POINTS_PER_STEP / columns).max(from + 1);
            let peak = points[from..to.min(POINTS_PER_STEP)]
                .iter()
                .fold(0.0f32, |m, v| m.max(v.abs()));
            out.push(peak);
        }
    }
    out
}

/// Character for row `row` (0 = bottom) of a bar `height` rows tall
fn bar_char(level: f32, row: usize, height: usize) -> char {
    let eighths = (level.clamp(0.0, 1.0) * (height * 8) as f32).round() as usize;
    let filled = eighths.saturating_sub(row * 8).min(8);
    BARS[filled]
}

/// Render the per-step waveform strip
pub fn render_waveform(
    frame: &mut Frame,
    area: Rect,
    wave: &Waveform,
    current_step: Option<usize>,
    theme: &Theme,
) {
    let block = Block::default()
        .title(Span::styled(" Loop ", Style::default().fg(theme.label)))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(theme.border))
        .style(Style::default().bg(theme.bg));
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let label_width = 6usize;
    let columns = ((inner.width as usize).saturating_sub(label_width) / STEPS).max(1);
    let height = (inner.height as usize).max(1);
    let peaks = column_peaks(wave, columns);

    let mut lines = Vec::with_capacity(height);
    for line in 0..height {
        let row = height - 1 - line;
        let mut spans = vec![Span::raw(" ".repeat(label_width))];
        for (i, level) in peaks.iter().enumerate() {
            let step = i / columns;
            let color = if Some(step) == current_step {
                theme.wave_current
            } else {
                theme.wave
            };
            spans.push(Span::styled(
                bar_char(*level, row, height).to_string(),
                Style::default().fg(color),
            ));
        }
        lines.push(Line::from(spans));
    }

    frame.render_widget(
        Paragraph::new(lines).style(Style::default().bg(theme.bg)),
        inner,
    );
}

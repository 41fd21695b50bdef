use ratatui::style::Color;

/// Colors for the chopper monitor
#[derive(Debug, Clone)]
pub struct Theme {
    pub name: &'static str,
    pub bg: Color,
    pub fg: Color,
    /// Step that just fired in the beat lane
    pub beat_lane: Color,
    /// Step that just fired in the note lane
    pub note_lane: Color,
    pub step_idle: Color,
    pub label: Color,
    pub wave: Color,
    /// Waveform of the step being recorded or played
    pub wave_current: Color,
    pub delay_marker: Color,
    pub border: Color,
    pub highlight: Color,
    pub dimmed: Color,
}

const THEMES: &[(&str, fn() -> Theme)] = &[
    ("default", Theme::terminal),
    ("vinyl", Theme::vinyl),
    ("mono", Theme::mono),
];

impl Theme {
    /// Follows the terminal's own ANSI palette
    fn terminal() -> Self {
        Self {
            name: "default",
            bg: Color::Reset,
            fg: Color::Reset,
            beat_lane: Color::Green,
            note_lane: Color::Yellow,
            step_idle: Color::DarkGray,
            label: Color::Cyan,
            wave: Color::Blue,
            wave_current: Color::LightCyan,
            delay_marker: Color::Red,
            border: Color::White,
            highlight: Color::Magenta,
            dimmed: Color::DarkGray,
        }
    }

    /// Warm label colors on a dark sleeve
    fn vinyl() -> Self {
        Self {
            name: "vinyl",
            bg: Color::Rgb(24, 20, 18),
            fg: Color::Rgb(232, 220, 200),
            beat_lane: Color::Rgb(230, 90, 50),
            note_lane: Color::Rgb(240, 190, 80),
            step_idle: Color::Rgb(70, 60, 52),
            label: Color::Rgb(200, 170, 130),
            wave: Color::Rgb(150, 120, 90),
            wave_current: Color::Rgb(240, 190, 80),
            delay_marker: Color::Rgb(120, 190, 170),
            border: Color::Rgb(110, 92, 76),
            highlight: Color::Rgb(230, 90, 50),
            dimmed: Color::Rgb(90, 78, 68),
        }
    }

    /// Greys only, for terminals with poor color support
    fn mono() -> Self {
        Self {
            name: "mono",
            bg: Color::Black,
            fg: Color::Gray,
            beat_lane: Color::White,
            note_lane: Color::Gray,
            step_idle: Color::DarkGray,
            label: Color::White,
            wave: Color::Gray,
            wave_current: Color::White,
            delay_marker: Color::White,
            border: Color::Gray,
            highlight: Color::White,
            dimmed: Color::DarkGray,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        THEMES
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, build)| build())
    }

    pub fn available_themes() -> impl Iterator<Item = &'static str> {
        THEMES.iter().map(|(key, _)| *key)
    }
}

impl Default for Theme {
    fn default() -> Self {
        Self::terminal()
    }
}

pub mod params;
pub mod steps;
pub mod theme;
pub mod waveform;

pub use params::{adjust_step, render_params, ParamEditorState};
pub use steps::{render_steps, render_transport};
pub use theme::Theme;
pub use waveform::render_waveform;

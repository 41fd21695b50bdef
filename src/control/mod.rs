pub mod feedback;
pub mod reconciler;

pub use feedback::{ControlEvent, FeedbackQueue, UiNoteSlot};
pub use reconciler::{ControlConfig, Reconciler};

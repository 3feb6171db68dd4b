//! Presentation helpers shared by every front end.

mod controller;
mod format;
mod gates;

pub use controller::{FinishConfirmation, Panel, SessionController};
pub use format::format_hms;
pub use gates::ControlGates;

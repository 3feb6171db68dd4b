use serde::Serialize;

use crate::timer::{TimerState, TimerView};

/// Which controls are enabled for a given view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ControlGates {
    pub start: bool,
    pub pause: bool,
    pub reset: bool,
    pub finish: bool,
}

impl ControlGates {
    pub const LOCKED: Self = Self {
        start: false,
        pause: false,
        reset: false,
        finish: false,
    };

    pub fn for_view(view: &TimerView) -> Self {
        if view.finishing || view.session.is_none() {
            return Self::LOCKED;
        }
        match view.state {
            TimerState::Idle | TimerState::Finished => Self::LOCKED,
            TimerState::Stopped => Self {
                start: true,
                pause: false,
                reset: true,
                finish: true,
            },
            TimerState::Running => Self {
                start: false,
                pause: true,
                reset: true,
                finish: true,
            },
        }
    }
}

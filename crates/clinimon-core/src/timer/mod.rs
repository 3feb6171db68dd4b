mod engine;
mod reconcile;

pub use engine::{FinishRequest, TimerEngine, TimerState, TimerView};
pub use reconcile::{reconcile, Reconciled};

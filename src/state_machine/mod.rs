mod stage;
mod state;

pub use stage::{StageRole, StageState};
pub use state::{Phase, Signal, StageMachine, Transition};

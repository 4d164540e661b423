//! Processing session: state machine, cooldown and async controller.

mod controller;
mod machine;
mod state;

pub use controller::{RecolorController, RecolorControllerBuilder};
pub use machine::DEFAULT_COOLDOWN;
pub use state::{Failure, ProcessingState, Snapshot};

//! Running a search: options, the controller state machine and its builder.

pub mod builder;
pub mod controller;
pub mod options;
pub mod state;

pub use builder::ControllerBuilder;
pub use controller::{MethodController, SeedSource};
pub use options::{LogLevel, RunConfig, RunOptions};
pub use state::{ControllerState, RunReport, RunState, StopHandle};

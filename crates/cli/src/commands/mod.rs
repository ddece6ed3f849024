//! CLI commands for the options strategy engine.

pub mod engine;
pub mod execute;
pub mod expiry;
pub mod run;
pub mod strikes;

pub use execute::{run_execute, ExecuteArgs};
pub use expiry::{run_expiry, ExpiryArgs};
pub use run::{run_dispatcher, RunArgs};
pub use strikes::{run_strikes, StrikesArgs};

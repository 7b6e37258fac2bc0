//! Data structures shared between the engine, the store and the CLI.

pub mod project;
pub mod recommendation;
pub mod report;
pub mod snapshot;
pub mod time;

//! The _tally_ library crate.
//!
//! Tally keeps a time series of IAM binding counts for cloud projects: one
//! snapshot per project per calendar day, compacted from access-policy
//! change events, next to the recommendation acceptances that explain the
//! changes. The [`server`] module holds the engine, [`store`] the
//! persistence backends, [`sources`] the collaborator traits evidence is
//! pulled through, and [`cli`] the `tally` binary's commands.

pub mod api;
pub mod cli;
pub mod commons;
pub mod config;
pub mod constants;
pub mod server;
pub mod sources;
pub mod store;

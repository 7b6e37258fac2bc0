//! The reconciliation engine: one update run from discovery to persisted
//! per-day series, plus the retention pass that trims aged-out records.

pub mod compactor;
pub mod reconciler;
pub mod retention;
pub mod updater;

//! Service layer orchestrating the fetch-and-reconcile cycle.

pub mod update;

pub use update::{CycleOptions, CycleStats, UpdateError, UpdateService};

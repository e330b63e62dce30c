//! Execution state shared by every operator of a single query execution.

pub mod cancel;
pub mod context;
pub mod scheduler;

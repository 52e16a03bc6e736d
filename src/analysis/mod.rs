//! Statistical side of the pipeline.
//!
//! Control-day aggregates are reduced into a per-key baseline (mean and a
//! confidence interval around it), and the event day is scored against that
//! baseline.

pub mod baseline;
pub mod impact;
pub mod utility;

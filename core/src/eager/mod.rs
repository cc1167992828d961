//! Eager loading of detail collections.
//!
//! A detail collection nested inside a projection is loaded by one extra
//! statement for all parents instead of one statement per parent row.

mod context;
mod planner;

pub use context::EagerLoadingContext;
pub use planner::{DetailPlan, KeyInfo, Truncation, plan_detail, truncate};
pub(crate) use planner::placeholder;

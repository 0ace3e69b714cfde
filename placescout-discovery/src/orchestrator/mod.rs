//! Search orchestrator: budgeted fan-out, identity resolution, filtering, ranking.
//!
//! This module dispatches a query to every eligible provider concurrently,
//! merges their hits into canonical venues, applies the chain and
//! neighbourhood filters, ranks by corroboration and distance, and keeps the
//! result cache current, including after the client deadline.

mod continuation;
pub mod dedup;
pub mod filters;
pub mod name_normalize;
pub mod scoring;
pub mod search;

pub use search::Discovery;

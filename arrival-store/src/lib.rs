//! Shared dedup state: the last-seen table plus the window epoch and
//! unique counter, owned by a single controller handed to the ingest
//! path, the sweeper, and the flush scheduler.

mod controller;
mod store;

pub use controller::{ArrivalController, WindowFlush};
pub use store::{DedupKey, DedupStore};

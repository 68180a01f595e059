//! Background population of the index around viewers.
//!
//! The host calls [`HorizonSeeder::tick`] once per host tick. Each tick
//! collects finished embeddings, discovers empty tiles near viewers,
//! classifies and submits a throttled number of them, and every
//! `adjust_every_ticks` ticks lets the [`ThroughputController`] retune the
//! per-tick rate from host load.

pub mod control;
pub mod host;
pub mod queue;
pub mod seeder;

pub use control::{fill_headroom, latency_headroom, ThroughputController};
pub use host::{HostLoad, HostWorld, ViewerLocation};
pub use queue::{WorkItem, WorkQueue};
pub use seeder::{HorizonSeeder, SeederStatus, TickReport};

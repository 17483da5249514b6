pub mod annotate;
pub mod attendance;
pub mod face;
pub mod job_store;
pub mod matcher;
pub mod sweeper;
pub mod worker;

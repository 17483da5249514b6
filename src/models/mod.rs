pub mod attendance;
pub mod job;
pub mod recognition;

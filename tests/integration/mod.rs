//! Integration tests against a fully wired offline manager

pub mod optimistic_test;
pub mod queue_drain_test;
pub mod realtime_test;
pub mod restart_test;
pub mod view_test;

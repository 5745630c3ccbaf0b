//! Property-based tests

pub mod reconcile_proptest;
pub mod retry_proptest;
pub mod rollback_proptest;

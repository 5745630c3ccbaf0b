//! Common test utilities and helpers
//!
//! This module provides shared utilities for all tests including:
//! - Entity fixtures
//! - A scripted remote executor
//! - A fully wired offline manager harness

pub mod fixtures;
pub mod harness;

// Re-export commonly used utilities
pub use fixtures::*;
pub use harness::*;
pub use mock_executor::*;

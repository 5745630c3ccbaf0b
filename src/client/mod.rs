//! Backend clients
//!
//! - `http_executor.rs`: runs queued actions against a PostgREST-style REST
//!   API and probes its reachability

pub mod http_executor;

pub use http_executor::{HttpExecutor, HttpProbe};

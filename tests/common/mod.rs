//! Common test utilities for cloud-transfer integration tests

#[allow(dead_code)]
pub mod gateway;

pub use gateway::*;

//! Common test utilities for the redemption integration tests.

#![allow(dead_code)]

pub mod fixtures;
pub mod mock_services;

pub use fixtures::*;
pub use mock_services::*;

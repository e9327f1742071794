//! Shared test utilities for orderflow integration tests.
//!
//! This module provides:
//! - `TestHarness` with a temporary data directory and workflow templates
//! - Fake collaborators that record what the pipeline asked of them
//! - Builders for upload blocks and scripts

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;

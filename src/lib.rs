//! golook library
//!
//! Resolves short aliases (golinks, authorized SSH keys) from a local cache
//! that is refreshed by a detached background worker. Exposed as a library for
//! the binary and for integration tests.

pub mod app;
pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod data;
pub mod download;
pub mod feedback;
pub mod icons;
pub mod jobs;
pub mod refresh;

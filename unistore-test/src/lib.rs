//! Test utilities for unistore.
//!
//! This crate provides in-process fake servers for the HTTP APIs unistore talks to, along with
//! logging setup for tests. See the modules for all available utilities.

pub mod casdoor;
pub mod dsm;
pub mod gcs;
pub mod s3;
pub mod server;
pub mod tracing;

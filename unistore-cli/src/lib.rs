//! Command line access to the storage providers supported by [`unistore_service`].
//!
//! The `unistore` binary loads a [`config::Config`], connects to the configured provider and runs
//! a single operation against it.
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod cli;
pub mod commands;
pub mod config;
pub mod observability;

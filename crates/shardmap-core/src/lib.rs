//! Core types and utilities for shardmap.
//!
//! This crate provides the pieces shared by shardmap tools:
//! - Configuration management (cluster description and logging)
//! - Error types

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;

pub use config::{ClusterConfig, Config, HostConfig, LogFormat, LoggingConfig, DEFAULT_PLACEMENT_GROUP};
pub use error::{Error, Result};

//! # wgnet-common
//!
//! Shared types for the wgnet network driver.
//!
//! This crate provides functionality used by both the network engine and
//! the plugin daemon:
//! - Network, endpoint and MAC address identifiers
//! - Standard filesystem paths
//! - Common error types

#![warn(missing_docs)]

pub mod error;
pub mod id;
pub mod paths;

pub use error::{WgNetError, WgNetResult};
pub use id::{EndpointId, MacAddress, NetworkId};
pub use paths::WgNetPaths;

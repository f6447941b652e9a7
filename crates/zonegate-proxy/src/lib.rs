//! Kong admin API adapter.
//!
//! The control plane publishes one `domain-policy` plugin instance per
//! cluster through the Kong admin API. This crate owns the wire types for
//! that plugin and the transport used to create, update, and remove it.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod client;
pub mod error;
pub mod plugin;

pub use client::{HttpProxyAdapter, ProxyAdapter};
pub use error::{ProxyError, Result};
pub use plugin::{domain_policy_plugin_id, DomainPolicyConfig};

#[cfg(any(test, feature = "test-utils"))]
pub use client::mock;

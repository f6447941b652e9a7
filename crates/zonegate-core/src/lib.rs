//! Core types and utilities for zonegate.
//!
//! This crate provides the foundational types used throughout the zonegate
//! control plane:
//!
//! - **Identifiers**: Strongly-typed IDs for zones, packages, package APIs,
//!   and target clusters
//! - **Regions**: The tags marking which ingress-config subsystem a policy
//!   fragment targets (zone-scoped annotations vs. cluster-scoped controller
//!   configuration)
//!
//! # Example
//!
//! ```
//! use zonegate_core::{ClusterKey, Region, ZoneId};
//!
//! let zone_id = ZoneId::new("pkg-orders-api-list").unwrap();
//! let cluster = ClusterKey::new("prod-east").unwrap();
//!
//! assert!(Region::Annotation.is_zone_scoped());
//! assert!(!Region::HttpSnippet.is_zone_scoped());
//! # let _ = (zone_id, cluster);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;
pub mod region;

pub use ids::{ClusterKey, IdError, PackageApiId, PackageId, ZoneId};
pub use region::{global_regions, zone_regions, Region, RegionSet};

//! Control-plane engine for zonegate.
//!
//! This crate coordinates the whole apply pipeline: per-cluster locking,
//! deterministic aggregation of policy fragments, ordered deployment to the
//! mesh and the proxy, routing-priority publication, and rollback with
//! reconciliation when any step fails.
//!
//! The entry point is [`PolicyService`], generic over the [`Store`] so
//! tests run against the same code paths as production.
//!
//! [`Store`]: zonegate_store::Store

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod aggregate;
pub mod applier;
pub mod cluster_lock;
pub mod domain_policy;
pub mod error;
pub mod rollback;
pub mod types;

pub use aggregate::{IngressChangeAggregator, IngressChanges, SNIPPET_DELIMITER};
pub use applier::PolicyService;
pub use cluster_lock::ClusterLocks;
pub use domain_policy::{routing_score, DomainPolicyEntry, DomainPolicyPublisher};
pub use error::{ControlError, Result};
pub use rollback::RollbackCoordinator;
pub use types::{ApplyResult, ApplyStage};

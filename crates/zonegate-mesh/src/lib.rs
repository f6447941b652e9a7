//! Kubernetes mesh adapter.
//!
//! Deploys aggregated ingress state to the service mesh: per-zone ingress
//! annotations, the ingress controller configmap, and the ingress objects
//! themselves.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod k8s;
pub mod types;

pub use error::{MeshError, Result};
pub use k8s::{KubeMeshRouter, MeshRouter};
pub use types::{ControllerState, IngressSpec, ZoneAnnotationState};

#[cfg(any(test, feature = "test-utils"))]
pub use k8s::mock;

//! Policy engine capability interface for zonegate.
//!
//! Every traffic-policy category (CORS, the built-in baseline, and any
//! future category) is implemented as a [`PolicyEngine`]: a typed config
//! behind one common capability trait, selected by category string through
//! the [`PolicyRegistry`] at a single registration point.
//!
//! Engines are pure: they validate raw operator input, translate it into
//! deployable ingress/proxy fragments ([`PolicyConfig`]), and report which
//! proxy-side plugins the policy enables or disables. Pushing those
//! fragments to infrastructure is the applier's job, not the engine's.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod builtin;
pub mod cors;
pub mod engine;
pub mod error;
pub mod registry;

pub use builtin::BuiltinPolicy;
pub use cors::CorsPolicy;
pub use engine::{
    AnnotationFragment, ControllerFragment, KongPluginSet, ParseContext, PolicyConfig,
    PolicyEngine,
};
pub use error::{PolicyError, Result};
pub use registry::PolicyRegistry;

/// The category name of the baseline policy that is re-applied after every
/// other category.
pub const BUILTIN_CATEGORY: &str = "built-in";

//! converge - declarative resource reconciliation
//!
//! A generic engine that drives resource kinds through plan, diff, apply,
//! read-back and drift detection. Each kind supplies a schema and a few
//! adapter functions; everything else lives here.

// Core modules
pub mod context;
pub mod error;
pub mod schema;
pub mod types;

// Engine modules
pub mod client;
pub mod diff;
pub mod lifecycle;
pub mod provider;
pub mod resource;
pub mod state;

// Helper modules
pub mod defaults;
pub mod plan_modifier;
pub mod validator;

// Re-exports for convenience
pub use client::{ControlPlane, DrainReport, RemoteResult};
pub use context::Context;
pub use diff::{compute_change_set, AttributeChange, ChangeSet, PlannedAction};
pub use error::{ConflictReason, ConvergeError, Operation, RemoteError, Result};
pub use lifecycle::{Executor, LifecycleState, ReadOutcome};
pub use provider::Provider;
pub use resource::{ManagedResource, UpdateRequest};
pub use schema::{AttributeBuilder, AttributeType, Schema, SchemaBuilder};
pub use state::{LocalStateStore, MemoryStateStore, ResourceState, StateCodec, StateStore};
pub use types::{AttributePath, Diagnostics, Dynamic, DynamicValue};

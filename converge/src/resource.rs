//! Resource adapter trait
//!
//! A resource kind is reduced to a schema plus a handful of pure functions
//! translating between planned state and the control plane's payloads. The
//! lifecycle executor does everything else.

use crate::diff::ChangeSet;
use crate::error::Result;
use crate::schema::Schema;
use crate::types::{Diagnostics, DynamicValue};
use serde_json::Value;

/// What an update asks of the control plane
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateRequest {
    /// Send these changes with one update call
    Remote(Value),
    /// Only locally held attributes changed; no remote call is made
    StateOnly,
}

pub trait ManagedResource: Send + Sync {
    /// Type name should be constant (e.g., "aws_s3_directory_bucket")
    /// MUST match the key the provider registers the resource under
    fn type_name(&self) -> &str;

    /// Collection name the control plane knows this kind by
    fn kind(&self) -> &str;

    fn schema(&self) -> Schema;

    /// Identity an object created from `config` will have, for kinds whose
    /// identity is chosen by the user rather than the control plane
    fn configured_identity(&self, _config: &DynamicValue) -> Option<String> {
        None
    }

    /// Cross-attribute checks the schema cannot express
    fn validate(&self, _config: &DynamicValue) -> Diagnostics {
        Diagnostics::new()
    }

    /// Builds the create request from a fully planned state
    fn expand_create(&self, planned: &DynamicValue) -> Result<Value>;

    fn expand_update(&self, prior: &DynamicValue, change_set: &ChangeSet)
        -> Result<UpdateRequest>;

    /// Builds state from what the control plane returned
    ///
    /// `known` is the planned state after create or update, the prior state
    /// on refresh, and None on import. Attributes the remote side never
    /// returns (local flags, write-only secrets) are carried over from it.
    fn flatten(
        &self,
        identity: &str,
        remote: &Value,
        known: Option<&DynamicValue>,
    ) -> Result<DynamicValue>;

    /// Whether a delete refused as "not empty" may drain the object and retry
    fn force_destroy(&self, _state: &DynamicValue) -> bool {
        false
    }
}

use crate::client::ControlPlane;
use crate::context::Context;
use crate::error::{ConvergeError, Result};
use crate::lifecycle::Executor;
use crate::resource::ManagedResource;
use crate::schema::Schema;
use crate::types::{Config, Diagnostics};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A provider registers resource kinds and hands out a configured client
///
/// Configuration is explicit: nothing is usable until `configure` succeeds,
/// and the resulting client is passed to every executor rather than kept in
/// global state.
#[async_trait]
pub trait Provider: Send + Sync {
    fn type_name(&self) -> &str;

    /// Schema of the provider's own configuration block
    fn schema(&self) -> Schema;

    /// Errors go into the returned diagnostics; the provider stays unconfigured
    async fn configure(&mut self, ctx: &Context, config: Config) -> Diagnostics;

    fn resource_types(&self) -> Vec<String>;

    /// MUST fail with a clear error until the provider is configured
    fn resource(&self, type_name: &str) -> Result<Arc<dyn ManagedResource>>;

    fn client(&self) -> Result<Arc<dyn ControlPlane>>;

    /// Schemas for every registered resource, keyed by type name
    fn resource_schemas(&self) -> BTreeMap<String, Schema>;

    fn executor(&self, type_name: &str) -> Result<Executor> {
        Executor::new(self.resource(type_name)?, self.client()?)
    }
}

/// Error for a resource type the provider does not register
pub fn unknown_resource(provider: &str, type_name: &str) -> ConvergeError {
    ConvergeError::Custom(format!(
        "provider {} has no resource type {}",
        provider, type_name
    ))
}

//! Remote control plane capability consumed by the lifecycle executor
//!
//! The engine never assumes a wire protocol. Implementations translate these
//! calls into whatever the remote side speaks and classify failures into
//! [`RemoteError`]. Retrying transient transport failures is the
//! implementation's job; the engine never retries on its own.

use crate::context::Context;
use crate::error::RemoteError;
use async_trait::async_trait;
use serde_json::Value;

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// What a drain removed from a container-like object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub removed: usize,
}

#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Creates an object of `kind` and returns the identity the remote side assigned
    async fn create(&self, ctx: &Context, kind: &str, spec: Value) -> RemoteResult<String>;

    async fn read(&self, ctx: &Context, kind: &str, identity: &str) -> RemoteResult<Value>;

    async fn update(
        &self,
        ctx: &Context,
        kind: &str,
        identity: &str,
        changes: Value,
    ) -> RemoteResult<()>;

    async fn delete(&self, ctx: &Context, kind: &str, identity: &str) -> RemoteResult<()>;

    /// Removes everything contained in a container-like object
    async fn drain(&self, _ctx: &Context, kind: &str, _identity: &str) -> RemoteResult<DrainReport> {
        Err(RemoteError::Fatal(format!(
            "{} objects cannot be emptied",
            kind
        )))
    }
}

//! Lifecycle executor
//!
//! Drives one managed object through create, read, update, delete and import
//! using the resource's adapter functions and a control plane client. The
//! executor owns the object's state for the duration of every operation.

use crate::client::{ControlPlane, RemoteResult};
use crate::context::{Context, Interrupted};
use crate::diff::{plan_validated, validate_config, ChangeSet, PlannedAction};
use crate::error::{ConvergeError, Operation, RemoteError, Result};
use crate::resource::{ManagedResource, UpdateRequest};
use crate::schema::Schema;
use crate::state::ResourceState;
use crate::types::{Dynamic, DynamicValue};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Absent,
    Creating,
    Present,
    Updating,
    Deleting,
    /// The last operation failed; any last known state is kept
    Error,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Absent => "absent",
            LifecycleState::Creating => "being created",
            LifecycleState::Present => "present",
            LifecycleState::Updating => "being updated",
            LifecycleState::Deleting => "being deleted",
            LifecycleState::Error => "in error",
        };
        f.write_str(name)
    }
}

/// Result of refreshing state from the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    Refreshed,
    /// The remote object is gone and its state was dropped
    Removed,
}

pub struct Executor {
    resource: Arc<dyn ManagedResource>,
    client: Arc<dyn ControlPlane>,
    schema: Schema,
    state: Option<ResourceState>,
    status: LifecycleState,
    operation_timeout: Option<Duration>,
}

impl Executor {
    /// Checks the resource schema once, up front
    pub fn new(resource: Arc<dyn ManagedResource>, client: Arc<dyn ControlPlane>) -> Result<Self> {
        let schema = resource.schema();
        schema.validate_definition()?;

        Ok(Self {
            resource,
            client,
            schema,
            state: None,
            status: LifecycleState::Absent,
            operation_timeout: None,
        })
    }

    /// Starts from previously persisted state
    pub fn with_state(mut self, state: Option<ResourceState>) -> Self {
        self.status = if state.is_some() {
            LifecycleState::Present
        } else {
            LifecycleState::Absent
        };
        self.state = state;
        self
    }

    /// Bounds every operation, on top of any deadline the caller's context has
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn state(&self) -> Option<&ResourceState> {
        self.state.as_ref()
    }

    pub fn into_state(self) -> Option<ResourceState> {
        self.state
    }

    pub fn status(&self) -> LifecycleState {
        self.status
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    fn type_name(&self) -> &str {
        self.resource.type_name()
    }

    fn identity(&self) -> String {
        self.state
            .as_ref()
            .map(|s| s.identity.clone())
            .unwrap_or_else(|| "new".to_string())
    }

    fn scoped(&self, ctx: &Context) -> Context {
        match self.operation_timeout {
            Some(timeout) => ctx.with_timeout(timeout),
            None => ctx.clone(),
        }
    }

    /// Status to fall back to when an operation stops without failing
    fn settled(&self) -> LifecycleState {
        if self.state.is_some() {
            LifecycleState::Present
        } else {
            LifecycleState::Absent
        }
    }

    fn begin(&mut self, operation: Operation, needs_state: bool, next: LifecycleState) -> Result<()> {
        let busy = matches!(
            self.status,
            LifecycleState::Creating | LifecycleState::Updating | LifecycleState::Deleting
        );
        if busy || self.state.is_some() != needs_state {
            return Err(ConvergeError::InvalidTransition {
                resource_type: self.type_name().to_string(),
                operation,
                state: self.status.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    fn interrupted(
        &self,
        why: Interrupted,
        operation: Operation,
        identity: &str,
        completed: &[String],
    ) -> ConvergeError {
        let resource_type = self.type_name().to_string();
        let identity = identity.to_string();
        let completed = completed.to_vec();
        match why {
            Interrupted::Cancelled => ConvergeError::Cancelled {
                operation,
                resource_type,
                identity,
                completed,
            },
            Interrupted::TimedOut => ConvergeError::Timeout {
                operation,
                resource_type,
                identity,
                completed,
            },
        }
    }

    fn remote_error(&self, operation: Operation, identity: &str, source: RemoteError) -> ConvergeError {
        ConvergeError::Remote {
            operation,
            resource_type: self.type_name().to_string(),
            identity: identity.to_string(),
            source,
        }
    }

    /// Runs one remote call under the context; the outer error is an interruption
    async fn bounded<T>(
        &self,
        ctx: &Context,
        operation: Operation,
        identity: &str,
        completed: &[String],
        call: impl Future<Output = RemoteResult<T>>,
    ) -> Result<RemoteResult<T>> {
        ctx.run(call)
            .await
            .map_err(|why| self.interrupted(why, operation, identity, completed))
    }

    /// Records the outcome of a failed operation and passes the error on
    fn fail<T>(&mut self, err: ConvergeError) -> Result<T> {
        self.status = match err {
            ConvergeError::Cancelled { .. } | ConvergeError::Timeout { .. } => self.settled(),
            _ => LifecycleState::Error,
        };
        Err(err)
    }

    /// Validates `desired` and plans it against the current state
    pub fn plan(&self, desired: &DynamicValue) -> Result<ChangeSet> {
        let mut diags = validate_config(desired, self.state.as_ref(), &self.schema);
        diags.extend(self.resource.validate(desired));
        diags.into_result()?;
        plan_validated(desired, self.state.as_ref(), &self.schema)
    }

    /// Plans and creates a new object, then reads it back
    pub async fn create(&mut self, ctx: &Context, desired: &DynamicValue) -> Result<&ResourceState> {
        if self.state.is_some() {
            return Err(ConvergeError::InvalidTransition {
                resource_type: self.type_name().to_string(),
                operation: Operation::Create,
                state: self.status.to_string(),
            });
        }
        let change_set = self.plan(desired)?;
        self.apply_create(ctx, &change_set).await?;
        self.state
            .as_ref()
            .ok_or_else(|| ConvergeError::State("create finished without state".to_string()))
    }

    async fn apply_create(&mut self, ctx: &Context, change_set: &ChangeSet) -> Result<()> {
        self.begin(Operation::Create, false, LifecycleState::Creating)?;
        let ctx = self.scoped(ctx);

        let identity = match self.send_create(&ctx, change_set).await {
            Ok(identity) => identity,
            Err(e) => return self.fail(e),
        };

        match self.read_back_created(&ctx, change_set, &identity).await {
            Ok(state) => {
                info!(
                    resource_type = %state.resource_type,
                    identity = %state.identity,
                    "created"
                );
                self.state = Some(state);
                self.status = LifecycleState::Present;
                Ok(())
            }
            Err(e) => {
                // The object exists remotely; keep it managed with what was planned
                warn!(
                    resource_type = %self.type_name(),
                    %identity,
                    error = %e,
                    "created but could not read back, recording planned state"
                );
                let planned = DynamicValue::new(unknowns_to_null(&change_set.planned_state.value));
                match ResourceState::new(self.type_name(), identity.as_str(), self.schema.version, planned) {
                    Ok(state) => self.state = Some(state),
                    Err(inner) => warn!(%identity, error = %inner, "could not record planned state"),
                }
                self.fail(e)
            }
        }
    }

    async fn send_create(&self, ctx: &Context, change_set: &ChangeSet) -> Result<String> {
        let kind = self.resource.kind();
        let body = self.resource.expand_create(&change_set.planned_state)?;
        debug!(resource_type = %self.type_name(), kind, "sending create request");

        self.bounded(ctx, Operation::Create, "new", &[], self.client.create(ctx, kind, body))
            .await?
            .map_err(|e| self.remote_error(Operation::Create, "new", e))
    }

    async fn read_back_created(
        &self,
        ctx: &Context,
        change_set: &ChangeSet,
        identity: &str,
    ) -> Result<ResourceState> {
        let kind = self.resource.kind();
        let completed = vec![format!("created {}", identity)];
        let remote = self
            .bounded(
                ctx,
                Operation::Read,
                identity,
                &completed,
                self.client.read(ctx, kind, identity),
            )
            .await?
            .map_err(|e| self.remote_error(Operation::Read, identity, e))?;

        let attributes =
            self.resource
                .flatten(identity, &remote, Some(&change_set.planned_state))?;
        ResourceState::new(self.type_name(), identity, self.schema.version, attributes)
    }

    /// Refreshes state from the control plane
    pub async fn read(&mut self, ctx: &Context) -> Result<ReadOutcome> {
        let Some(prior) = self.state.clone() else {
            return Err(ConvergeError::InvalidTransition {
                resource_type: self.type_name().to_string(),
                operation: Operation::Read,
                state: self.status.to_string(),
            });
        };
        let ctx = self.scoped(ctx);
        let kind = self.resource.kind();

        let outcome = match self
            .bounded(
                &ctx,
                Operation::Read,
                &prior.identity,
                &[],
                self.client.read(&ctx, kind, &prior.identity),
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return self.fail(e),
        };

        match outcome {
            Ok(remote) => {
                let refreshed = self
                    .resource
                    .flatten(&prior.identity, &remote, Some(&prior.attributes))
                    .and_then(|attributes| {
                        ResourceState::new(
                            self.type_name(),
                            prior.identity.clone(),
                            self.schema.version,
                            attributes,
                        )
                    });
                match refreshed {
                    Ok(state) => {
                        if state.attributes != prior.attributes {
                            info!(
                                resource_type = %self.type_name(),
                                identity = %prior.identity,
                                "drift detected"
                            );
                        }
                        self.state = Some(state);
                        self.status = LifecycleState::Present;
                        Ok(ReadOutcome::Refreshed)
                    }
                    Err(e) => self.fail(e),
                }
            }
            Err(RemoteError::NotFound(_)) => {
                warn!(
                    resource_type = %self.type_name(),
                    identity = %prior.identity,
                    "object not found, removing from state"
                );
                self.state = None;
                self.status = LifecycleState::Absent;
                Ok(ReadOutcome::Removed)
            }
            Err(e) => {
                let err = self.remote_error(Operation::Read, &prior.identity, e);
                self.fail(err)
            }
        }
    }

    /// Applies an in-place change set computed against the current state
    pub async fn update(&mut self, ctx: &Context, change_set: &ChangeSet) -> Result<()> {
        let Some(prior) = self.state.clone() else {
            return Err(ConvergeError::StaleChangeSet {
                planned: change_set.prior_identity.clone(),
                actual: None,
            });
        };
        if change_set.prior_identity.as_deref() != Some(prior.identity.as_str()) {
            return Err(ConvergeError::StaleChangeSet {
                planned: change_set.prior_identity.clone(),
                actual: Some(prior.identity),
            });
        }
        if change_set.requires_replacement {
            return Err(ConvergeError::ReplacementRequired {
                resource_type: self.type_name().to_string(),
                identity: prior.identity,
                attributes: change_set
                    .replace_paths
                    .iter()
                    .map(ToString::to_string)
                    .collect(),
            });
        }
        if change_set.is_noop() {
            debug!(resource_type = %self.type_name(), identity = %prior.identity, "no changes");
            return Ok(());
        }

        self.begin(Operation::Update, true, LifecycleState::Updating)?;
        let ctx = self.scoped(ctx);

        match self.update_and_read_back(&ctx, &prior, change_set).await {
            Ok(state) => {
                info!(
                    resource_type = %state.resource_type,
                    identity = %state.identity,
                    "updated"
                );
                self.state = Some(state);
                self.status = LifecycleState::Present;
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    async fn update_and_read_back(
        &self,
        ctx: &Context,
        prior: &ResourceState,
        change_set: &ChangeSet,
    ) -> Result<ResourceState> {
        let kind = self.resource.kind();
        let identity = prior.identity.as_str();

        let attributes = match self.resource.expand_update(&prior.attributes, change_set)? {
            UpdateRequest::StateOnly => {
                debug!(resource_type = %self.type_name(), identity, "state-only update");
                DynamicValue::new(settle_unknowns(
                    &change_set.planned_state.value,
                    &prior.attributes.value,
                ))
            }
            UpdateRequest::Remote(changes) => {
                debug!(resource_type = %self.type_name(), identity, "sending update request");
                self.bounded(
                    ctx,
                    Operation::Update,
                    identity,
                    &[],
                    self.client.update(ctx, kind, identity, changes),
                )
                .await?
                .map_err(|e| self.remote_error(Operation::Update, identity, e))?;

                let completed = vec!["update".to_string()];
                let remote = self
                    .bounded(
                        ctx,
                        Operation::Read,
                        identity,
                        &completed,
                        self.client.read(ctx, kind, identity),
                    )
                    .await?
                    .map_err(|e| self.remote_error(Operation::Read, identity, e))?;
                self.resource
                    .flatten(identity, &remote, Some(&change_set.planned_state))?
            }
        };

        ResourceState::new(self.type_name(), identity, self.schema.version, attributes)
    }

    /// Deletes the object; one that is already gone counts as deleted
    pub async fn delete(&mut self, ctx: &Context) -> Result<()> {
        self.begin(Operation::Delete, true, LifecycleState::Deleting)?;
        let ctx = self.scoped(ctx);

        match self.delete_remote(&ctx).await {
            Ok(()) => {
                info!(
                    resource_type = %self.type_name(),
                    identity = %self.identity(),
                    "deleted"
                );
                self.state = None;
                self.status = LifecycleState::Absent;
                Ok(())
            }
            Err(e) => self.fail(e),
        }
    }

    async fn delete_remote(&self, ctx: &Context) -> Result<()> {
        let kind = self.resource.kind();
        let identity = self.identity();
        let mut completed = Vec::new();

        let first = self
            .bounded(
                ctx,
                Operation::Delete,
                &identity,
                &completed,
                self.client.delete(ctx, kind, &identity),
            )
            .await?;

        let err = match first {
            Ok(()) => return Ok(()),
            Err(RemoteError::NotFound(_)) => {
                debug!(resource_type = %self.type_name(), %identity, "already gone");
                return Ok(());
            }
            Err(e) => e,
        };

        let force = self
            .state
            .as_ref()
            .is_some_and(|s| self.resource.force_destroy(&s.attributes));
        if !err.is_not_empty() || !force {
            return Err(self.remote_error(Operation::Delete, &identity, err));
        }

        warn!(
            resource_type = %self.type_name(),
            %identity,
            "not empty, removing contents before retrying delete"
        );
        let report = self
            .bounded(
                ctx,
                Operation::Drain,
                &identity,
                &completed,
                self.client.drain(ctx, kind, &identity),
            )
            .await?
            .map_err(|e| self.remote_error(Operation::Drain, &identity, e))?;
        info!(%identity, removed = report.removed, "emptied");
        completed.push(format!("emptied {} objects", report.removed));

        match self
            .bounded(
                ctx,
                Operation::Delete,
                &identity,
                &completed,
                self.client.delete(ctx, kind, &identity),
            )
            .await?
        {
            Ok(()) | Err(RemoteError::NotFound(_)) => Ok(()),
            Err(e) => Err(self.remote_error(Operation::Delete, &identity, e)),
        }
    }

    /// Takes over an existing remote object by identity
    pub async fn import(&mut self, ctx: &Context, identity: &str) -> Result<&ResourceState> {
        self.begin(Operation::Import, false, LifecycleState::Creating)?;
        let ctx = self.scoped(ctx);
        let kind = self.resource.kind();

        let imported = async {
            let remote = self
                .bounded(
                    &ctx,
                    Operation::Import,
                    identity,
                    &[],
                    self.client.read(&ctx, kind, identity),
                )
                .await?
                .map_err(|e| self.remote_error(Operation::Import, identity, e))?;
            let attributes = self.resource.flatten(identity, &remote, None)?;
            ResourceState::new(self.type_name(), identity, self.schema.version, attributes)
        }
        .await;

        match imported {
            Ok(state) => {
                info!(resource_type = %state.resource_type, identity, "imported");
                self.status = LifecycleState::Present;
                Ok(&*self.state.insert(state))
            }
            Err(e) => self.fail(e),
        }
    }

    /// Carries out a change set, whatever its action
    pub async fn apply(&mut self, ctx: &Context, change_set: &ChangeSet) -> Result<PlannedAction> {
        let action = change_set.action();
        match action {
            PlannedAction::NoOp => {}
            PlannedAction::Create => {
                if self.state.is_some() {
                    return Err(ConvergeError::StaleChangeSet {
                        planned: None,
                        actual: Some(self.identity()),
                    });
                }
                self.apply_create(ctx, change_set).await?;
            }
            PlannedAction::Update => self.update(ctx, change_set).await?,
            PlannedAction::Replace => {
                if change_set.prior_identity.as_deref() != self.state.as_ref().map(|s| s.identity.as_str()) {
                    return Err(ConvergeError::StaleChangeSet {
                        planned: change_set.prior_identity.clone(),
                        actual: self.state.as_ref().map(|s| s.identity.clone()),
                    });
                }
                info!(
                    resource_type = %self.type_name(),
                    identity = %self.identity(),
                    "replacing"
                );
                self.delete(ctx).await?;
                // Planned without prior state, so every default is derived afresh
                let create = plan_validated(&change_set.config, None, &self.schema)?;
                self.apply_create(ctx, &create).await?;
            }
        }
        Ok(action)
    }

    /// Plans `desired` against current state and applies the result
    pub async fn converge(&mut self, ctx: &Context, desired: &DynamicValue) -> Result<PlannedAction> {
        let change_set = self.plan(desired)?;
        self.apply(ctx, &change_set).await
    }
}

/// Nulls out every value still unknown
fn unknowns_to_null(planned: &Dynamic) -> Dynamic {
    match planned {
        Dynamic::Unknown => Dynamic::Null,
        Dynamic::Map(map) => Dynamic::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), unknowns_to_null(v)))
                .collect(),
        ),
        Dynamic::List(items) => Dynamic::List(items.iter().map(unknowns_to_null).collect()),
        other => other.clone(),
    }
}

/// Replaces values still unknown in `planned` with what `prior` holds
fn settle_unknowns(planned: &Dynamic, prior: &Dynamic) -> Dynamic {
    match planned {
        Dynamic::Unknown => prior.clone(),
        Dynamic::Map(map) => Dynamic::Map(
            map.iter()
                .map(|(k, v)| {
                    (
                        k.clone(),
                        settle_unknowns(v, prior.get(k).unwrap_or(&Dynamic::Null)),
                    )
                })
                .collect(),
        ),
        Dynamic::List(items) => Dynamic::List(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let before = prior.as_list().and_then(|l| l.get(i));
                    settle_unknowns(v, before.unwrap_or(&Dynamic::Null))
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

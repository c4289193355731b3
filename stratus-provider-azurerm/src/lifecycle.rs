//! Generic lifecycle handlers
//!
//! Every resource kind runs the same create/read/update/delete sequence;
//! only payload construction, state flattening and identity differ.
//! Those are supplied by a strategy object:
//!
//! - [`StandaloneKind`] for resources with their own Resource Manager ID,
//!   driven by [`Standalone`].
//! - [`AssociationKind`] for memberships embedded in a parent resource's
//!   properties, driven by [`Association`]. The parent is read, modified and
//!   written back under a named lock so concurrent associations on the same
//!   parent never overwrite each other.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value as Json;
use stratus_core::identifier::{CompositeIdentifier, ResourceIdentifier};
use stratus_core::lock::{LockKey, NamedLockGuard, NamedLocks};
use stratus_core::poller::{Presence, StateWaiter, await_completion};
use stratus_core::provider::{ProviderError, ProviderResult};
use stratus_core::resource::{Resource, ResourceId, State, Value};
use stratus_core::schema::ResourceSchema;

use crate::client::{ApiError, ManagementClient};
use crate::config::ProviderConfig;
use crate::utils::{merge_json, remove_at, strip_read_only};

/// Everything a handler needs from its provider instance
pub struct ProviderContext {
    pub client: Arc<dyn ManagementClient>,
    pub locks: NamedLocks,
    pub config: ProviderConfig,
}

impl ProviderContext {
    pub fn new(client: Arc<dyn ManagementClient>, config: ProviderConfig) -> Self {
        Self {
            client,
            locks: NamedLocks::new(),
            config,
        }
    }

    async fn lock(&self, key: Option<LockKey>) -> Option<NamedLockGuard> {
        match key {
            Some(key) => Some(self.locks.acquire(key).await),
            None => None,
        }
    }

    /// GET that maps 404 to `None`
    async fn get_optional(&self, id: &str, api_version: &str) -> Result<Option<Json>, ApiError> {
        match self.client.get(id, api_version).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Object-safe lifecycle of one resource type
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    fn type_name(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    fn schema_version(&self) -> u32 {
        0
    }

    async fn create(&self, ctx: &ProviderContext, resource: &Resource) -> ProviderResult<State>;

    async fn read(
        &self,
        ctx: &ProviderContext,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State>;

    async fn update(
        &self,
        ctx: &ProviderContext,
        id: &ResourceId,
        identifier: &str,
        to: &Resource,
    ) -> ProviderResult<State>;

    async fn delete(&self, ctx: &ProviderContext, id: &ResourceId, identifier: &str)
    -> ProviderResult<()>;

    fn upgrade_state(&self, state: State, from_version: u32) -> ProviderResult<State> {
        let _ = from_version;
        Ok(state)
    }
}

/// Human-readable location of a resource for error messages,
/// e.g. `Dedicated Host "host1" (hostGroups "group1" / Resource Group "rg1")`
pub fn describe(display_name: &str, id: &ResourceIdentifier) -> String {
    let segments = id.segments();
    let mut parents = Vec::new();
    if let Some(start) = segments
        .iter()
        .position(|(k, _)| k.eq_ignore_ascii_case("providers"))
        && start + 1 < segments.len()
    {
        for (key, value) in segments[start + 1..segments.len() - 1].iter().rev() {
            parents.push(format!("{} {:?}", key, value));
        }
    }
    if let Some(rg) = id.resource_group_name() {
        parents.push(format!("Resource Group {:?}", rg));
    }

    if parents.is_empty() {
        format!("{} {:?}", display_name, id.name())
    } else {
        format!("{} {:?} ({})", display_name, id.name(), parents.join(" / "))
    }
}

/// Validate, apply defaults and return the effective desired resource
fn prepare(schema: &ResourceSchema, resource: &Resource) -> ProviderResult<Resource> {
    let mut desired = resource.clone();
    schema.apply_defaults(&mut desired.attributes);
    schema.validate(&desired.attributes)?;
    Ok(desired)
}

/// Fail unless every key is present in the identifier
pub fn require_segments(id: &ResourceIdentifier, keys: &[&str]) -> ProviderResult<()> {
    for key in keys {
        id.require(key)?;
    }
    Ok(())
}

// =============================================================================
// Standalone resources
// =============================================================================

/// How a resource applies in-place changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Read the current resource, merge the desired payload into it and PUT it back
    Put,
    /// PATCH the mutable fields only
    Patch,
    /// Every attribute forces replacement
    Unsupported,
}

/// Poll for eventual consistency after a delete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeletionCheck {
    /// Consecutive not-found observations required
    pub confirmations: u32,
    pub poll_interval: Duration,
}

/// Strategy for a resource with its own Resource Manager ID
#[async_trait]
pub trait StandaloneKind: Send + Sync + 'static {
    /// Typed configuration built from validated attributes
    type Config: Send + Sync;

    fn type_name(&self) -> &'static str;

    /// Name used in messages (e.g. "Dedicated Host")
    fn display_name(&self) -> &'static str;

    fn api_version(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    fn schema_version(&self) -> u32 {
        0
    }

    fn update_mode(&self) -> UpdateMode {
        UpdateMode::Put
    }

    fn parse_config(&self, resource: &Resource) -> ProviderResult<Self::Config>;

    /// Identifier the resource will have once created
    fn identity(
        &self,
        config: &Self::Config,
        subscription_id: &str,
    ) -> ProviderResult<ResourceIdentifier>;

    /// Reject identifiers that lack the segments this kind needs
    fn validate_identifier(&self, id: &ResourceIdentifier) -> ProviderResult<()>;

    /// Lock serializing mutations of a shared parent
    fn lock_key(&self, id: &ResourceIdentifier) -> Option<LockKey> {
        let _ = id;
        None
    }

    /// Parent that must exist for the resource to exist, with its API version
    fn parent(&self, id: &ResourceIdentifier) -> Option<(ResourceIdentifier, &'static str)> {
        let _ = id;
        None
    }

    /// Runs after the existence check and before the create request
    async fn before_create(
        &self,
        ctx: &ProviderContext,
        config: &Self::Config,
        id: &ResourceIdentifier,
    ) -> ProviderResult<()> {
        let _ = (ctx, config, id);
        Ok(())
    }

    /// Full create-or-replace payload
    async fn build_payload(
        &self,
        ctx: &ProviderContext,
        config: &Self::Config,
        id: &ResourceIdentifier,
    ) -> ProviderResult<Json>;

    /// Fields of the remote body owned by [`StandaloneKind::build_payload`];
    /// a merged update clears them first so unset attributes are removed
    fn managed_paths(&self) -> &'static [&'static [&'static str]] {
        &[]
    }

    /// Payload for [`UpdateMode::Patch`]
    fn build_patch(&self, config: &Self::Config) -> ProviderResult<Json> {
        let _ = config;
        Err(ProviderError::unsupported(format!(
            "{} does not support patch updates",
            self.type_name()
        )))
    }

    /// Attributes from a GET response
    fn flatten(&self, id: &ResourceIdentifier, body: &Json) -> ProviderResult<HashMap<String, Value>>;

    fn deletion_check(&self, config: &ProviderConfig) -> Option<DeletionCheck> {
        let _ = config;
        None
    }
}

/// Lifecycle handler for a [`StandaloneKind`]
pub struct Standalone<K>(pub K);

impl<K: StandaloneKind> Standalone<K> {
    fn parse_identifier(&self, identifier: &str) -> ProviderResult<ResourceIdentifier> {
        let id = ResourceIdentifier::parse(identifier)?;
        self.0.validate_identifier(&id)?;
        Ok(id)
    }

    fn describe(&self, id: &ResourceIdentifier) -> String {
        describe(self.0.display_name(), id)
    }
}

#[async_trait]
impl<K: StandaloneKind> ResourceHandler for Standalone<K> {
    fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    fn schema(&self) -> ResourceSchema {
        self.0.schema()
    }

    fn schema_version(&self) -> u32 {
        self.0.schema_version()
    }

    async fn create(&self, ctx: &ProviderContext, resource: &Resource) -> ProviderResult<State> {
        let kind = &self.0;
        let api_version = kind.api_version();
        log::info!("Preparing arguments for {} creation.", kind.display_name());

        let desired = prepare(&kind.schema(), resource)?;
        let config = kind.parse_config(&desired)?;
        let id = kind.identity(&config, &ctx.config.subscription_id)?;
        let id_str = id.to_string();
        let described = self.describe(&id);

        let guard = ctx.lock(kind.lock_key(&id)).await;

        let existing = ctx
            .get_optional(&id_str, api_version)
            .await
            .map_err(|e| ProviderError::from(e).context(format!("checking for presence of existing {}", described)))?;
        if let Some(existing) = existing {
            let existing_id = existing
                .get("id")
                .and_then(Json::as_str)
                .unwrap_or(&id_str);
            return Err(ProviderError::import_collision(kind.type_name(), existing_id));
        }

        kind.before_create(ctx, &config, &id).await?;
        let payload = kind.build_payload(ctx, &config, &id).await?;

        let operation = ctx
            .client
            .put(&id_str, api_version, payload)
            .await
            .map_err(|e| ProviderError::from(e).context(format!("creating {}", described)))?;
        await_completion(operation, ctx.config.operation_poll_interval)
            .await
            .map_err(|e| e.context(format!("waiting for creation of {}", described)))?;

        let created = ctx
            .client
            .get(&id_str, api_version)
            .await
            .map_err(|e| ProviderError::from(e).context(format!("retrieving {}", described)))?;
        let identifier = created
            .get("id")
            .and_then(Json::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::api(format!("cannot read ID of {}", described)))?
            .to_string();
        drop(guard);

        self.read(ctx, &resource.id, &identifier).await
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let kind = &self.0;
        let rid = self.parse_identifier(identifier)?;
        let described = self.describe(&rid);

        if let Some((parent, parent_api_version)) = kind.parent(&rid) {
            let found = ctx
                .get_optional(&parent.to_string(), parent_api_version)
                .await
                .map_err(|e| ProviderError::from(e).context(format!("retrieving parent of {}", described)))?;
            if found.is_none() {
                log::info!(
                    "Parent {} of {} was not found - removing from state",
                    parent,
                    described
                );
                return Ok(State::not_found(id.clone()));
            }
        }

        let body = ctx
            .get_optional(identifier, kind.api_version())
            .await
            .map_err(|e| ProviderError::from(e).context(format!("retrieving {}", described)))?;
        let Some(body) = body else {
            log::info!("{} was not found - removing from state", described);
            return Ok(State::not_found(id.clone()));
        };

        let attributes = kind.flatten(&rid, &body)?;
        Ok(State::existing(id.clone(), attributes).with_identifier(identifier))
    }

    async fn update(
        &self,
        ctx: &ProviderContext,
        id: &ResourceId,
        identifier: &str,
        to: &Resource,
    ) -> ProviderResult<State> {
        let kind = &self.0;
        let mode = kind.update_mode();
        if mode == UpdateMode::Unsupported {
            return Err(ProviderError::unsupported(format!(
                "{} cannot be updated in place, delete and recreate",
                kind.type_name()
            )));
        }

        let rid = self.parse_identifier(identifier)?;
        let described = self.describe(&rid);
        let desired = prepare(&kind.schema(), to)?;
        let config = kind.parse_config(&desired)?;
        let api_version = kind.api_version();

        let guard = ctx.lock(kind.lock_key(&rid)).await;

        let operation = match mode {
            UpdateMode::Patch => {
                let patch = kind.build_patch(&config)?;
                ctx.client.patch(identifier, api_version, patch).await
            }
            _ => {
                let mut current = ctx
                    .get_optional(identifier, api_version)
                    .await
                    .map_err(|e| ProviderError::from(e).context(format!("retrieving {}", described)))?
                    .ok_or_else(|| ProviderError::not_found(format!("{} was not found", described)))?;
                let payload = kind.build_payload(ctx, &config, &rid).await?;
                strip_read_only(&mut current);
                for path in kind.managed_paths() {
                    remove_at(&mut current, path);
                }
                let tags = payload.get("tags").cloned();
                merge_json(&mut current, payload);
                if let (Some(tags), Some(obj)) = (tags, current.as_object_mut()) {
                    obj.insert("tags".to_string(), tags);
                }
                ctx.client.put(identifier, api_version, current).await
            }
        }
        .map_err(|e| ProviderError::from(e).context(format!("updating {}", described)))?;

        await_completion(operation, ctx.config.operation_poll_interval)
            .await
            .map_err(|e| e.context(format!("waiting for update of {}", described)))?;
        drop(guard);

        self.read(ctx, id, identifier).await
    }

    async fn delete(
        &self,
        ctx: &ProviderContext,
        _id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<()> {
        let kind = &self.0;
        let rid = self.parse_identifier(identifier)?;
        let described = self.describe(&rid);
        let api_version = kind.api_version();

        let _guard = ctx.lock(kind.lock_key(&rid)).await;

        let operation = match ctx.client.delete(identifier, api_version).await {
            Ok(operation) => operation,
            Err(e) if e.is_not_found() => {
                log::info!("{} was already deleted", described);
                return Ok(());
            }
            Err(e) => {
                return Err(ProviderError::from(e).context(format!("deleting {}", described)));
            }
        };
        match await_completion(operation, ctx.config.operation_poll_interval).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.context(format!("waiting for deletion of {}", described))),
        }

        if let Some(check) = kind.deletion_check(&ctx.config) {
            log::info!("Waiting for {} to be fully deleted", described);
            let client = ctx.client.clone();
            let refresh = || {
                let client = client.clone();
                let identifier = identifier.to_string();
                async move {
                    match client.get(&identifier, api_version).await {
                        Ok(_) => Ok(((), Presence::Exists)),
                        Err(e) if e.is_not_found() => Ok(((), Presence::Gone)),
                        Err(e) => Err(ProviderError::from(e)),
                    }
                }
            };
            StateWaiter::new(
                vec![Presence::Exists],
                vec![Presence::Gone],
                ctx.config.timeouts.delete,
            )
            .with_min_interval(check.poll_interval)
            .with_poll_interval(check.poll_interval)
            .with_continuous_target_occurrence(check.confirmations)
            .wait(refresh)
            .await
            .map_err(|e| e.context(format!("waiting for {} to be fully deleted", described)))?;
        }

        Ok(())
    }
}

// =============================================================================
// Associations
// =============================================================================

/// Strategy for a membership stored inside a parent resource
pub trait AssociationKind: Send + Sync + 'static {
    fn type_name(&self) -> &'static str;

    /// Name of the parent used in messages (e.g. "Network Interface")
    fn parent_display_name(&self) -> &'static str;

    fn parent_api_version(&self) -> &'static str;

    fn schema(&self) -> ResourceSchema;

    fn schema_version(&self) -> u32 {
        0
    }

    /// Parent and member identifiers from validated attributes
    fn parse_config(
        &self,
        resource: &Resource,
    ) -> ProviderResult<(ResourceIdentifier, ResourceIdentifier)>;

    fn lock_key(&self, parent: &ResourceIdentifier) -> LockKey;

    fn contains(&self, parent: &Json, member_id: &str) -> ProviderResult<bool>;

    fn add_member(&self, parent: &mut Json, member_id: &str) -> ProviderResult<()>;

    /// Returns whether the parent changed
    fn remove_member(&self, parent: &mut Json, member_id: &str) -> ProviderResult<bool>;

    fn flatten(&self, id: &CompositeIdentifier) -> HashMap<String, Value>;

    fn upgrade_state(&self, state: State, from_version: u32) -> ProviderResult<State> {
        let _ = from_version;
        Ok(state)
    }
}

/// Lifecycle handler for an [`AssociationKind`]
pub struct Association<K>(pub K);

impl<K: AssociationKind> Association<K> {
    fn describe(&self, parent: &ResourceIdentifier) -> String {
        describe(self.0.parent_display_name(), parent)
    }

    async fn write_parent(
        &self,
        ctx: &ProviderContext,
        parent_id: &str,
        body: Json,
        described: &str,
    ) -> ProviderResult<()> {
        let operation = ctx
            .client
            .put(parent_id, self.0.parent_api_version(), body)
            .await
            .map_err(|e| ProviderError::from(e).context(format!("updating {}", described)))?;
        await_completion(operation, ctx.config.operation_poll_interval)
            .await
            .map_err(|e| e.context(format!("waiting for update of {}", described)))
    }
}

#[async_trait]
impl<K: AssociationKind> ResourceHandler for Association<K> {
    fn type_name(&self) -> &'static str {
        self.0.type_name()
    }

    fn schema(&self) -> ResourceSchema {
        self.0.schema()
    }

    fn schema_version(&self) -> u32 {
        self.0.schema_version()
    }

    async fn create(&self, ctx: &ProviderContext, resource: &Resource) -> ProviderResult<State> {
        let kind = &self.0;
        let desired = prepare(&kind.schema(), resource)?;
        let (parent, member) = kind.parse_config(&desired)?;
        let composite = CompositeIdentifier::new(parent.clone(), member.clone());
        let parent_id = parent.to_string();
        let member_id = member.to_string();
        let described = self.describe(&parent);

        let guard = ctx.locks.acquire(kind.lock_key(&parent)).await;

        let mut body = ctx
            .get_optional(&parent_id, kind.parent_api_version())
            .await
            .map_err(|e| ProviderError::from(e).context(format!("retrieving {}", described)))?
            .ok_or_else(|| ProviderError::not_found(format!("{} was not found", described)))?;

        if kind.contains(&body, &member_id)? {
            return Err(ProviderError::import_collision(
                kind.type_name(),
                &composite.to_string(),
            ));
        }

        kind.add_member(&mut body, &member_id)?;
        self.write_parent(ctx, &parent_id, body, &described).await?;
        guard.release();

        self.read(ctx, &resource.id, &composite.to_string()).await
    }

    async fn read(
        &self,
        ctx: &ProviderContext,
        id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<State> {
        let kind = &self.0;
        let composite = CompositeIdentifier::parse(identifier)?;
        let described = self.describe(&composite.first);

        let body = ctx
            .get_optional(&composite.first.to_string(), kind.parent_api_version())
            .await
            .map_err(|e| ProviderError::from(e).context(format!("retrieving {}", described)))?;
        let Some(body) = body else {
            log::info!("{} was not found - removing from state", described);
            return Ok(State::not_found(id.clone()));
        };

        if !kind.contains(&body, &composite.second.to_string())? {
            log::info!(
                "{} is not associated with {} - removing from state",
                composite.second,
                described
            );
            return Ok(State::not_found(id.clone()));
        }

        Ok(State::existing(id.clone(), kind.flatten(&composite)).with_identifier(identifier))
    }

    async fn update(
        &self,
        _ctx: &ProviderContext,
        _id: &ResourceId,
        _identifier: &str,
        _to: &Resource,
    ) -> ProviderResult<State> {
        Err(ProviderError::unsupported(format!(
            "{} cannot be updated in place, delete and recreate",
            self.0.type_name()
        )))
    }

    async fn delete(
        &self,
        ctx: &ProviderContext,
        _id: &ResourceId,
        identifier: &str,
    ) -> ProviderResult<()> {
        let kind = &self.0;
        let composite = CompositeIdentifier::parse(identifier)?;
        let parent_id = composite.first.to_string();
        let described = self.describe(&composite.first);

        let _guard = ctx.locks.acquire(kind.lock_key(&composite.first)).await;

        let body = ctx
            .get_optional(&parent_id, kind.parent_api_version())
            .await
            .map_err(|e| ProviderError::from(e).context(format!("retrieving {}", described)))?;
        let Some(mut body) = body else {
            log::info!("{} was not found, nothing to disassociate", described);
            return Ok(());
        };

        if !kind.remove_member(&mut body, &composite.second.to_string())? {
            log::info!(
                "{} is already disassociated from {}",
                composite.second,
                described
            );
            return Ok(());
        }

        self.write_parent(ctx, &parent_id, body, &described).await
    }

    fn upgrade_state(&self, state: State, from_version: u32) -> ProviderResult<State> {
        self.0.upgrade_state(state, from_version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_lists_parents() {
        let id = ResourceIdentifier::parse(
            "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Compute/hostGroups/group1/hosts/host1",
        )
        .unwrap();
        assert_eq!(
            describe("Dedicated Host", &id),
            "Dedicated Host \"host1\" (hostGroups \"group1\" / Resource Group \"rg1\")"
        );

        let id = ResourceIdentifier::parse(
            "/subscriptions/0000/resourceGroups/rg1/providers/Microsoft.Compute/diskAccesses/da1",
        )
        .unwrap();
        assert_eq!(
            describe("Disk Access", &id),
            "Disk Access \"da1\" (Resource Group \"rg1\")"
        );
    }
}

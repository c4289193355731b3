//! Provider - Trait abstracting resource operations
//!
//! A Provider maps resource types onto a remote management API.
//! It is called by the plan/apply engine with desired attributes
//! and returns the refreshed state, or an error from the taxonomy below.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::identifier::IdentifierError;
use crate::resource::{Resource, ResourceId, State};
use crate::schema::{ResourceSchema, TypeError};

/// Classification of a provider failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Identifier could not be parsed; never retried
    MalformedIdentifier,
    /// Remote resource (or its required parent) does not exist
    NotFound,
    /// Create found a resource that is not tracked in state
    ImportCollision,
    /// Operation exceeded its time bound
    Timeout,
    /// Long-running operation finished in a failed or canceled state
    RemoteFailure,
    /// Request to the management API failed
    Api,
    /// Desired attributes or provider configuration are invalid
    InvalidConfig,
    /// Operation is not supported by this resource type
    Unsupported,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::MalformedIdentifier => "malformed identifier",
            ErrorKind::NotFound => "not found",
            ErrorKind::ImportCollision => "import collision",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RemoteFailure => "remote failure",
            ErrorKind::Api => "api error",
            ErrorKind::InvalidConfig => "invalid configuration",
            ErrorKind::Unsupported => "unsupported",
        };
        write!(f, "{}", s)
    }
}

/// Error type for Provider operations
#[derive(Debug)]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
    pub resource_id: Option<ResourceId>,
    pub cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref id) = self.resource_id {
            write!(f, "[{}.{}] {}", id.resource_type, id.name, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

impl std::error::Error for ProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|e| e.as_ref() as &dyn std::error::Error)
    }
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            resource_id: None,
            cause: None,
        }
    }

    pub fn malformed_identifier(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedIdentifier, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create found `existing_id` already present remotely
    pub fn import_collision(resource_type: &str, existing_id: &str) -> Self {
        Self::new(
            ErrorKind::ImportCollision,
            format!(
                "A resource with the ID \"{}\" already exists - to be managed it needs to be imported into the State. \
                 Please see the resource documentation for \"{}\" for more information.",
                existing_id, resource_type
            ),
        )
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn remote_failure(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RemoteFailure, message)
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Api, message)
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    /// Attach the resource unless one is already set
    pub fn for_resource(mut self, id: ResourceId) -> Self {
        if self.resource_id.is_none() {
            self.resource_id = Some(id);
        }
        self
    }

    pub fn with_cause(mut self, cause: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Prefix the message with context such as the resource's parent path
    pub fn context(mut self, context: impl fmt::Display) -> Self {
        self.message = format!("{}: {}", context, self.message);
        self
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

impl From<IdentifierError> for ProviderError {
    fn from(e: IdentifierError) -> Self {
        ProviderError::malformed_identifier(e.to_string()).with_cause(e)
    }
}

impl From<TypeError> for ProviderError {
    fn from(e: TypeError) -> Self {
        if e.is_malformed_identifier() {
            ProviderError::malformed_identifier(e.to_string()).with_cause(e)
        } else {
            ProviderError::invalid_config(e.to_string()).with_cause(e)
        }
    }
}

impl From<Vec<TypeError>> for ProviderError {
    fn from(errors: Vec<TypeError>) -> Self {
        let message = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        if errors.iter().any(TypeError::is_malformed_identifier) {
            ProviderError::malformed_identifier(message)
        } else {
            ProviderError::invalid_config(message)
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

/// Return type for async operations
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Definition of resource types that a Provider can handle
pub trait ResourceType: Send + Sync {
    /// Resource type name (e.g., "dedicated_host")
    fn name(&self) -> &'static str;

    /// Attribute schema for this resource type
    fn schema(&self) -> ResourceSchema;

    /// Version of the persisted state layout
    fn schema_version(&self) -> u32 {
        0
    }
}

/// Main Provider trait
///
/// All operations are async and involve side effects.
pub trait Provider: Send + Sync {
    /// Name of this Provider (e.g., "azurerm")
    fn name(&self) -> &'static str;

    /// List of resource types this Provider can handle
    fn resource_types(&self) -> Vec<Box<dyn ResourceType>>;

    /// Get the current state of a resource
    ///
    /// Returns `State::not_found()` if the resource does not exist,
    /// which tells the caller to forget it.
    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>>;

    /// Create a resource
    ///
    /// Returns State with identifier set to the resource ID
    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>>;

    /// Update a resource in place
    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>>;

    /// Delete a resource; a resource that is already gone is not an error
    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>>;

    /// Migrate persisted state written by an older schema version
    fn upgrade_state(&self, state: State, from_version: u32) -> BoxFuture<'_, ProviderResult<State>> {
        let _ = from_version;
        Box::pin(async move { Ok(state) })
    }
}

/// Provider implementation for Box<dyn Provider>
/// This enables dynamic dispatch for Providers
impl Provider for Box<dyn Provider> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn resource_types(&self) -> Vec<Box<dyn ResourceType>> {
        (**self).resource_types()
    }

    fn read(
        &self,
        id: &ResourceId,
        identifier: Option<&str>,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).read(id, identifier)
    }

    fn create(&self, resource: &Resource) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).create(resource)
    }

    fn update(
        &self,
        id: &ResourceId,
        identifier: &str,
        from: &State,
        to: &Resource,
    ) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).update(id, identifier, from, to)
    }

    fn delete(&self, id: &ResourceId, identifier: &str) -> BoxFuture<'_, ProviderResult<()>> {
        (**self).delete(id, identifier)
    }

    fn upgrade_state(&self, state: State, from_version: u32) -> BoxFuture<'_, ProviderResult<State>> {
        (**self).upgrade_state(state, from_version)
    }
}

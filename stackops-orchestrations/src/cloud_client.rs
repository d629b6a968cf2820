//! Provider-neutral contract for the cloud calls the orchestrator makes

use async_trait::async_trait;
use stackops_models::{ResourceKind, ResourceSpec, ResourceState, SecretValue};
use std::collections::BTreeMap;

/// How a credential modification should treat the value currently in force
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStrategy {
    /// Accept both the current and the new value until a later `SetOnly`
    DualAccept,
    /// Make the new value the only accepted one
    SetOnly,
}

impl CredentialStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStrategy::DualAccept => "dual-accept",
            CredentialStrategy::SetOnly => "set-only",
        }
    }
}

/// Successful result of a create call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Somebody else created it first; the caller treats this as success
    AlreadyExists,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CloudError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    /// The provider refused the request as invalid. Retrying won't help.
    #[error("provider rejected request: {0}")]
    Rejected(String),

    /// Throttling, timeouts, 5xx; safe to poll again
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("provider error: {0}")]
    Provider(String),
}

impl CloudError {
    pub fn is_transient(&self) -> bool {
        matches!(self, CloudError::Transient(_))
    }
}

/// Abstract capability interface over a cloud provider.
///
/// Implementations must map "does not exist" onto `ResourceState::Absent` in
/// `describe` rather than an error, so callers never parse provider text.
#[async_trait]
pub trait CloudClient: Send + Sync {
    async fn describe(&self, kind: ResourceKind, name: &str) -> Result<ResourceState, CloudError>;

    async fn create(&self, spec: &ResourceSpec) -> Result<CreateOutcome, CloudError>;

    /// Apply the parts of `spec` that `create` sets up in separate calls to a
    /// resource found `Available`, e.g. an ingress rule of a security group
    /// whose first run stopped after the group was created. `endpoint` and
    /// `metadata` are what `describe` just reported. Returns whether anything
    /// was changed.
    async fn converge(
        &self,
        spec: &ResourceSpec,
        endpoint: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<bool, CloudError> {
        let _ = (spec, endpoint, metadata);
        Ok(false)
    }

    async fn modify_credential(
        &self,
        kind: ResourceKind,
        name: &str,
        value: &SecretValue,
        strategy: CredentialStrategy,
    ) -> Result<(), CloudError>;
}

//! Error taxonomy for provisioning and rotation

use crate::cloud_client::CloudError;
use crate::config_writer::ConfigWriteError;
use crate::environment::EnvironmentError;
use stackops_models::{CredentialKind, ResourceKind, ResourceState, RotationPhase, SecretValue};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ProvisionError {
    /// Absent and not creatable here (discover-only kinds)
    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("timed out waiting for {kind} '{name}' after {attempts} polls (last state: {last_state})")]
    ProvisioningTimeout {
        kind: ResourceKind,
        name: String,
        attempts: u32,
        last_state: ResourceState,
    },

    #[error("provider rejected {kind} '{name}': {message}")]
    ProviderRejected {
        kind: ResourceKind,
        name: String,
        message: String,
    },

    #[error("{kind} '{name}' is in a failed state: {reason}")]
    ResourceFailed {
        kind: ResourceKind,
        name: String,
        reason: String,
    },

    #[error("{kind} '{name}' reported unexpected state while waiting: {state}")]
    UnexpectedState {
        kind: ResourceKind,
        name: String,
        state: ResourceState,
    },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("provider error on {kind} '{name}': {source}")]
    Provider {
        kind: ResourceKind,
        name: String,
        #[source]
        source: CloudError,
    },
}

/// What the caller should do with the attempted secret after a failed rotation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// The previous value is still accepted; the attempted one can be dropped
    Discard,
    /// The previous value may be retired; the attempted one must replace it
    Persist,
    /// Unknown which value is in force; keep the attempted one alongside
    PersistPending,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RotationError {
    /// Local failure, nothing was sent to the provider
    #[error("failed to generate {kind}: {reason}")]
    Generation { kind: CredentialKind, reason: String },

    #[error("provider rejected new {kind} for '{resource}': {message}")]
    ProviderRejected {
        kind: CredentialKind,
        resource: String,
        message: String,
    },

    #[error("'{resource}' is not available for {kind} rotation: {state}")]
    Unavailable {
        kind: CredentialKind,
        resource: String,
        state: String,
    },

    #[error(
        "timed out waiting for '{resource}' during {kind} rotation ({phase}) after {attempts} polls (last state: {last_state})"
    )]
    ProvisioningTimeout {
        kind: CredentialKind,
        resource: String,
        phase: RotationPhase,
        attempts: u32,
        last_state: ResourceState,
        attempted: SecretValue,
        retention: Retention,
    },

    /// A modification may have been applied; the provider's actual credential
    /// is unknown. Never retried automatically.
    #[error(
        "{kind} rotation on '{resource}' left an ambiguous state during {phase}: {reason} \
         (observed: {observed_label}, previous generation: {previous_generation}, attempted generation: {attempted_generation})",
        observed_label = describe_observed(.observed)
    )]
    AmbiguousState {
        kind: CredentialKind,
        resource: String,
        phase: RotationPhase,
        reason: String,
        observed: Option<ResourceState>,
        previous: Option<SecretValue>,
        attempted: SecretValue,
        previous_generation: u64,
        attempted_generation: u64,
        retention: Retention,
    },

    /// An earlier run left a value whose acceptance is unknown
    #[error("'{resource}' has an unresolved {kind} under {key}; resolve it before rotating again")]
    Unresolved {
        kind: CredentialKind,
        resource: String,
        key: String,
    },

    #[error("no {kind} recorded under {key}")]
    MissingCredential { kind: CredentialKind, key: String },

    /// The new value could not be recorded, so it was never sent
    #[error("could not record new {kind} for '{resource}' under {key} before applying it: {message}")]
    WriteAhead {
        kind: CredentialKind,
        resource: String,
        key: String,
        message: String,
    },

    #[error("provider error during {kind} rotation on '{resource}': {source}")]
    Provider {
        kind: CredentialKind,
        resource: String,
        #[source]
        source: CloudError,
    },
}

impl RotationError {
    /// The attempted secret and how it must be kept, if the failure happened
    /// after the provider may have seen it
    pub fn retained(&self) -> Option<(&SecretValue, Retention)> {
        match self {
            RotationError::ProvisioningTimeout { attempted, retention, .. }
            | RotationError::AmbiguousState { attempted, retention, .. } => match retention {
                Retention::Discard => None,
                _ => Some((attempted, *retention)),
            },
            _ => None,
        }
    }

    pub fn is_ambiguous(&self) -> bool {
        matches!(self, RotationError::AmbiguousState { .. })
    }
}

fn describe_observed(observed: &Option<ResourceState>) -> String {
    match observed {
        Some(state) => state.label(),
        None => "unknown (describe failed)".to_string(),
    }
}

/// Top-level error for a provisioning or rotation run. Per-resource failures
/// are reported in the run reports; these abort the run itself.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Config(#[from] ConfigWriteError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Rotation(#[from] RotationError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

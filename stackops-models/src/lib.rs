use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use zeroize::Zeroize;

// ============================================================================
// Resources
// ============================================================================

/// Kind of cloud resource managed by a provisioning plan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResourceKind {
    /// VPC discovery; never created, only looked up
    Network,
    SecurityGroup,
    SubnetGroup,
    Database,
    CacheCluster,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Network => "network",
            ResourceKind::SecurityGroup => "securityGroup",
            ResourceKind::SubnetGroup => "subnetGroup",
            ResourceKind::Database => "database",
            ResourceKind::CacheCluster => "cacheCluster",
        }
    }

    /// Discover-only kinds must already exist; an absent one is a hard error.
    pub fn is_discover_only(&self) -> bool {
        matches!(self, ResourceKind::Network)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies a target resource and the parameters used to create it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    /// Provider-side identifier (instance id, group name, ...)
    pub name: String,
    /// Creation parameters. Values may reference earlier steps with `${step}`
    /// or `${step.key}`.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Creation parameters that must never be logged or serialized
    #[serde(skip)]
    pub secret_params: BTreeMap<String, SecretValue>,
}

impl ResourceSpec {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            params: BTreeMap::new(),
            secret_params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_secret_param(mut self, key: impl Into<String>, value: SecretValue) -> Self {
        self.secret_params.insert(key.into(), value);
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn secret_param(&self, key: &str) -> Option<&SecretValue> {
        self.secret_params.get(key)
    }
}

/// Observed state of a resource, re-derived from the provider on every query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResourceState {
    Absent,
    Pending {
        since: DateTime<Utc>,
        /// Provider status string, e.g. "creating" or "modifying"
        status: String,
    },
    Available {
        endpoint: String,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
    },
    Failed {
        reason: String,
    },
}

impl ResourceState {
    pub fn pending(status: impl Into<String>) -> Self {
        ResourceState::Pending {
            since: Utc::now(),
            status: status.into(),
        }
    }

    pub fn available(endpoint: impl Into<String>) -> Self {
        ResourceState::Available {
            endpoint: endpoint.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            ResourceState::Available { endpoint, .. } => Some(endpoint),
            _ => None,
        }
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        match self {
            ResourceState::Available { metadata, .. } => metadata.get(key).map(String::as_str),
            _ => None,
        }
    }

    /// Short human label used in progress output and logs
    pub fn label(&self) -> String {
        match self {
            ResourceState::Absent => "absent".to_string(),
            ResourceState::Pending { status, .. } => format!("pending ({})", status),
            ResourceState::Available { .. } => "available".to_string(),
            ResourceState::Failed { reason } => format!("failed ({})", reason),
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// One step of a provisioning plan
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningStep {
    /// Step name, used as the key of the plan results
    pub name: String,
    pub spec: ResourceSpec,
    /// Names of earlier steps this step needs
    pub depends_on: Vec<String>,
}

impl ProvisioningStep {
    pub fn new(name: impl Into<String>, spec: ResourceSpec) -> Self {
        Self {
            name: name.into(),
            spec,
            depends_on: Vec::new(),
        }
    }

    pub fn after(mut self, step: impl Into<String>) -> Self {
        self.depends_on.push(step.into());
        self
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// A secret string. Never printed, zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Drop for SecretValue {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretValue(***)")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialKind {
    DbPassword,
    CacheAuthToken,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::DbPassword => "dbPassword",
            CredentialKind::CacheAuthToken => "cacheAuthToken",
        }
    }

    /// Whether the owning resource can accept old and new value at the same time
    pub fn supports_dual_accept(&self) -> bool {
        matches!(self, CredentialKind::CacheAuthToken)
    }

    pub fn resource_kind(&self) -> ResourceKind {
        match self {
            CredentialKind::DbPassword => ResourceKind::Database,
            CredentialKind::CacheAuthToken => ResourceKind::CacheCluster,
        }
    }
}

impl fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub kind: CredentialKind,
    /// Name of the owning resource
    pub resource: String,
    pub value: SecretValue,
    pub generation: u64,
}

impl Credential {
    pub fn new(kind: CredentialKind, resource: impl Into<String>, value: SecretValue, generation: u64) -> Self {
        Self {
            kind,
            resource: resource.into(),
            value,
            generation,
        }
    }

    /// The credential that replaces this one
    pub fn successor(&self, value: SecretValue) -> Credential {
        Credential {
            kind: self.kind,
            resource: self.resource.clone(),
            value,
            generation: self.generation + 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPhase {
    Started,
    DualActive,
    Committed,
    Failed,
}

impl RotationPhase {
    pub fn can_advance_to(self, next: RotationPhase) -> bool {
        use RotationPhase::*;
        matches!(
            (self, next),
            (Started, DualActive) | (Started, Committed) | (DualActive, Committed) | (Started | DualActive | Committed, Failed)
        )
    }
}

impl fmt::Display for RotationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RotationPhase::Started => "started",
            RotationPhase::DualActive => "dual_active",
            RotationPhase::Committed => "committed",
            RotationPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid rotation phase transition {from} -> {to}")]
pub struct PhaseTransitionError {
    pub from: RotationPhase,
    pub to: RotationPhase,
}

/// In-flight state of a single rotation. Lives only for one rotation call.
#[derive(Debug, Clone)]
pub struct RotationRecord {
    pub credential_kind: CredentialKind,
    pub resource: String,
    /// Previous value, kept only while both values may be live
    pub previous: Option<SecretValue>,
    pub new_value: SecretValue,
    pub generation: u64,
    pub phase: RotationPhase,
}

impl RotationRecord {
    pub fn start(current: &Credential, new_value: SecretValue) -> Self {
        Self {
            credential_kind: current.kind,
            resource: current.resource.clone(),
            previous: (!current.value.is_empty()).then(|| current.value.clone()),
            new_value,
            generation: current.generation + 1,
            phase: RotationPhase::Started,
        }
    }

    /// Pick up a dual-accept rotation left at `DualActive` by an earlier run.
    /// `pending` is the new value as persisted; the previous one is not known.
    pub fn resume_dual_active(pending: &Credential) -> Self {
        Self {
            credential_kind: pending.kind,
            resource: pending.resource.clone(),
            previous: None,
            new_value: pending.value.clone(),
            generation: pending.generation,
            phase: RotationPhase::DualActive,
        }
    }

    pub fn advance(&mut self, next: RotationPhase) -> Result<(), PhaseTransitionError> {
        if !self.phase.can_advance_to(next) {
            return Err(PhaseTransitionError { from: self.phase, to: next });
        }
        self.phase = next;
        if next == RotationPhase::Committed {
            // Old value is retired; don't hold on to it.
            self.previous = None;
        }
        Ok(())
    }

    /// The credential as it stands once this rotation is committed
    pub fn committed_credential(&self) -> Credential {
        Credential {
            kind: self.credential_kind,
            resource: self.resource.clone(),
            value: self.new_value.clone(),
            generation: self.generation,
        }
    }
}

// ============================================================================
// Summaries
// ============================================================================

/// Per-resource / per-credential result shown in the run summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Nothing to do, the desired state already held
    AlreadySatisfied,
    Created,
    Rotated,
    Committed,
    Failed,
    Skipped,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::AlreadySatisfied => "already satisfied",
            Outcome::Created => "created",
            Outcome::Rotated => "rotated",
            Outcome::Committed => "committed",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

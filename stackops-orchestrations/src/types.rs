//! Report and summary types produced by provisioning and rotation runs

use crate::config_writer::ApplyReport;
use crate::error::{ProvisionError, RotationError};
use serde::{Deserialize, Serialize};
use stackops_models::{CredentialKind, Outcome, ResourceKind, ResourceState};
use std::collections::BTreeMap;
use std::path::PathBuf;

// ============================================================================
// Provisioning
// ============================================================================

/// Endpoint and metadata produced by a completed step
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub endpoint: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: String,
    pub kind: ResourceKind,
    /// Provider-side name
    pub resource: String,
    pub outcome: Outcome,
    pub endpoint: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct PlanReport {
    /// One entry per plan step, in plan order
    pub steps: Vec<StepReport>,
    /// Outputs of every step that reached `Available`
    pub outputs: BTreeMap<String, StepOutput>,
    /// First hard failure; later steps were skipped
    pub error: Option<ProvisionError>,
}

impl PlanReport {
    /// Step name -> endpoint for every step that completed
    pub fn results(&self) -> BTreeMap<String, String> {
        self.outputs
            .iter()
            .map(|(step, output)| (step.clone(), output.endpoint.clone()))
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug)]
pub struct ProvisionReport {
    pub environment: String,
    pub plan: PlanReport,
    /// Initial secrets generated in this run (config key names)
    pub generated_secrets: Vec<String>,
    pub config: Option<ApplyReport>,
    pub config_file: PathBuf,
    /// Set when the final config write failed; the file is unchanged
    pub config_error: Option<String>,
    pub warnings: Vec<String>,
}

impl ProvisionReport {
    pub fn is_success(&self) -> bool {
        self.plan.is_success() && self.config_error.is_none()
    }

    pub fn summary(&self) -> RunSummary {
        let resources = self
            .plan
            .steps
            .iter()
            .map(|s| {
                (
                    s.step.clone(),
                    ResourceSummary {
                        kind: s.kind,
                        resource: s.resource.clone(),
                        outcome: s.outcome,
                        endpoint: s.endpoint.clone(),
                        error: s.error.clone(),
                    },
                )
            })
            .collect();

        RunSummary {
            environment: self.environment.clone(),
            action: "provision".to_string(),
            resources,
            credentials: BTreeMap::new(),
            config_file: Some(self.config_file.clone()),
            backup: self.config.as_ref().and_then(|c| c.backup.clone()),
            errors: self
                .plan
                .error
                .iter()
                .map(|e| e.to_string())
                .chain(self.config_error.clone())
                .collect(),
            warnings: self.warnings.clone(),
        }
    }
}

/// Read-only view of one plan step's resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub step: String,
    pub kind: ResourceKind,
    pub resource: String,
    /// `None` when the describe call itself failed
    pub state: Option<ResourceState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// Rotation
// ============================================================================

#[derive(Debug)]
pub struct CredentialReport {
    pub kind: CredentialKind,
    pub resource: String,
    pub outcome: Outcome,
    /// Generation now recorded in the config file, if it changed
    pub generation: Option<u64>,
    /// Dual-accept rotation stopped before retiring the old value
    pub commit_pending: bool,
    pub error: Option<RotationError>,
}

#[derive(Debug)]
pub struct RotationReport {
    pub environment: String,
    pub action: String,
    pub credentials: Vec<CredentialReport>,
    pub config: Option<ApplyReport>,
    pub config_file: PathBuf,
    pub config_error: Option<String>,
    pub warnings: Vec<String>,
}

impl RotationReport {
    pub fn is_success(&self) -> bool {
        self.credentials.iter().all(|c| c.error.is_none()) && self.config_error.is_none()
    }

    pub fn failed(&self) -> impl Iterator<Item = &CredentialReport> {
        self.credentials.iter().filter(|c| c.error.is_some())
    }

    pub fn summary(&self) -> RunSummary {
        let credentials = self
            .credentials
            .iter()
            .map(|c| {
                (
                    c.kind.as_str().to_string(),
                    CredentialSummary {
                        kind: c.kind,
                        resource: c.resource.clone(),
                        outcome: c.outcome,
                        rotated: matches!(c.outcome, Outcome::Rotated | Outcome::Committed),
                        committed: c.outcome == Outcome::Committed,
                        commit_pending: c.commit_pending,
                        generation: c.generation,
                        error: c.error.as_ref().map(|e| e.to_string()),
                    },
                )
            })
            .collect();

        RunSummary {
            environment: self.environment.clone(),
            action: self.action.clone(),
            resources: BTreeMap::new(),
            credentials,
            config_file: Some(self.config_file.clone()),
            backup: self.config.as_ref().and_then(|c| c.backup.clone()),
            errors: self
                .credentials
                .iter()
                .filter_map(|c| c.error.as_ref().map(|e| e.to_string()))
                .chain(self.config_error.clone())
                .collect(),
            warnings: self.warnings.clone(),
        }
    }
}

// ============================================================================
// Machine-readable summary
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    pub kind: ResourceKind,
    pub resource: String,
    pub outcome: Outcome,
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialSummary {
    pub kind: CredentialKind,
    pub resource: String,
    pub outcome: Outcome,
    pub rotated: bool,
    pub committed: bool,
    pub commit_pending: bool,
    pub generation: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Printed as JSON at the end of every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub environment: String,
    pub action: String,
    pub resources: BTreeMap<String, ResourceSummary>,
    pub credentials: BTreeMap<String, CredentialSummary>,
    pub config_file: Option<PathBuf>,
    pub backup: Option<PathBuf>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

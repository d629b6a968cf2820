//! Ordered, dependency-checked provisioning plan

use crate::cloud_client::CloudClient;
use crate::error::ProvisionError;
use crate::types::{PlanReport, StepOutput, StepReport};
use crate::wait::{EnsureOutcome, ResourceStateMachine};
use stackops_models::{Outcome, ProvisioningStep, ResourceSpec};
use std::collections::{BTreeMap, HashSet};

/// Steps run strictly in list order. Order is the caller's responsibility;
/// the plan only checks that every dependency names an earlier step.
#[derive(Debug, Clone)]
pub struct ProvisioningPlan {
    steps: Vec<ProvisioningStep>,
}

impl ProvisioningPlan {
    pub fn new(steps: Vec<ProvisioningStep>) -> Result<Self, ProvisionError> {
        let mut seen: HashSet<&str> = HashSet::new();

        for step in &steps {
            for dependency in &step.depends_on {
                if !seen.contains(dependency.as_str()) {
                    return Err(ProvisionError::InvalidPlan(format!(
                        "step '{}' depends on '{}', which is not an earlier step",
                        step.name, dependency
                    )));
                }
            }
            for value in step.spec.params.values() {
                for reference in references(value)? {
                    if !step.depends_on.iter().any(|d| d == reference.step) {
                        return Err(ProvisionError::InvalidPlan(format!(
                            "step '{}' references '{}' without depending on it",
                            step.name, reference.step
                        )));
                    }
                }
            }
            if !seen.insert(step.name.as_str()) {
                return Err(ProvisionError::InvalidPlan(format!("duplicate step name '{}'", step.name)));
            }
        }

        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[ProvisioningStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Run every step through `ensure_available`, stopping at the first hard
    /// failure. Completed steps stay in the report; re-running the plan
    /// skips them because they are already available.
    pub async fn execute<C: CloudClient + ?Sized>(&self, machine: &ResourceStateMachine<'_, C>) -> PlanReport {
        let mut report = PlanReport::default();

        for (index, step) in self.steps.iter().enumerate() {
            tracing::info!(
                step = %step.name,
                kind = %step.spec.kind,
                resource = %step.spec.name,
                "Step {}/{}",
                index + 1,
                self.steps.len()
            );

            let result = match resolve(&step.spec, &report.outputs) {
                Ok(spec) => machine.ensure_available(&spec).await,
                Err(e) => Err(e),
            };

            match result {
                Ok(ensured) => {
                    let outcome = match ensured.outcome {
                        EnsureOutcome::AlreadyAvailable => Outcome::AlreadySatisfied,
                        EnsureOutcome::Awaited | EnsureOutcome::Created | EnsureOutcome::Converged => Outcome::Created,
                    };
                    report.steps.push(StepReport {
                        step: step.name.clone(),
                        kind: step.spec.kind,
                        resource: step.spec.name.clone(),
                        outcome,
                        endpoint: Some(ensured.endpoint.clone()),
                        error: None,
                    });
                    report.outputs.insert(
                        step.name.clone(),
                        StepOutput {
                            endpoint: ensured.endpoint,
                            metadata: ensured.metadata,
                        },
                    );
                }
                Err(error) => {
                    tracing::error!(step = %step.name, error = %error, "Step failed, aborting remaining steps");
                    report.steps.push(StepReport {
                        step: step.name.clone(),
                        kind: step.spec.kind,
                        resource: step.spec.name.clone(),
                        outcome: Outcome::Failed,
                        endpoint: None,
                        error: Some(error.to_string()),
                    });
                    for skipped in &self.steps[index + 1..] {
                        report.steps.push(StepReport {
                            step: skipped.name.clone(),
                            kind: skipped.spec.kind,
                            resource: skipped.spec.name.clone(),
                            outcome: Outcome::Skipped,
                            endpoint: None,
                            error: None,
                        });
                    }
                    report.error = Some(error);
                    break;
                }
            }
        }

        report
    }
}

struct Reference<'a> {
    step: &'a str,
    key: Option<&'a str>,
    /// Byte range of the whole `${...}` token
    start: usize,
    end: usize,
}

fn references(value: &str) -> Result<Vec<Reference<'_>>, ProvisionError> {
    let mut found = Vec::new();
    let mut offset = 0;

    while let Some(rel) = value[offset..].find("${") {
        let start = offset + rel;
        let close = value[start..]
            .find('}')
            .ok_or_else(|| ProvisionError::InvalidPlan(format!("unterminated reference in '{}'", value)))?;
        let end = start + close + 1;
        let inner = &value[start + 2..end - 1];
        let (step, key) = match inner.split_once('.') {
            Some((step, key)) => (step, Some(key)),
            None => (inner, None),
        };
        if step.is_empty() || key == Some("") {
            return Err(ProvisionError::InvalidPlan(format!("empty reference in '{}'", value)));
        }
        found.push(Reference { step, key, start, end });
        offset = end;
    }

    Ok(found)
}

/// Copy of `spec` with every `${step}` / `${step.key}` replaced by the
/// endpoint or metadata value produced by that step
fn resolve(spec: &ResourceSpec, outputs: &BTreeMap<String, StepOutput>) -> Result<ResourceSpec, ProvisionError> {
    let mut resolved = spec.clone();

    for value in resolved.params.values_mut() {
        let refs = references(value)?;
        if refs.is_empty() {
            continue;
        }

        let mut out = String::with_capacity(value.len());
        let mut last = 0;
        for reference in &refs {
            let output = outputs.get(reference.step).ok_or_else(|| {
                ProvisionError::InvalidPlan(format!("no output from step '{}'", reference.step))
            })?;
            let substitution = match reference.key {
                None => output.endpoint.as_str(),
                Some(key) => output.metadata.get(key).map(String::as_str).ok_or_else(|| {
                    ProvisionError::InvalidPlan(format!("step '{}' reported no '{}'", reference.step, key))
                })?,
            };
            out.push_str(&value[last..reference.start]);
            out.push_str(substitution);
            last = reference.end;
        }
        out.push_str(&value[last..]);
        *value = out;
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud_client::CloudError;
    use crate::test_support::{Call, ScriptedCloud};
    use crate::wait::PollPolicy;
    use stackops_models::{ResourceKind, ResourceState};
    use std::time::Duration;

    fn fast() -> PollPolicy {
        PollPolicy::new(Duration::ZERO, 5)
    }

    fn network_state() -> ResourceState {
        ResourceState::Available {
            endpoint: "vpc-1".to_string(),
            metadata: BTreeMap::from([("subnet_ids".to_string(), "subnet-a,subnet-b".to_string())]),
        }
    }

    fn fresh_environment_plan() -> ProvisioningPlan {
        ProvisioningPlan::new(vec![
            ProvisioningStep::new("network", ResourceSpec::new(ResourceKind::Network, "default")),
            ProvisioningStep::new(
                "db-sg",
                ResourceSpec::new(ResourceKind::SecurityGroup, "app-db-sg").with_param("vpc_id", "${network}"),
            )
            .after("network"),
            ProvisioningStep::new(
                "db-subnets",
                ResourceSpec::new(ResourceKind::SubnetGroup, "app-db-subnets")
                    .with_param("subnet_ids", "${network.subnet_ids}"),
            )
            .after("network"),
            ProvisioningStep::new(
                "database",
                ResourceSpec::new(ResourceKind::Database, "app-db")
                    .with_param("security_group_ids", "${db-sg}")
                    .with_param("subnet_group", "app-db-subnets"),
            )
            .after("db-sg")
            .after("db-subnets"),
        ])
        .unwrap()
    }

    #[test]
    fn test_plan_rejects_forward_dependency() {
        let err = ProvisioningPlan::new(vec![
            ProvisioningStep::new("database", ResourceSpec::new(ResourceKind::Database, "app-db")).after("db-sg"),
            ProvisioningStep::new("db-sg", ResourceSpec::new(ResourceKind::SecurityGroup, "app-db-sg")),
        ])
        .unwrap_err();
        assert!(matches!(err, ProvisionError::InvalidPlan(_)));
    }

    #[test]
    fn test_plan_rejects_undeclared_reference() {
        let err = ProvisioningPlan::new(vec![
            ProvisioningStep::new("network", ResourceSpec::new(ResourceKind::Network, "default")),
            ProvisioningStep::new(
                "db-sg",
                ResourceSpec::new(ResourceKind::SecurityGroup, "app-db-sg").with_param("vpc_id", "${network}"),
            ),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("without depending"));
    }

    #[test]
    fn test_plan_rejects_duplicate_names() {
        let err = ProvisioningPlan::new(vec![
            ProvisioningStep::new("sg", ResourceSpec::new(ResourceKind::SecurityGroup, "a")),
            ProvisioningStep::new("sg", ResourceSpec::new(ResourceKind::SecurityGroup, "b")),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_resolve_substitutes_endpoint_and_metadata() {
        let outputs = BTreeMap::from([(
            "network".to_string(),
            StepOutput {
                endpoint: "vpc-1".to_string(),
                metadata: BTreeMap::from([("cidr".to_string(), "10.0.0.0/16".to_string())]),
            },
        )]);
        let spec = ResourceSpec::new(ResourceKind::SecurityGroup, "sg")
            .with_param("vpc_id", "${network}")
            .with_param("ingress_cidr", "${network.cidr}")
            .with_param("description", "sg for ${network} (${network.cidr})");

        let resolved = resolve(&spec, &outputs).unwrap();
        assert_eq!(resolved.param("vpc_id"), Some("vpc-1"));
        assert_eq!(resolved.param("ingress_cidr"), Some("10.0.0.0/16"));
        assert_eq!(resolved.param("description"), Some("sg for vpc-1 (10.0.0.0/16)"));
        // The plan's own spec is untouched
        assert_eq!(spec.param("vpc_id"), Some("${network}"));
    }

    #[tokio::test]
    async fn test_fresh_environment_creates_everything_in_order() {
        let cloud = ScriptedCloud::new();
        cloud.script_describe(ResourceKind::Network, "default", vec![Ok(network_state())]);
        cloud.script_describe(
            ResourceKind::SecurityGroup,
            "app-db-sg",
            vec![Ok(ResourceState::Absent), Ok(ResourceState::available("sg-1"))],
        );
        cloud.script_describe(
            ResourceKind::SubnetGroup,
            "app-db-subnets",
            vec![Ok(ResourceState::Absent), Ok(ResourceState::available("app-db-subnets"))],
        );
        cloud.script_describe(
            ResourceKind::Database,
            "app-db",
            vec![
                Ok(ResourceState::Absent),
                Ok(ResourceState::pending("creating")),
                Ok(ResourceState::pending("backing-up")),
                Ok(ResourceState::available("app-db.rds.internal")),
            ],
        );
        let machine = ResourceStateMachine::new(&cloud, fast());

        let report = fresh_environment_plan().execute(&machine).await;

        assert!(report.error.is_none());
        assert_eq!(
            report.results(),
            BTreeMap::from([
                ("network".to_string(), "vpc-1".to_string()),
                ("db-sg".to_string(), "sg-1".to_string()),
                ("db-subnets".to_string(), "app-db-subnets".to_string()),
                ("database".to_string(), "app-db.rds.internal".to_string()),
            ])
        );
        assert_eq!(report.steps[0].outcome, Outcome::AlreadySatisfied);
        assert!(report.steps[1..].iter().all(|s| s.outcome == Outcome::Created));

        let creates: Vec<Call> = cloud
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Create(..)))
            .collect();
        assert_eq!(
            creates,
            vec![
                Call::Create(ResourceKind::SecurityGroup, "app-db-sg".to_string()),
                Call::Create(ResourceKind::SubnetGroup, "app-db-subnets".to_string()),
                Call::Create(ResourceKind::Database, "app-db".to_string()),
            ]
        );
        assert_eq!(cloud.describe_count(ResourceKind::Database, "app-db"), 4);

        let specs = cloud.created_specs();
        assert_eq!(specs[0].param("vpc_id"), Some("vpc-1"));
        assert_eq!(specs[1].param("subnet_ids"), Some("subnet-a,subnet-b"));
        assert_eq!(specs[2].param("security_group_ids"), Some("sg-1"));
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_results_and_rerun_resumes() {
        let cloud = ScriptedCloud::new();
        cloud.script_describe(ResourceKind::Network, "default", vec![Ok(network_state())]);
        cloud.script_describe(
            ResourceKind::SecurityGroup,
            "app-db-sg",
            vec![Ok(ResourceState::Absent), Ok(ResourceState::available("sg-1"))],
        );
        cloud.on_create(
            ResourceKind::SubnetGroup,
            "app-db-subnets",
            Err(CloudError::Provider("connection reset".to_string())),
        );
        let machine = ResourceStateMachine::new(&cloud, fast());
        let plan = fresh_environment_plan();

        let report = plan.execute(&machine).await;
        assert!(matches!(report.error, Some(ProvisionError::Provider { .. })));
        assert_eq!(report.results().len(), 2);
        assert_eq!(report.steps[2].outcome, Outcome::Failed);
        assert_eq!(report.steps[3].outcome, Outcome::Skipped);
        assert_eq!(cloud.describe_count(ResourceKind::Database, "app-db"), 0);

        // Second run: subnet group now creatable, earlier steps are no-ops
        cloud.script_describe(
            ResourceKind::SubnetGroup,
            "app-db-subnets",
            vec![Ok(ResourceState::Absent), Ok(ResourceState::available("app-db-subnets"))],
        );
        cloud.script_describe(
            ResourceKind::Database,
            "app-db",
            vec![Ok(ResourceState::Absent), Ok(ResourceState::available("app-db.rds.internal"))],
        );
        let creates_before = cloud.create_count();

        let rerun = plan.execute(&machine).await;
        assert!(rerun.error.is_none());
        assert_eq!(rerun.steps[1].outcome, Outcome::AlreadySatisfied);
        assert_eq!(cloud.create_count() - creates_before, 2);
    }
}

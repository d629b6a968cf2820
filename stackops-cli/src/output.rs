//! Human-readable tables and the JSON run summary

use anyhow::Result;
use stackops_models::Outcome;
use stackops_orchestrations::{ProvisionReport, ResourceStatus, RotationReport, RunSummary};
use std::fmt::Write;

pub fn format_provision(report: &ProvisionReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<22} {:<16} {:<28} {:<18} {}", "STEP", "KIND", "RESOURCE", "OUTCOME", "ENDPOINT");
    let _ = writeln!(out, "{}", "-".repeat(110));
    for step in &report.plan.steps {
        let _ = writeln!(
            out,
            "{:<22} {:<16} {:<28} {:<18} {}",
            step.step,
            step.kind.as_str(),
            step.resource,
            marked(step.outcome),
            step.endpoint.as_deref().unwrap_or("-")
        );
    }
    if !report.generated_secrets.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "Generated initial secrets: {}", report.generated_secrets.join(", "));
    }
    write_trailer(&mut out, &report.summary());
    out
}

pub fn format_rotation(report: &RotationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:<16} {:<28} {:<18} {}", "CREDENTIAL", "RESOURCE", "OUTCOME", "GENERATION");
    let _ = writeln!(out, "{}", "-".repeat(75));
    for credential in &report.credentials {
        let _ = writeln!(
            out,
            "{:<16} {:<28} {:<18} {}",
            credential.kind.as_str(),
            credential.resource,
            marked(credential.outcome),
            credential
                .generation
                .map(|g| g.to_string())
                .unwrap_or_else(|| "-".to_string())
        );
    }
    if report.credentials.iter().any(|c| c.commit_pending) {
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "Old and new cache tokens are both accepted. Once every client uses the new token, run `stackops commit {}`.",
            report.environment
        );
    }
    write_trailer(&mut out, &report.summary());
    out
}

pub fn format_status(environment: &str, statuses: &[ResourceStatus]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Environment: {}", environment);
    let _ = writeln!(out, "{}", "=".repeat(60));
    let _ = writeln!(out, "{:<22} {:<16} {:<28} {:<24} {}", "STEP", "KIND", "RESOURCE", "STATE", "ENDPOINT");
    let _ = writeln!(out, "{}", "-".repeat(110));
    for status in statuses {
        let (state, endpoint) = match (&status.state, &status.error) {
            (Some(state), _) => (state.label(), state.endpoint().unwrap_or("-").to_string()),
            (None, Some(error)) => (format!("error: {}", error), "-".to_string()),
            (None, None) => ("unknown".to_string(), "-".to_string()),
        };
        let _ = writeln!(
            out,
            "{:<22} {:<16} {:<28} {:<24} {}",
            status.step,
            status.kind.as_str(),
            status.resource,
            state,
            endpoint
        );
    }
    out
}

fn marked(outcome: Outcome) -> String {
    let mark = match outcome {
        Outcome::Created | Outcome::Rotated | Outcome::Committed => "✓",
        Outcome::AlreadySatisfied => "=",
        Outcome::Failed => "✗",
        Outcome::Skipped => "-",
    };
    format!("{} {}", mark, outcome)
}

fn write_trailer(out: &mut String, summary: &RunSummary) {
    if let Some(path) = &summary.config_file {
        let _ = writeln!(out);
        let _ = writeln!(out, "Config file: {}", path.display());
        if let Some(backup) = &summary.backup {
            let _ = writeln!(out, "Backup:      {}", backup.display());
        }
    }
    for warning in &summary.warnings {
        let _ = writeln!(out, "warning: {}", warning);
    }
    for error in &summary.errors {
        let _ = writeln!(out, "error: {}", error);
    }
}

pub fn print_summary(summary: &RunSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(summary)?);
    Ok(())
}

/// Non-zero exit for any hard failure
pub fn finish(summary: &RunSummary) -> Result<()> {
    if !summary.is_success() {
        anyhow::bail!(
            "{} of environment '{}' failed with {} error(s)",
            summary.action,
            summary.environment,
            summary.errors.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackops_models::{ResourceKind, ResourceState};
    use std::collections::BTreeMap;

    fn summary(errors: Vec<String>) -> RunSummary {
        RunSummary {
            environment: "staging".to_string(),
            action: "rotate".to_string(),
            resources: BTreeMap::new(),
            credentials: BTreeMap::new(),
            config_file: None,
            backup: None,
            errors,
            warnings: vec![],
        }
    }

    #[test]
    fn test_finish_fails_on_errors() {
        assert!(finish(&summary(vec![])).is_ok());
        let err = finish(&summary(vec!["boom".to_string()])).unwrap_err();
        assert_eq!(err.to_string(), "rotate of environment 'staging' failed with 1 error(s)");
    }

    #[test]
    fn test_status_table() {
        let statuses = vec![
            ResourceStatus {
                step: "database".to_string(),
                kind: ResourceKind::Database,
                resource: "app-db".to_string(),
                state: Some(ResourceState::available("app-db.rds.internal")),
                error: None,
            },
            ResourceStatus {
                step: "cache".to_string(),
                kind: ResourceKind::CacheCluster,
                resource: "app-cache".to_string(),
                state: None,
                error: Some("throttled".to_string()),
            },
        ];

        let table = format_status("staging", &statuses);
        assert!(table.contains("app-db.rds.internal"));
        assert!(table.contains("error: throttled"));
    }
}

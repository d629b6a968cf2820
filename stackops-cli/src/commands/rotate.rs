use anyhow::{Context, Result};
use stackops_models::CredentialKind;
use stackops_orchestrations::rotation::RotationOrchestrator;
use stackops_orchestrations::secret::CommitMode;
use stackops_orchestrations::RotationReport;

use crate::cli::{OutputFormat, Target};
use crate::config::Settings;
use crate::output;

pub async fn run_rotate(
    settings: &Settings,
    name: &str,
    auto_commit: bool,
    only: Option<Target>,
    format: OutputFormat,
) -> Result<()> {
    let env = settings.load_environment(name)?;
    let client = settings.client(&env);

    let mode = if auto_commit { CommitMode::Immediate } else { CommitMode::Confirm };
    let orchestrator = RotationOrchestrator::new(&client, &env).with_commit_mode(mode);
    let kinds: Vec<CredentialKind> = match only {
        Some(target) => vec![target.into()],
        None => orchestrator.configured_kinds(),
    };

    if format == OutputFormat::Table {
        let names: Vec<_> = kinds.iter().map(|k| k.as_str()).collect();
        println!("Rotating {} for environment '{}'", names.join(", "), env.name);
        println!();
    }

    let report = orchestrator
        .rotate(&kinds)
        .await
        .with_context(|| format!("Rotation for '{}' aborted", env.name))?;
    report_rotation(&report, format)
}

pub async fn run_commit(settings: &Settings, name: &str, format: OutputFormat) -> Result<()> {
    let env = settings.load_environment(name)?;
    let client = settings.client(&env);

    if format == OutputFormat::Table {
        println!("Retiring the previous cache auth token for environment '{}'", env.name);
        println!();
    }

    let report = RotationOrchestrator::new(&client, &env)
        .commit()
        .await
        .with_context(|| format!("Commit for '{}' aborted", env.name))?;
    report_rotation(&report, format)
}

fn report_rotation(report: &RotationReport, format: OutputFormat) -> Result<()> {
    let summary = report.summary();
    if format == OutputFormat::Table {
        print!("{}", output::format_rotation(report));
        println!();
    }
    output::print_summary(&summary)?;
    output::finish(&summary)
}

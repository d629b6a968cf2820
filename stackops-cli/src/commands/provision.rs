use anyhow::{Context, Result};
use stackops_orchestrations::provision::provision_environment;

use crate::cli::OutputFormat;
use crate::config::Settings;
use crate::output;

pub async fn run_provision(settings: &Settings, name: &str, format: OutputFormat) -> Result<()> {
    let env = settings.load_environment(name)?;
    let client = settings.client(&env);

    if format == OutputFormat::Table {
        println!("Provisioning environment '{}' in {}", env.name, env.region);
        println!();
    }

    let report = provision_environment(&client, &env)
        .await
        .with_context(|| format!("Provisioning of '{}' aborted", env.name))?;
    let summary = report.summary();

    if format == OutputFormat::Table {
        print!("{}", output::format_provision(&report));
        println!();
    }
    output::print_summary(&summary)?;
    output::finish(&summary)
}

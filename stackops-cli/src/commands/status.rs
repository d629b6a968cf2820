use anyhow::Result;
use stackops_orchestrations::provision::environment_status;

use crate::cli::OutputFormat;
use crate::config::Settings;
use crate::output;

pub async fn run_status(settings: &Settings, name: &str, format: OutputFormat) -> Result<()> {
    let env = settings.load_environment(name)?;
    let client = settings.client(&env);

    let statuses = environment_status(&client, &env).await?;

    match format {
        OutputFormat::Json => {
            let doc = serde_json::json!({
                "environment": env.name,
                "resources": statuses,
            });
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        OutputFormat::Table => print!("{}", output::format_status(&env.name, &statuses)),
    }

    let failed = statuses.iter().filter(|s| s.error.is_some()).count();
    if failed > 0 {
        anyhow::bail!("{} resource(s) of '{}' could not be described", failed, env.name);
    }
    Ok(())
}

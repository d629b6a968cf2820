use anyhow::{Context, Result};
use stackops_orchestrations::aws_cli::AwsCliClient;
use stackops_orchestrations::environment::Environment;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Settings {
    pub environments_dir: PathBuf,
    pub aws_bin: String,
    pub aws_profile: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub max_poll_attempts: Option<u32>,
}

impl Settings {
    /// Read from the process environment, after `main` has loaded `.env`
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            environments_dir: var("STACKOPS_ENVIRONMENTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("environments")),
            aws_bin: var("STACKOPS_AWS_BIN").unwrap_or_else(|| "aws".to_string()),
            aws_profile: var("AWS_PROFILE").filter(|p| !p.is_empty()),
            poll_interval_secs: var("STACKOPS_POLL_INTERVAL_SECS")
                .map(|v| v.parse())
                .transpose()
                .context("STACKOPS_POLL_INTERVAL_SECS must be a number of seconds")?,
            max_poll_attempts: var("STACKOPS_MAX_POLL_ATTEMPTS")
                .map(|v| v.parse())
                .transpose()
                .context("STACKOPS_MAX_POLL_ATTEMPTS must be a positive number")?,
        })
    }

    /// Load `<environments_dir>/<name>.yaml` with the process overrides applied
    pub fn load_environment(&self, name: &str) -> Result<Environment> {
        let mut env = Environment::load(&self.environments_dir, name)
            .with_context(|| format!("Failed to load environment '{}'", name))?;

        if let Some(interval) = self.poll_interval_secs {
            env.polling.interval_secs = interval;
        }
        if let Some(attempts) = self.max_poll_attempts {
            env.polling.max_attempts = attempts;
        }
        env.validate()
            .with_context(|| format!("Invalid overrides for environment '{}'", name))?;

        Ok(env)
    }

    /// The environment file's profile wins over `AWS_PROFILE`
    pub fn client(&self, env: &Environment) -> AwsCliClient {
        AwsCliClient::new(&env.region)
            .with_binary(&self.aws_bin)
            .with_profile(env.profile.clone().or_else(|| self.aws_profile.clone()))
    }
}

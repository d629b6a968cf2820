use clap::{Parser, Subcommand, ValueEnum};
use stackops_models::CredentialKind;

/// Stackops - idempotent provisioning and credential rotation for app environments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bring every resource of an environment to available and write its connection settings
    Provision {
        /// Environment name (environments/<name>.yaml)
        environment: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Rotate the database password and cache auth token
    Rotate {
        /// Environment name (environments/<name>.yaml)
        environment: String,

        /// Retire the old cache token right away instead of waiting for `commit`
        #[arg(long)]
        auto_commit: bool,

        /// Rotate only one credential
        #[arg(long, value_enum)]
        only: Option<Target>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Retire the previous cache auth token after a rotation
    Commit {
        /// Environment name (environments/<name>.yaml)
        environment: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },

    /// Show the current state of every resource (read-only)
    Status {
        /// Environment name (environments/<name>.yaml)
        environment: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        output: OutputFormat,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Provision { .. } => "provision",
            Command::Rotate { .. } => "rotate",
            Command::Commit { .. } => "commit",
            Command::Status { .. } => "status",
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Progress lines and a table, then the JSON summary
    Table,
    /// JSON summary only
    Json,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Db,
    Cache,
}

impl From<Target> for CredentialKind {
    fn from(target: Target) -> Self {
        match target {
            Target::Db => CredentialKind::DbPassword,
            Target::Cache => CredentialKind::CacheAuthToken,
        }
    }
}

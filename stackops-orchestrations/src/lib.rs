//! Stackops Orchestrations - idempotent provisioning and credential rotation
//!
//! This crate brings a database and cache environment to `Available`, rotates
//! their credentials, and keeps the application's `KEY=VALUE` config file in
//! step with what the provider accepts.
//!
//! # Usage
//!
//! ```rust,no_run
//! use stackops_orchestrations::aws_cli::AwsCliClient;
//! use stackops_orchestrations::environment::Environment;
//! use stackops_orchestrations::provision::provision_environment;
//! use stackops_orchestrations::rotation::RotationOrchestrator;
//! use std::path::Path;
//!
//! # async fn example() -> stackops_orchestrations::Result<()> {
//! let env = Environment::load(Path::new("environments"), "staging")?;
//! let client = AwsCliClient::new(&env.region).with_profile(env.profile.clone());
//!
//! let report = provision_environment(&client, &env).await?;
//! println!("{:?}", report.summary());
//!
//! let orchestrator = RotationOrchestrator::new(&client, &env);
//! let rotated = orchestrator.rotate(&orchestrator.configured_kinds()).await?;
//! assert!(rotated.is_success());
//! # Ok(())
//! # }
//! ```

pub mod aws_cli;
pub mod cloud_client;
pub mod config_writer;
pub mod connection;
pub mod environment;
pub mod error;
pub mod names;
pub mod plan;
pub mod provision;
pub mod rotation;
pub mod secret;
pub mod types;
pub mod wait;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use cloud_client::{CloudClient, CloudError, CreateOutcome, CredentialStrategy};
pub use error::{Error, ProvisionError, Result, Retention, RotationError};
pub use types::*;

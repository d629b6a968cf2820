//! First-time provisioning of an environment
//!
//! Builds the standard plan (network, security groups, subnet groups,
//! database, cache) from an [`Environment`], makes sure the initial secrets
//! are on disk before anything is created, runs the plan and finally writes
//! the connection parameters of every available endpoint.

use crate::cloud_client::CloudClient;
use crate::config_writer::{self, ConfigDocument, ConfigUpdates};
use crate::connection::{self, CacheConnection, DatabaseConnection};
use crate::environment::Environment;
use crate::error::{ProvisionError, Result};
use crate::names::{params, steps};
use crate::plan::ProvisioningPlan;
use crate::secret::{generate_secret, validate_secret};
use crate::types::{ProvisionReport, ResourceStatus};
use crate::wait::ResourceStateMachine;
use stackops_models::{Credential, CredentialKind, Outcome, ProvisioningStep, ResourceKind, ResourceSpec, SecretValue};

/// Name used for the network step when no VPC id is configured
pub const DEFAULT_VPC: &str = "default";

/// Secrets handed to the create calls
#[derive(Debug, Clone, Default)]
pub struct InitialSecrets {
    pub db_password: Option<SecretValue>,
    pub cache_auth_token: Option<SecretValue>,
}

/// Qualified subnet group names, since RDS and ElastiCache keep separate
/// namespaces
pub fn rds_subnet_group(name: &str) -> String {
    format!("rds:{}", name)
}

pub fn elasticache_subnet_group(name: &str) -> String {
    format!("elasticache:{}", name)
}

/// The standard plan for `env`. Steps for a missing database or cache are
/// left out.
pub fn build_plan(env: &Environment, secrets: &InitialSecrets) -> Result<ProvisioningPlan, ProvisionError> {
    let vpc = env.network.vpc_id.clone().unwrap_or_else(|| DEFAULT_VPC.to_string());
    let ingress_cidr = env
        .ingress_cidr
        .clone()
        .unwrap_or_else(|| format!("${{{}.cidr}}", steps::NETWORK));
    let subnet_ids = format!("${{{}.subnet_ids}}", steps::NETWORK);
    let vpc_ref = format!("${{{}}}", steps::NETWORK);

    let mut plan = vec![ProvisioningStep::new(steps::NETWORK, ResourceSpec::new(ResourceKind::Network, vpc))];

    if let Some(db) = &env.database {
        plan.push(
            ProvisioningStep::new(
                steps::DB_SECURITY_GROUP,
                ResourceSpec::new(ResourceKind::SecurityGroup, &db.security_group)
                    .with_param(params::DESCRIPTION, format!("{} database access", env.name))
                    .with_param(params::VPC_ID, &vpc_ref)
                    .with_param(params::INGRESS_PORT, db.port.to_string())
                    .with_param(params::INGRESS_CIDR, &ingress_cidr),
            )
            .after(steps::NETWORK),
        );
        plan.push(
            ProvisioningStep::new(
                steps::DB_SUBNET_GROUP,
                ResourceSpec::new(ResourceKind::SubnetGroup, rds_subnet_group(&db.subnet_group))
                    .with_param(params::DESCRIPTION, format!("{} database subnets", env.name))
                    .with_param(params::SUBNET_IDS, &subnet_ids),
            )
            .after(steps::NETWORK),
        );

        let mut spec = ResourceSpec::new(ResourceKind::Database, &db.identifier)
            .with_param(params::ENGINE, &db.engine)
            .with_param(params::INSTANCE_CLASS, &db.instance_class)
            .with_param(params::ALLOCATED_STORAGE_GB, db.allocated_storage_gb.to_string())
            .with_param(params::DB_NAME, &db.db_name)
            .with_param(params::MASTER_USERNAME, &db.master_username)
            .with_param(params::PORT, db.port.to_string())
            .with_param(params::MULTI_AZ, db.multi_az.to_string())
            .with_param(params::SUBNET_GROUP, &db.subnet_group)
            .with_param(params::SECURITY_GROUP_IDS, format!("${{{}}}", steps::DB_SECURITY_GROUP));
        if let Some(version) = &db.engine_version {
            spec = spec.with_param(params::ENGINE_VERSION, version);
        }
        if let Some(password) = &secrets.db_password {
            spec = spec.with_secret_param(params::MASTER_PASSWORD, password.clone());
        }
        plan.push(
            ProvisioningStep::new(steps::DATABASE, spec)
                .after(steps::DB_SECURITY_GROUP)
                .after(steps::DB_SUBNET_GROUP),
        );
    }

    if let Some(cache) = &env.cache {
        plan.push(
            ProvisioningStep::new(
                steps::CACHE_SECURITY_GROUP,
                ResourceSpec::new(ResourceKind::SecurityGroup, &cache.security_group)
                    .with_param(params::DESCRIPTION, format!("{} cache access", env.name))
                    .with_param(params::VPC_ID, &vpc_ref)
                    .with_param(params::INGRESS_PORT, cache.port.to_string())
                    .with_param(params::INGRESS_CIDR, &ingress_cidr),
            )
            .after(steps::NETWORK),
        );
        plan.push(
            ProvisioningStep::new(
                steps::CACHE_SUBNET_GROUP,
                ResourceSpec::new(ResourceKind::SubnetGroup, elasticache_subnet_group(&cache.subnet_group))
                    .with_param(params::DESCRIPTION, format!("{} cache subnets", env.name))
                    .with_param(params::SUBNET_IDS, &subnet_ids),
            )
            .after(steps::NETWORK),
        );

        let mut spec = ResourceSpec::new(ResourceKind::CacheCluster, &cache.replication_group_id)
            .with_param(params::DESCRIPTION, format!("{} cache", env.name))
            .with_param(params::NODE_TYPE, &cache.node_type)
            .with_param(params::NUM_CACHE_CLUSTERS, cache.num_cache_clusters.to_string())
            .with_param(params::PORT, cache.port.to_string())
            .with_param(params::SUBNET_GROUP, &cache.subnet_group)
            .with_param(params::SECURITY_GROUP_IDS, format!("${{{}}}", steps::CACHE_SECURITY_GROUP));
        if let Some(version) = &cache.engine_version {
            spec = spec.with_param(params::ENGINE_VERSION, version);
        }
        if let Some(token) = secrets.cache_auth_token.as_ref().filter(|_| cache.auth_token) {
            spec = spec.with_secret_param(params::AUTH_TOKEN, token.clone());
        }
        plan.push(
            ProvisioningStep::new(steps::CACHE, spec)
                .after(steps::CACHE_SECURITY_GROUP)
                .after(steps::CACHE_SUBNET_GROUP),
        );
    }

    ProvisioningPlan::new(plan)
}

/// Provision `env` and write its connection parameters.
///
/// Safe to re-run after any failure: available resources are skipped and
/// secrets already in the config file are reused.
pub async fn provision_environment<C: CloudClient + ?Sized>(client: &C, env: &Environment) -> Result<ProvisionReport> {
    let path = &env.app_config_file;
    let mut warnings = Vec::new();

    let (secrets, generated, initial_write) = ensure_initial_secrets(env, &mut warnings)?;

    let plan = build_plan(env, &secrets)?;
    tracing::info!(environment = %env.name, steps = plan.len(), "Executing provisioning plan");
    let machine = ResourceStateMachine::new(client, env.poll_policy());
    let plan_report = plan.execute(&machine).await;

    let mut updates = ConfigUpdates::new();
    for step in &plan_report.steps {
        let Some(output) = plan_report.outputs.get(&step.step) else {
            continue;
        };
        match step.step.as_str() {
            steps::DATABASE => {
                if let (Some(db), Some(password)) = (&env.database, &secrets.db_password) {
                    if step.outcome == Outcome::AlreadySatisfied && generated.iter().any(|k| k == connection::secret_key(CredentialKind::DbPassword)) {
                        warnings.push(format!(
                            "database '{}' already existed; the password generated in this run was not applied, run `rotate` to set it",
                            db.identifier
                        ));
                    }
                    let conn = DatabaseConnection::from_endpoint(
                        &output.endpoint,
                        &output.metadata,
                        db.port,
                        &db.db_name,
                        &db.master_username,
                        password.clone(),
                    );
                    updates.extend(conn.config_updates());
                }
            }
            steps::CACHE => {
                if let Some(cache) = &env.cache {
                    let token = secrets.cache_auth_token.clone().filter(|_| cache.auth_token);
                    if token.is_some()
                        && step.outcome == Outcome::AlreadySatisfied
                        && generated.iter().any(|k| k == connection::secret_key(CredentialKind::CacheAuthToken))
                    {
                        warnings.push(format!(
                            "cache '{}' already existed; the auth token generated in this run was not applied, run `rotate` to set it",
                            cache.replication_group_id
                        ));
                    }
                    let conn = CacheConnection::from_endpoint(&output.endpoint, &output.metadata, cache.port, token);
                    updates.extend(conn.config_updates());
                }
            }
            _ => {}
        }
    }

    let (final_write, config_error) = config_writer::apply_reported(path, &updates);

    for warning in &warnings {
        tracing::warn!(environment = %env.name, "{}", warning);
    }

    Ok(ProvisionReport {
        environment: env.name.clone(),
        plan: plan_report,
        generated_secrets: generated,
        config: final_write.or(initial_write),
        config_file: path.clone(),
        config_error,
        warnings,
    })
}

/// Read the initial secrets from the config file, generating and persisting
/// any that are missing. Nothing is created before this succeeds.
fn ensure_initial_secrets(
    env: &Environment,
    warnings: &mut Vec<String>,
) -> Result<(InitialSecrets, Vec<String>, Option<config_writer::ApplyReport>)> {
    let path = &env.app_config_file;
    let document = ConfigDocument::read(path)?;
    let mut secrets = InitialSecrets::default();
    let mut generated = Vec::new();
    let mut updates = ConfigUpdates::new();

    let mut wanted = Vec::new();
    if let Some(db) = &env.database {
        wanted.push((CredentialKind::DbPassword, db.identifier.as_str()));
    }
    if let Some(cache) = env.cache.as_ref().filter(|c| c.auth_token) {
        wanted.push((CredentialKind::CacheAuthToken, cache.replication_group_id.as_str()));
    }

    for (kind, resource) in wanted {
        let existing = connection::credential_from_config(&document, kind, resource);
        let value = if existing.value.is_empty() {
            let value = generate_secret(kind, &env.secrets)?;
            updates.extend(connection::credential_updates(&Credential::new(kind, resource, value.clone(), 1)));
            generated.push(connection::secret_key(kind).to_string());
            tracing::info!(%kind, resource, "Generated initial secret");
            value
        } else {
            if let Err(reason) = validate_secret(kind, &existing.value) {
                warnings.push(format!("existing {} in {} may be rejected: {}", kind, path.display(), reason));
            }
            existing.value
        };
        match kind {
            CredentialKind::DbPassword => secrets.db_password = Some(value),
            CredentialKind::CacheAuthToken => secrets.cache_auth_token = Some(value),
        }
    }

    let report = if updates.is_empty() {
        None
    } else {
        Some(config_writer::apply(path, &updates)?)
    };

    Ok((secrets, generated, report))
}

/// Describe every resource of `env` without creating or waiting
pub async fn environment_status<C: CloudClient + ?Sized>(client: &C, env: &Environment) -> Result<Vec<ResourceStatus>> {
    let plan = build_plan(env, &InitialSecrets::default())?;
    let mut statuses = Vec::with_capacity(plan.len());

    for step in plan.steps() {
        let (state, error) = match client.describe(step.spec.kind, &step.spec.name).await {
            Ok(state) => (Some(state), None),
            Err(e) => (None, Some(e.to_string())),
        };
        statuses.push(ResourceStatus {
            step: step.name.clone(),
            kind: step.spec.kind,
            resource: step.spec.name.clone(),
            state,
            error,
        });
    }

    Ok(statuses)
}

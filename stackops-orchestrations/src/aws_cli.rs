//! `CloudClient` backed by the `aws` command line tool
//!
//! Every call runs `aws <service> <operation> ... --output json` and parses the
//! JSON response. Provider statuses are mapped onto `ResourceState`, and the
//! `(ErrorCode)` in the CLI's error text onto `CloudError`.
//!
//! Subnet group names are qualified by service: `rds:<name>` or
//! `elasticache:<name>`; an unqualified name is an RDS group.

use crate::cloud_client::{CloudClient, CloudError, CreateOutcome, CredentialStrategy};
use crate::names::{metadata, params};
use async_trait::async_trait;
use serde::Deserialize;
use stackops_models::{ResourceKind, ResourceSpec, ResourceState, SecretValue};
use std::collections::BTreeMap;
use tokio::process::Command;

const DEFAULT_VPC: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetService {
    Rds,
    ElastiCache,
}

/// Split a qualified subnet group name into service and plain name
pub fn split_service(qualified: &str) -> (SubnetService, &str) {
    if let Some(name) = qualified.strip_prefix("elasticache:") {
        (SubnetService::ElastiCache, name)
    } else if let Some(name) = qualified.strip_prefix("rds:") {
        (SubnetService::Rds, name)
    } else {
        (SubnetService::Rds, qualified)
    }
}

#[derive(Debug, Clone)]
pub struct AwsCliClient {
    binary: String,
    region: String,
    profile: Option<String>,
}

impl AwsCliClient {
    pub fn new(region: impl Into<String>) -> Self {
        Self {
            binary: "aws".to_string(),
            region: region.into(),
            profile: None,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_profile(mut self, profile: Option<String>) -> Self {
        self.profile = profile;
        self
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    /// Run one CLI operation and return its stdout. Arguments may contain
    /// secrets and are never logged.
    async fn run(
        &self,
        kind: ResourceKind,
        name: &str,
        service: &str,
        operation: &str,
        args: &[String],
    ) -> Result<String, CloudError> {
        let mut command = Command::new(&self.binary);
        command
            .arg(service)
            .arg(operation)
            .args(args)
            .arg("--region")
            .arg(&self.region)
            .arg("--output")
            .arg("json");
        if let Some(profile) = &self.profile {
            command.arg("--profile").arg(profile);
        }
        command.kill_on_drop(true);

        tracing::debug!(%kind, resource = name, service, operation, "aws call");

        let output = command
            .output()
            .await
            .map_err(|e| CloudError::Provider(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let error = classify_error(kind, name, &stderr);
            tracing::debug!(%kind, resource = name, service, operation, error = %error, "aws call failed");
            return Err(error);
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn describe_network(&self, name: &str) -> Result<ResourceState, CloudError> {
        let kind = ResourceKind::Network;
        let args = if name == DEFAULT_VPC {
            vec!["--filters".to_string(), "Name=isDefault,Values=true".to_string()]
        } else {
            vec!["--vpc-ids".to_string(), name.to_string()]
        };
        let vpcs: DescribeVpcs = parse(&self.run(kind, name, "ec2", "describe-vpcs", &args).await?)?;
        let Some(vpc) = vpcs.vpcs.into_iter().next() else {
            return Ok(ResourceState::Absent);
        };
        if vpc.state != "available" {
            return Ok(ResourceState::pending(vpc.state));
        }

        let args = vec!["--filters".to_string(), format!("Name=vpc-id,Values={}", vpc.vpc_id)];
        let subnets: DescribeSubnets = parse(&self.run(kind, name, "ec2", "describe-subnets", &args).await?)?;
        network_state(vpc, subnets)
    }

    async fn describe_security_group(&self, name: &str) -> Result<ResourceState, CloudError> {
        let args = vec!["--filters".to_string(), format!("Name=group-name,Values={}", name)];
        let out = self
            .run(ResourceKind::SecurityGroup, name, "ec2", "describe-security-groups", &args)
            .await?;
        security_group_state(&out)
    }

    async fn describe_subnet_group(&self, qualified: &str) -> Result<ResourceState, CloudError> {
        let kind = ResourceKind::SubnetGroup;
        match split_service(qualified) {
            (SubnetService::Rds, name) => {
                let args = vec!["--db-subnet-group-name".to_string(), name.to_string()];
                let out = self.run(kind, qualified, "rds", "describe-db-subnet-groups", &args).await?;
                rds_subnet_group_state(&out)
            }
            (SubnetService::ElastiCache, name) => {
                let args = vec!["--cache-subnet-group-name".to_string(), name.to_string()];
                let out = self
                    .run(kind, qualified, "elasticache", "describe-cache-subnet-groups", &args)
                    .await?;
                cache_subnet_group_state(&out)
            }
        }
    }

    async fn create_security_group(&self, spec: &ResourceSpec) -> Result<CreateOutcome, CloudError> {
        let kind = ResourceKind::SecurityGroup;
        let name = spec.name.as_str();
        let args = vec![
            "--group-name".to_string(),
            name.to_string(),
            "--description".to_string(),
            spec.param(params::DESCRIPTION).unwrap_or(name).to_string(),
            "--vpc-id".to_string(),
            required(spec, params::VPC_ID)?.to_string(),
        ];

        let (outcome, group_id) = match self.run(kind, name, "ec2", "create-security-group", &args).await {
            Ok(out) => {
                let created: CreateSecurityGroup = parse(&out)?;
                (CreateOutcome::Created, created.group_id)
            }
            // Created since our describe; the rule may still be missing.
            Err(CloudError::AlreadyExists { .. }) => match self.describe_security_group(name).await? {
                ResourceState::Available { endpoint, .. } => (CreateOutcome::AlreadyExists, endpoint),
                _ => return Ok(CreateOutcome::AlreadyExists),
            },
            Err(e) => return Err(e),
        };

        self.authorize_ingress(spec, group_id).await?;
        Ok(outcome)
    }

    /// Add the ingress rule of `spec` to the group. A rule that already
    /// exists counts as success. Returns whether a rule was added.
    async fn authorize_ingress(&self, spec: &ResourceSpec, group_id: String) -> Result<bool, CloudError> {
        let Some(port) = spec.param(params::INGRESS_PORT) else {
            return Ok(false);
        };
        let (flag, source) = ingress_source(spec)?;
        let args = vec![
            "--group-id".to_string(),
            group_id,
            "--protocol".to_string(),
            "tcp".to_string(),
            "--port".to_string(),
            port.to_string(),
            flag.to_string(),
            source.to_string(),
        ];
        match self
            .run(ResourceKind::SecurityGroup, &spec.name, "ec2", "authorize-security-group-ingress", &args)
            .await
        {
            Ok(_) => {
                tracing::info!(resource = %spec.name, port, source, "Ingress rule authorized");
                Ok(true)
            }
            Err(CloudError::AlreadyExists { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn create_subnet_group(&self, spec: &ResourceSpec) -> Result<CreateOutcome, CloudError> {
        let qualified = spec.name.as_str();
        let (service, name) = split_service(qualified);
        let description = spec.param(params::DESCRIPTION).unwrap_or(name).to_string();
        let subnets = split_list(required(spec, params::SUBNET_IDS)?);

        let (service, operation, mut args) = match service {
            SubnetService::Rds => (
                "rds",
                "create-db-subnet-group",
                vec![
                    "--db-subnet-group-name".to_string(),
                    name.to_string(),
                    "--db-subnet-group-description".to_string(),
                    description,
                ],
            ),
            SubnetService::ElastiCache => (
                "elasticache",
                "create-cache-subnet-group",
                vec![
                    "--cache-subnet-group-name".to_string(),
                    name.to_string(),
                    "--cache-subnet-group-description".to_string(),
                    description,
                ],
            ),
        };
        args.push("--subnet-ids".to_string());
        args.extend(subnets);

        self.run(ResourceKind::SubnetGroup, qualified, service, operation, &args)
            .await
            .map(|_| CreateOutcome::Created)
    }

    async fn create_database(&self, spec: &ResourceSpec) -> Result<CreateOutcome, CloudError> {
        let password = spec
            .secret_param(params::MASTER_PASSWORD)
            .ok_or_else(|| missing(spec, params::MASTER_PASSWORD))?;

        let mut args = vec![
            "--db-instance-identifier".to_string(),
            spec.name.clone(),
            "--engine".to_string(),
            required(spec, params::ENGINE)?.to_string(),
            "--db-instance-class".to_string(),
            required(spec, params::INSTANCE_CLASS)?.to_string(),
            "--allocated-storage".to_string(),
            required(spec, params::ALLOCATED_STORAGE_GB)?.to_string(),
            "--db-name".to_string(),
            required(spec, params::DB_NAME)?.to_string(),
            "--master-username".to_string(),
            required(spec, params::MASTER_USERNAME)?.to_string(),
            "--master-user-password".to_string(),
            password.expose().to_string(),
            "--port".to_string(),
            required(spec, params::PORT)?.to_string(),
            "--db-subnet-group-name".to_string(),
            required(spec, params::SUBNET_GROUP)?.to_string(),
            "--no-publicly-accessible".to_string(),
            "--storage-encrypted".to_string(),
        ];
        if spec.param(params::MULTI_AZ) == Some("true") {
            args.push("--multi-az".to_string());
        } else {
            args.push("--no-multi-az".to_string());
        }
        if let Some(version) = spec.param(params::ENGINE_VERSION) {
            args.extend(["--engine-version".to_string(), version.to_string()]);
        }
        args.push("--vpc-security-group-ids".to_string());
        args.extend(split_list(required(spec, params::SECURITY_GROUP_IDS)?));

        self.run(ResourceKind::Database, &spec.name, "rds", "create-db-instance", &args)
            .await
            .map(|_| CreateOutcome::Created)
    }

    async fn create_cache(&self, spec: &ResourceSpec) -> Result<CreateOutcome, CloudError> {
        let mut args = vec![
            "--replication-group-id".to_string(),
            spec.name.clone(),
            "--replication-group-description".to_string(),
            spec.param(params::DESCRIPTION).unwrap_or(&spec.name).to_string(),
            "--engine".to_string(),
            "redis".to_string(),
            "--cache-node-type".to_string(),
            required(spec, params::NODE_TYPE)?.to_string(),
            "--num-cache-clusters".to_string(),
            required(spec, params::NUM_CACHE_CLUSTERS)?.to_string(),
            "--port".to_string(),
            required(spec, params::PORT)?.to_string(),
            "--cache-subnet-group-name".to_string(),
            required(spec, params::SUBNET_GROUP)?.to_string(),
            "--at-rest-encryption-enabled".to_string(),
        ];
        if let Some(version) = spec.param(params::ENGINE_VERSION) {
            args.extend(["--engine-version".to_string(), version.to_string()]);
        }
        // AUTH requires in-transit encryption
        if let Some(token) = spec.secret_param(params::AUTH_TOKEN) {
            args.extend([
                "--transit-encryption-enabled".to_string(),
                "--auth-token".to_string(),
                token.expose().to_string(),
            ]);
        }
        args.push("--security-group-ids".to_string());
        args.extend(split_list(required(spec, params::SECURITY_GROUP_IDS)?));

        self.run(ResourceKind::CacheCluster, &spec.name, "elasticache", "create-replication-group", &args)
            .await
            .map(|_| CreateOutcome::Created)
    }
}

#[async_trait]
impl CloudClient for AwsCliClient {
    async fn describe(&self, kind: ResourceKind, name: &str) -> Result<ResourceState, CloudError> {
        let result = match kind {
            ResourceKind::Network => self.describe_network(name).await,
            ResourceKind::SecurityGroup => self.describe_security_group(name).await,
            ResourceKind::SubnetGroup => self.describe_subnet_group(name).await,
            ResourceKind::Database => {
                let args = vec!["--db-instance-identifier".to_string(), name.to_string()];
                match self.run(kind, name, "rds", "describe-db-instances", &args).await {
                    Ok(out) => db_instance_state(&out),
                    Err(e) => Err(e),
                }
            }
            ResourceKind::CacheCluster => {
                let args = vec!["--replication-group-id".to_string(), name.to_string()];
                match self
                    .run(kind, name, "elasticache", "describe-replication-groups", &args)
                    .await
                {
                    Ok(out) => replication_group_state(&out),
                    Err(e) => Err(e),
                }
            }
        };

        match result {
            Err(CloudError::NotFound { .. }) => Ok(ResourceState::Absent),
            other => other,
        }
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<CreateOutcome, CloudError> {
        match spec.kind {
            ResourceKind::Network => Err(CloudError::Unsupported(format!(
                "network '{}' must already exist",
                spec.name
            ))),
            ResourceKind::SecurityGroup => self.create_security_group(spec).await,
            ResourceKind::SubnetGroup => self.create_subnet_group(spec).await,
            ResourceKind::Database => self.create_database(spec).await,
            ResourceKind::CacheCluster => self.create_cache(spec).await,
        }
    }

    async fn converge(
        &self,
        spec: &ResourceSpec,
        endpoint: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<bool, CloudError> {
        if spec.kind != ResourceKind::SecurityGroup {
            return Ok(false);
        }
        let Some(port) = spec.param(params::INGRESS_PORT) else {
            return Ok(false);
        };
        let port: u16 = port
            .parse()
            .map_err(|_| CloudError::Rejected(format!("invalid ingress port '{}' for '{}'", port, spec.name)))?;
        let (_, source) = ingress_source(spec)?;
        let present = metadata
            .get(metadata::INGRESS)
            .is_some_and(|rules| ingress_allows(rules, port, source));
        if present {
            return Ok(false);
        }

        tracing::warn!(resource = %spec.name, port, source, "Security group exists without its ingress rule");
        self.authorize_ingress(spec, endpoint.to_string()).await
    }

    async fn modify_credential(
        &self,
        kind: ResourceKind,
        name: &str,
        value: &SecretValue,
        strategy: CredentialStrategy,
    ) -> Result<(), CloudError> {
        match (kind, strategy) {
            (ResourceKind::Database, CredentialStrategy::SetOnly) => {
                let args = vec![
                    "--db-instance-identifier".to_string(),
                    name.to_string(),
                    "--master-user-password".to_string(),
                    value.expose().to_string(),
                    "--apply-immediately".to_string(),
                ];
                self.run(kind, name, "rds", "modify-db-instance", &args).await.map(|_| ())
            }
            (ResourceKind::CacheCluster, strategy) => {
                let update = match strategy {
                    CredentialStrategy::DualAccept => "ROTATE",
                    CredentialStrategy::SetOnly => "SET",
                };
                let args = vec![
                    "--replication-group-id".to_string(),
                    name.to_string(),
                    "--auth-token".to_string(),
                    value.expose().to_string(),
                    "--auth-token-update-strategy".to_string(),
                    update.to_string(),
                    "--apply-immediately".to_string(),
                ];
                self.run(kind, name, "elasticache", "modify-replication-group", &args)
                    .await
                    .map(|_| ())
            }
            (kind, strategy) => Err(CloudError::Unsupported(format!(
                "{} credential change is not supported for {}",
                strategy.as_str(),
                kind
            ))),
        }
    }
}

fn required<'s>(spec: &'s ResourceSpec, key: &str) -> Result<&'s str, CloudError> {
    spec.param(key).ok_or_else(|| missing(spec, key))
}

fn missing(spec: &ResourceSpec, key: &str) -> CloudError {
    CloudError::Rejected(format!("{} '{}' is missing parameter '{}'", spec.kind, spec.name, key))
}

/// `--source-group <id>` or `--cidr <block>`
fn ingress_source(spec: &ResourceSpec) -> Result<(&'static str, &str), CloudError> {
    match spec.param(params::INGRESS_SOURCE_GROUP) {
        Some(group) => Ok(("--source-group", group)),
        None => Ok(("--cidr", required(spec, params::INGRESS_CIDR)?)),
    }
}

/// Whether the encoded rules of [`metadata::INGRESS`] admit TCP `port` from
/// exactly `source`. The range ends at the first '/', CIDR sources keep theirs.
fn ingress_allows(rules: &str, port: u16, source: &str) -> bool {
    rules.split(',').any(|rule| {
        let Some((range, from)) = rule.split_once('/') else {
            return false;
        };
        let Some((low, high)) = range.split_once('-') else {
            return false;
        };
        match (low.parse::<u16>(), high.parse::<u16>()) {
            (Ok(low), Ok(high)) => low <= port && port <= high && from == source,
            _ => false,
        }
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Error and status mapping
// ============================================================================

/// Map the CLI's stderr onto a `CloudError`
pub fn classify_error(kind: ResourceKind, name: &str, stderr: &str) -> CloudError {
    let message = stderr.trim().to_string();
    let code = error_code(stderr).unwrap_or_default();

    if code.contains("NotFound") {
        return CloudError::NotFound {
            kind,
            name: name.to_string(),
        };
    }
    if code.contains("AlreadyExists") || code.ends_with(".Duplicate") {
        return CloudError::AlreadyExists {
            kind,
            name: name.to_string(),
        };
    }
    if matches!(
        code,
        "Throttling" | "ThrottlingException" | "RequestLimitExceeded" | "ServiceUnavailable" | "InternalFailure"
            | "RequestTimeout"
    ) || (code.is_empty()
        && (message.contains("Could not connect to the endpoint URL") || message.contains("Read timeout")))
    {
        return CloudError::Transient(message);
    }
    if code.starts_with("InvalidParameter")
        || (code.starts_with("Invalid") && code.ends_with("State"))
        || matches!(code, "ValidationError" | "UnauthorizedOperation" | "AccessDenied" | "AccessDeniedException")
    {
        return CloudError::Rejected(message);
    }
    CloudError::Provider(message)
}

/// `An error occurred (Code) when calling ...` -> `Code`, with any `Fault`
/// suffix kept
fn error_code(stderr: &str) -> Option<&str> {
    let start = stderr.find("An error occurred (")? + "An error occurred (".len();
    let len = stderr[start..].find(')')?;
    Some(&stderr[start..start + len])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Available,
    Pending,
    Failed,
}

/// Classify an RDS or ElastiCache status string
pub fn classify_status(status: &str) -> StatusClass {
    match status {
        "available" => StatusClass::Available,
        "failed" | "create-failed" | "deleting" | "deleted" | "storage-full" | "restore-error"
        | "inaccessible-encryption-credentials" => StatusClass::Failed,
        s if s.starts_with("incompatible-") => StatusClass::Failed,
        _ => StatusClass::Pending,
    }
}

fn status_state(status: &str, endpoint: Option<String>, metadata: BTreeMap<String, String>) -> ResourceState {
    match (classify_status(status), endpoint) {
        (StatusClass::Available, Some(endpoint)) => ResourceState::Available { endpoint, metadata },
        // Reported available before the endpoint is published
        (StatusClass::Available, None) => ResourceState::pending(status),
        (StatusClass::Failed, _) => ResourceState::Failed {
            reason: status.to_string(),
        },
        (StatusClass::Pending, _) => ResourceState::pending(status),
    }
}

fn parse<T: for<'de> Deserialize<'de>>(out: &str) -> Result<T, CloudError> {
    serde_json::from_str(out).map_err(|e| CloudError::Provider(format!("unexpected aws output: {}", e)))
}

// ============================================================================
// Response shapes (only the fields used)
// ============================================================================

#[derive(Debug, Deserialize)]
struct DescribeVpcs {
    #[serde(rename = "Vpcs", default)]
    vpcs: Vec<Vpc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Vpc {
    vpc_id: String,
    state: String,
    #[serde(default)]
    cidr_block: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeSubnets {
    #[serde(rename = "Subnets", default)]
    subnets: Vec<Subnet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Subnet {
    subnet_id: String,
}

#[derive(Debug, Deserialize)]
struct DescribeSecurityGroups {
    #[serde(rename = "SecurityGroups", default)]
    security_groups: Vec<SecurityGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SecurityGroup {
    group_id: String,
    #[serde(default)]
    vpc_id: Option<String>,
    #[serde(default)]
    ip_permissions: Vec<IpPermission>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IpPermission {
    ip_protocol: String,
    #[serde(default)]
    from_port: Option<i32>,
    #[serde(default)]
    to_port: Option<i32>,
    #[serde(default)]
    ip_ranges: Vec<IpRange>,
    #[serde(default)]
    user_id_group_pairs: Vec<GroupPair>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IpRange {
    cidr_ip: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupPair {
    #[serde(default)]
    group_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateSecurityGroup {
    group_id: String,
}

#[derive(Debug, Deserialize)]
struct DescribeDbSubnetGroups {
    #[serde(rename = "DBSubnetGroups", default)]
    groups: Vec<DbSubnetGroup>,
}

#[derive(Debug, Deserialize)]
struct DbSubnetGroup {
    #[serde(rename = "DBSubnetGroupName")]
    name: String,
    #[serde(rename = "SubnetGroupStatus", default)]
    status: Option<String>,
    #[serde(rename = "VpcId", default)]
    vpc_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeCacheSubnetGroups {
    #[serde(rename = "CacheSubnetGroups", default)]
    groups: Vec<CacheSubnetGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CacheSubnetGroup {
    cache_subnet_group_name: String,
    #[serde(default)]
    vpc_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DescribeDbInstances {
    #[serde(rename = "DBInstances", default)]
    instances: Vec<DbInstance>,
}

#[derive(Debug, Deserialize)]
struct DbInstance {
    #[serde(rename = "DBInstanceStatus")]
    status: String,
    #[serde(rename = "Endpoint", default)]
    endpoint: Option<Endpoint>,
    #[serde(rename = "MasterUsername", default)]
    master_username: Option<String>,
    #[serde(rename = "DBName", default)]
    db_name: Option<String>,
    #[serde(rename = "Engine", default)]
    engine: Option<String>,
    #[serde(rename = "EngineVersion", default)]
    engine_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Endpoint {
    #[serde(default)]
    address: Option<String>,
    #[serde(default)]
    port: Option<u16>,
}

#[derive(Debug, Deserialize)]
struct DescribeReplicationGroups {
    #[serde(rename = "ReplicationGroups", default)]
    groups: Vec<ReplicationGroup>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ReplicationGroup {
    status: String,
    #[serde(default)]
    configuration_endpoint: Option<Endpoint>,
    #[serde(default)]
    node_groups: Vec<NodeGroup>,
    #[serde(default)]
    auth_token_enabled: Option<bool>,
    #[serde(default)]
    transit_encryption_enabled: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeGroup {
    #[serde(default)]
    primary_endpoint: Option<Endpoint>,
}

fn network_state(vpc: Vpc, subnets: DescribeSubnets) -> Result<ResourceState, CloudError> {
    let mut metadata = BTreeMap::new();
    let ids: Vec<_> = subnets.subnets.into_iter().map(|s| s.subnet_id).collect();
    metadata.insert(metadata::SUBNET_IDS.to_string(), ids.join(","));
    metadata.insert(metadata::VPC_ID.to_string(), vpc.vpc_id.clone());
    if let Some(cidr) = vpc.cidr_block {
        metadata.insert(metadata::CIDR.to_string(), cidr);
    }
    Ok(ResourceState::Available {
        endpoint: vpc.vpc_id,
        metadata,
    })
}

fn security_group_state(out: &str) -> Result<ResourceState, CloudError> {
    let groups: DescribeSecurityGroups = parse(out)?;
    Ok(match groups.security_groups.into_iter().next() {
        Some(group) => {
            let mut metadata = BTreeMap::new();
            if let Some(vpc) = group.vpc_id {
                metadata.insert(metadata::VPC_ID.to_string(), vpc);
            }
            metadata.insert(metadata::INGRESS.to_string(), ingress_rules(&group.ip_permissions));
            ResourceState::Available {
                endpoint: group.group_id,
                metadata,
            }
        }
        None => ResourceState::Absent,
    })
}

/// Encode the TCP rules of a group; protocol `-1` covers every port
fn ingress_rules(permissions: &[IpPermission]) -> String {
    let mut rules = Vec::new();
    for permission in permissions {
        let (low, high) = match permission.ip_protocol.as_str() {
            "-1" => (0, u16::MAX as i32),
            "tcp" | "6" => match (permission.from_port, permission.to_port) {
                (Some(low), Some(high)) => (low, high),
                _ => continue,
            },
            _ => continue,
        };
        let sources = permission
            .ip_ranges
            .iter()
            .map(|range| range.cidr_ip.as_str())
            .chain(permission.user_id_group_pairs.iter().filter_map(|pair| pair.group_id.as_deref()));
        for source in sources {
            rules.push(format!("{}-{}/{}", low, high, source));
        }
    }
    rules.join(",")
}

fn rds_subnet_group_state(out: &str) -> Result<ResourceState, CloudError> {
    let groups: DescribeDbSubnetGroups = parse(out)?;
    Ok(match groups.groups.into_iter().next() {
        Some(group) => {
            let metadata = group
                .vpc_id
                .map(|vpc| BTreeMap::from([(metadata::VPC_ID.to_string(), vpc)]))
                .unwrap_or_default();
            match group.status.as_deref() {
                None | Some("Complete") => ResourceState::Available {
                    endpoint: group.name,
                    metadata,
                },
                Some(status) => ResourceState::Failed {
                    reason: status.to_string(),
                },
            }
        }
        None => ResourceState::Absent,
    })
}

fn cache_subnet_group_state(out: &str) -> Result<ResourceState, CloudError> {
    let groups: DescribeCacheSubnetGroups = parse(out)?;
    Ok(match groups.groups.into_iter().next() {
        Some(group) => ResourceState::Available {
            endpoint: group.cache_subnet_group_name,
            metadata: group
                .vpc_id
                .map(|vpc| BTreeMap::from([(metadata::VPC_ID.to_string(), vpc)]))
                .unwrap_or_default(),
        },
        None => ResourceState::Absent,
    })
}

fn db_instance_state(out: &str) -> Result<ResourceState, CloudError> {
    let described: DescribeDbInstances = parse(out)?;
    let Some(instance) = described.instances.into_iter().next() else {
        return Ok(ResourceState::Absent);
    };

    let mut metadata = BTreeMap::new();
    let mut insert = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            metadata.insert(key.to_string(), value);
        }
    };
    let (address, port) = match instance.endpoint {
        Some(endpoint) => (endpoint.address, endpoint.port),
        None => (None, None),
    };
    insert(metadata::PORT, port.map(|p| p.to_string()));
    insert(metadata::MASTER_USERNAME, instance.master_username);
    insert(metadata::DB_NAME, instance.db_name);
    insert(metadata::ENGINE, instance.engine);
    insert(metadata::ENGINE_VERSION, instance.engine_version);

    Ok(status_state(&instance.status, address, metadata))
}

fn replication_group_state(out: &str) -> Result<ResourceState, CloudError> {
    let described: DescribeReplicationGroups = parse(out)?;
    let Some(group) = described.groups.into_iter().next() else {
        return Ok(ResourceState::Absent);
    };

    // Cluster mode publishes a configuration endpoint, otherwise use the primary.
    let endpoint = group.configuration_endpoint.or_else(|| {
        group
            .node_groups
            .into_iter()
            .find_map(|node_group| node_group.primary_endpoint)
    });
    let (address, port) = match endpoint {
        Some(endpoint) => (endpoint.address, endpoint.port),
        None => (None, None),
    };

    let mut metadata = BTreeMap::new();
    if let Some(port) = port {
        metadata.insert(metadata::PORT.to_string(), port.to_string());
    }
    metadata.insert(
        metadata::AUTH_TOKEN_ENABLED.to_string(),
        group.auth_token_enabled.unwrap_or(false).to_string(),
    );
    metadata.insert(
        metadata::TRANSIT_ENCRYPTION.to_string(),
        group.transit_encryption_enabled.unwrap_or(false).to_string(),
    );

    Ok(status_state(&group.status, address, metadata))
}

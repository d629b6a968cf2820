//! Environment definitions: `environments/<name>.yaml`
//!
//! An environment is the static input of a run. Every `ResourceSpec` of the
//! provisioning plan and every credential the rotator touches is derived from
//! it; nothing about live resource state is stored here.

use crate::secret::SecretPolicy;
use crate::wait::PollPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum EnvironmentError {
    #[error("failed to read environment file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse environment file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid environment '{name}': {reason}")]
    Invalid { name: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub region: String,
    /// AWS CLI profile; falls back to the process settings when unset
    #[serde(default)]
    pub profile: Option<String>,
    #[serde(default)]
    pub network: NetworkConfig,
    /// `KEY=VALUE` file read by the application
    pub app_config_file: PathBuf,
    /// CIDR allowed to reach the database and cache. Defaults to the VPC CIDR.
    #[serde(default)]
    pub ingress_cidr: Option<String>,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub secrets: SecretPolicy,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// `None` selects the region's default VPC
    #[serde(default)]
    pub vpc_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: u64,
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: PollPolicy::DEFAULT_INTERVAL.as_secs(),
            max_attempts: PollPolicy::DEFAULT_MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// RDS instance identifier
    pub identifier: String,
    #[serde(default = "default_db_engine")]
    pub engine: String,
    #[serde(default)]
    pub engine_version: Option<String>,
    #[serde(default = "default_instance_class")]
    pub instance_class: String,
    #[serde(default = "default_allocated_storage")]
    pub allocated_storage_gb: u32,
    pub db_name: String,
    pub master_username: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    #[serde(default)]
    pub multi_az: bool,
    pub security_group: String,
    pub subnet_group: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// ElastiCache replication group id
    pub replication_group_id: String,
    #[serde(default)]
    pub engine_version: Option<String>,
    #[serde(default = "default_node_type")]
    pub node_type: String,
    #[serde(default = "default_num_cache_clusters")]
    pub num_cache_clusters: u32,
    #[serde(default = "default_cache_port")]
    pub port: u16,
    /// Require an auth token (and therefore in-transit encryption)
    #[serde(default = "default_true")]
    pub auth_token: bool,
    pub security_group: String,
    pub subnet_group: String,
}

fn default_db_engine() -> String {
    "postgres".to_string()
}

fn default_instance_class() -> String {
    "db.t3.micro".to_string()
}

fn default_allocated_storage() -> u32 {
    20
}

fn default_db_port() -> u16 {
    5432
}

fn default_node_type() -> String {
    "cache.t3.micro".to_string()
}

fn default_num_cache_clusters() -> u32 {
    1
}

fn default_cache_port() -> u16 {
    6379
}

fn default_true() -> bool {
    true
}

impl Environment {
    /// Load `<dir>/<name>.yaml` (or `.yml`) and validate it
    pub fn load(dir: &Path, name: &str) -> Result<Self, EnvironmentError> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(EnvironmentError::Invalid {
                name: name.to_string(),
                reason: "environment names must be plain file stems".to_string(),
            });
        }

        let yaml = dir.join(format!("{}.yaml", name));
        let path = if yaml.exists() { yaml } else { dir.join(format!("{}.yml", name)) };

        let text = std::fs::read_to_string(&path).map_err(|source| EnvironmentError::Io {
            path: path.clone(),
            source,
        })?;
        let env = Self::from_yaml(&text).map_err(|source| EnvironmentError::Parse {
            path: path.clone(),
            source,
        })?;

        if env.name != name {
            return Err(EnvironmentError::Invalid {
                name: name.to_string(),
                reason: format!("file {} declares name '{}'", path.display(), env.name),
            });
        }
        env.validate()?;

        tracing::debug!(environment = %env.name, path = %path.display(), "Loaded environment");
        Ok(env)
    }

    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn validate(&self) -> Result<(), EnvironmentError> {
        let invalid = |reason: String| EnvironmentError::Invalid {
            name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name is empty".to_string()));
        }
        if self.region.trim().is_empty() {
            return Err(invalid("region is empty".to_string()));
        }
        if self.database.is_none() && self.cache.is_none() {
            return Err(invalid("defines neither a database nor a cache".to_string()));
        }
        if self.app_config_file.as_os_str().is_empty() {
            return Err(invalid("app_config_file is empty".to_string()));
        }
        if self.polling.max_attempts == 0 {
            return Err(invalid("polling.max_attempts must be at least 1".to_string()));
        }
        self.secrets.validate().map_err(|e| invalid(e.to_string()))?;

        if let Some(db) = &self.database {
            for (field, value) in [
                ("database.identifier", &db.identifier),
                ("database.db_name", &db.db_name),
                ("database.master_username", &db.master_username),
                ("database.security_group", &db.security_group),
                ("database.subnet_group", &db.subnet_group),
            ] {
                if value.trim().is_empty() {
                    return Err(invalid(format!("{} is empty", field)));
                }
            }
            if db.port == 0 {
                return Err(invalid("database.port must be non-zero".to_string()));
            }
        }

        if let Some(cache) = &self.cache {
            for (field, value) in [
                ("cache.replication_group_id", &cache.replication_group_id),
                ("cache.security_group", &cache.security_group),
                ("cache.subnet_group", &cache.subnet_group),
            ] {
                if value.trim().is_empty() {
                    return Err(invalid(format!("{} is empty", field)));
                }
            }
            if cache.port == 0 {
                return Err(invalid("cache.port must be non-zero".to_string()));
            }
            if cache.num_cache_clusters == 0 {
                return Err(invalid("cache.num_cache_clusters must be at least 1".to_string()));
            }
        }

        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::new(Duration::from_secs(self.polling.interval_secs), self.polling.max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const STAGING: &str = r#"
name: staging
region: eu-west-1
app_config_file: /srv/app/.env
polling:
  interval_secs: 10
database:
  identifier: app-staging-db
  db_name: app
  master_username: app_admin
  security_group: app-staging-db-sg
  subnet_group: app-staging-db-subnets
cache:
  replication_group_id: app-staging-cache
  security_group: app-staging-cache-sg
  subnet_group: app-staging-cache-subnets
"#;

    #[test]
    fn test_defaults_are_filled_in() {
        let env = Environment::from_yaml(STAGING).unwrap();
        env.validate().unwrap();

        assert_eq!(env.network.vpc_id, None);
        assert_eq!(env.polling.max_attempts, 40);
        assert_eq!(env.poll_policy(), PollPolicy::new(Duration::from_secs(10), 40));
        assert_eq!(env.secrets, SecretPolicy::default());

        let db = env.database.unwrap();
        assert_eq!(db.engine, "postgres");
        assert_eq!(db.port, 5432);
        assert!(!db.multi_az);

        let cache = env.cache.unwrap();
        assert_eq!(cache.port, 6379);
        assert!(cache.auth_token);
        assert_eq!(cache.num_cache_clusters, 1);
    }

    #[test]
    fn test_load_from_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("staging.yaml"), STAGING).unwrap();

        let env = Environment::load(dir.path(), "staging").unwrap();
        assert_eq!(env.region, "eu-west-1");

        let missing = Environment::load(dir.path(), "production").unwrap_err();
        assert!(matches!(missing, EnvironmentError::Io { .. }));

        let traversal = Environment::load(dir.path(), "../staging").unwrap_err();
        assert!(matches!(traversal, EnvironmentError::Invalid { .. }));
    }

    #[test]
    fn test_name_must_match_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("prod.yaml"), STAGING).unwrap();

        let err = Environment::load(dir.path(), "prod").unwrap_err();
        assert!(err.to_string().contains("declares name 'staging'"));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut env = Environment::from_yaml(STAGING).unwrap();
        env.polling.max_attempts = 0;
        assert!(env.validate().is_err());

        let mut env = Environment::from_yaml(STAGING).unwrap();
        env.secrets.cache_token_length = 8;
        assert!(env.validate().unwrap_err().to_string().contains("length 8"));

        let mut env = Environment::from_yaml(STAGING).unwrap();
        env.database = None;
        env.cache = None;
        assert!(env.validate().is_err());
    }

    #[test]
    fn test_shipped_sample_loads() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../environments");
        let env = Environment::load(&dir, "production").unwrap();
        assert_eq!(env.network.vpc_id.as_deref(), Some("vpc-0a1b2c3d4e5f67890"));
        assert_eq!(env.database.unwrap().instance_class, "db.t3.medium");
        assert_eq!(env.cache.unwrap().num_cache_clusters, 2);
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.yaml"), "name: [unterminated").unwrap();

        let err = Environment::load(dir.path(), "broken").unwrap_err();
        assert!(matches!(err, EnvironmentError::Parse { .. }));
    }
}

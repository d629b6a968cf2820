//! Name constants shared by plan builders, the AWS binding and config output

/// Step names of the standard environment plan
pub mod steps {
    /// VPC discovery (discover-only)
    pub const NETWORK: &str = "network";
    pub const DB_SECURITY_GROUP: &str = "db-security-group";
    pub const CACHE_SECURITY_GROUP: &str = "cache-security-group";
    pub const DB_SUBNET_GROUP: &str = "db-subnet-group";
    pub const CACHE_SUBNET_GROUP: &str = "cache-subnet-group";
    pub const DATABASE: &str = "database";
    pub const CACHE: &str = "cache";
}

/// Creation parameter keys understood by the AWS binding
pub mod params {
    pub const DESCRIPTION: &str = "description";
    pub const VPC_ID: &str = "vpc_id";
    pub const INGRESS_PORT: &str = "ingress_port";
    pub const INGRESS_CIDR: &str = "ingress_cidr";
    pub const INGRESS_SOURCE_GROUP: &str = "ingress_source_group";
    /// Comma-separated subnet ids
    pub const SUBNET_IDS: &str = "subnet_ids";
    pub const SUBNET_GROUP: &str = "subnet_group";
    /// Comma-separated security group ids
    pub const SECURITY_GROUP_IDS: &str = "security_group_ids";
    pub const ENGINE: &str = "engine";
    pub const ENGINE_VERSION: &str = "engine_version";
    pub const INSTANCE_CLASS: &str = "instance_class";
    pub const ALLOCATED_STORAGE_GB: &str = "allocated_storage_gb";
    pub const DB_NAME: &str = "db_name";
    pub const MASTER_USERNAME: &str = "master_username";
    pub const PORT: &str = "port";
    pub const MULTI_AZ: &str = "multi_az";
    pub const NODE_TYPE: &str = "node_type";
    pub const NUM_CACHE_CLUSTERS: &str = "num_cache_clusters";

    /// Secret parameters (`ResourceSpec::secret_params`)
    pub const MASTER_PASSWORD: &str = "master_password";
    pub const AUTH_TOKEN: &str = "auth_token";
}

/// Metadata keys reported in `ResourceState::Available`
pub mod metadata {
    pub const SUBNET_IDS: &str = "subnet_ids";
    pub const CIDR: &str = "cidr";
    pub const VPC_ID: &str = "vpc_id";
    pub const PORT: &str = "port";
    pub const ENGINE: &str = "engine";
    pub const ENGINE_VERSION: &str = "engine_version";
    pub const MASTER_USERNAME: &str = "master_username";
    pub const DB_NAME: &str = "db_name";
    pub const AUTH_TOKEN_ENABLED: &str = "auth_token_enabled";
    pub const TRANSIT_ENCRYPTION: &str = "transit_encryption";
    /// Security group TCP ingress, `<from>-<to>/<cidr or group id>` joined by `,`
    pub const INGRESS: &str = "ingress";
}

/// Keys written to the application config file
pub mod config_keys {
    pub const DB_HOST: &str = "DB_HOST";
    pub const DB_PORT: &str = "DB_PORT";
    pub const DB_NAME: &str = "DB_NAME";
    pub const DB_USER: &str = "DB_USER";
    pub const DB_PASSWORD: &str = "DB_PASSWORD";
    pub const DB_PASSWORD_GENERATION: &str = "DB_PASSWORD_GENERATION";
    pub const DATABASE_URL: &str = "DATABASE_URL";

    pub const REDIS_HOST: &str = "REDIS_HOST";
    pub const REDIS_PORT: &str = "REDIS_PORT";
    pub const REDIS_AUTH_TOKEN: &str = "REDIS_AUTH_TOKEN";
    pub const REDIS_AUTH_TOKEN_GENERATION: &str = "REDIS_AUTH_TOKEN_GENERATION";
    pub const REDIS_URL: &str = "REDIS_URL";

    /// Suffix for a value whose acceptance by the provider is unknown
    pub const PENDING_SUFFIX: &str = "_PENDING";
}

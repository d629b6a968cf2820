//! Connection parameters written to the application config file

use crate::config_writer::{ConfigDocument, ConfigUpdates};
use crate::names::{config_keys, metadata};
use stackops_models::{Credential, CredentialKind, SecretValue};
use std::collections::BTreeMap;

/// Percent-encode everything outside the URL "unreserved" set so that a
/// secret can sit in the userinfo part of a URL.
fn encode_userinfo(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConnection {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: SecretValue,
}

impl DatabaseConnection {
    /// Build from a discovered endpoint. Metadata wins over the fallbacks
    /// from the environment definition.
    pub fn from_endpoint(
        endpoint: &str,
        discovered: &BTreeMap<String, String>,
        fallback_port: u16,
        fallback_name: &str,
        fallback_user: &str,
        password: SecretValue,
    ) -> Self {
        Self {
            host: endpoint.to_string(),
            port: discovered
                .get(metadata::PORT)
                .and_then(|p| p.parse().ok())
                .unwrap_or(fallback_port),
            name: discovered
                .get(metadata::DB_NAME)
                .cloned()
                .unwrap_or_else(|| fallback_name.to_string()),
            user: discovered
                .get(metadata::MASTER_USERNAME)
                .cloned()
                .unwrap_or_else(|| fallback_user.to_string()),
            password,
        }
    }

    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            encode_userinfo(&self.user),
            encode_userinfo(self.password.expose()),
            self.host,
            self.port,
            self.name
        )
    }

    pub fn config_updates(&self) -> ConfigUpdates {
        let mut updates = ConfigUpdates::new();
        updates
            .set(config_keys::DB_HOST, &self.host)
            .set(config_keys::DB_PORT, self.port.to_string())
            .set(config_keys::DB_NAME, &self.name)
            .set(config_keys::DB_USER, &self.user)
            .set(config_keys::DB_PASSWORD, self.password.expose())
            .set(config_keys::DATABASE_URL, self.url());
        updates
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConnection {
    pub host: String,
    pub port: u16,
    /// `None` for clusters without AUTH
    pub auth_token: Option<SecretValue>,
}

impl CacheConnection {
    pub fn from_endpoint(
        endpoint: &str,
        discovered: &BTreeMap<String, String>,
        fallback_port: u16,
        auth_token: Option<SecretValue>,
    ) -> Self {
        Self {
            host: endpoint.to_string(),
            port: discovered
                .get(metadata::PORT)
                .and_then(|p| p.parse().ok())
                .unwrap_or(fallback_port),
            auth_token,
        }
    }

    /// `rediss://` (TLS) whenever a token is in use
    pub fn url(&self) -> String {
        match &self.auth_token {
            Some(token) => format!("rediss://:{}@{}:{}/0", encode_userinfo(token.expose()), self.host, self.port),
            None => format!("redis://{}:{}/0", self.host, self.port),
        }
    }

    pub fn config_updates(&self) -> ConfigUpdates {
        let mut updates = ConfigUpdates::new();
        updates
            .set(config_keys::REDIS_HOST, &self.host)
            .set(config_keys::REDIS_PORT, self.port.to_string());
        if let Some(token) = &self.auth_token {
            updates.set(config_keys::REDIS_AUTH_TOKEN, token.expose());
        }
        updates.set(config_keys::REDIS_URL, self.url());
        updates
    }
}

pub fn secret_key(kind: CredentialKind) -> &'static str {
    match kind {
        CredentialKind::DbPassword => config_keys::DB_PASSWORD,
        CredentialKind::CacheAuthToken => config_keys::REDIS_AUTH_TOKEN,
    }
}

pub fn generation_key(kind: CredentialKind) -> &'static str {
    match kind {
        CredentialKind::DbPassword => config_keys::DB_PASSWORD_GENERATION,
        CredentialKind::CacheAuthToken => config_keys::REDIS_AUTH_TOKEN_GENERATION,
    }
}

pub fn pending_key(kind: CredentialKind) -> String {
    format!("{}{}", secret_key(kind), config_keys::PENDING_SUFFIX)
}

/// The credential for `resource` as currently recorded in the config file.
/// A missing secret reads as empty, a missing generation as 0.
pub fn credential_from_config(document: &ConfigDocument, kind: CredentialKind, resource: &str) -> Credential {
    let value = document.get(secret_key(kind)).unwrap_or_default();
    let generation = document
        .get(generation_key(kind))
        .and_then(|g| g.parse().ok())
        .unwrap_or(0);
    Credential::new(kind, resource, SecretValue::new(value), generation)
}

/// Secret value plus generation counter
pub fn credential_updates(credential: &Credential) -> ConfigUpdates {
    let mut updates = ConfigUpdates::new();
    updates
        .set(secret_key(credential.kind), credential.value.expose())
        .set(generation_key(credential.kind), credential.generation.to_string());
    updates
}

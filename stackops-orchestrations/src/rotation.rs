//! Rotation of every credential of an environment
//!
//! Each new value is written to `<KEY>_PENDING` before the provider sees it.
//! The final config write promotes it to `<KEY>` (or keeps it pending when
//! its fate is unknown), so a crash or a failed final write never loses a
//! value the provider may already enforce.

use crate::cloud_client::CloudClient;
use crate::config_writer::{self, ApplyReport, ConfigDocument, ConfigUpdates};
use crate::connection::{self, CacheConnection, DatabaseConnection};
use crate::environment::{Environment, EnvironmentError};
use crate::error::{Result, Retention, RotationError};
use crate::secret::{CommitMode, RotationOutcome, SecretRotator};
use crate::types::{CredentialReport, RotationReport};
use crate::wait::{ResourceStateMachine, WaitError};
use stackops_models::{Credential, CredentialKind, Outcome, ResourceState, RotationRecord, SecretValue};
use std::collections::BTreeMap;

/// Endpoint and metadata of a resource found `Available`
struct Discovered {
    endpoint: String,
    metadata: BTreeMap<String, String>,
}

pub struct RotationOrchestrator<'a, C: CloudClient + ?Sized> {
    client: &'a C,
    env: &'a Environment,
    commit_mode: CommitMode,
}

impl<'a, C: CloudClient + ?Sized> RotationOrchestrator<'a, C> {
    pub fn new(client: &'a C, env: &'a Environment) -> Self {
        Self {
            client,
            env,
            commit_mode: CommitMode::default(),
        }
    }

    pub fn with_commit_mode(mut self, commit_mode: CommitMode) -> Self {
        self.commit_mode = commit_mode;
        self
    }

    /// Credential kinds this environment actually has
    pub fn configured_kinds(&self) -> Vec<CredentialKind> {
        let mut kinds = Vec::new();
        if self.env.database.is_some() {
            kinds.push(CredentialKind::DbPassword);
        }
        if self.env.cache.as_ref().is_some_and(|c| c.auth_token) {
            kinds.push(CredentialKind::CacheAuthToken);
        }
        kinds
    }

    /// Rotate `kinds` in order. Failures are collected per credential; every
    /// credential that did rotate is still written to the config file.
    pub async fn rotate(&self, kinds: &[CredentialKind]) -> Result<RotationReport> {
        let path = &self.env.app_config_file;
        let document = ConfigDocument::read(path)?;
        let rotator = SecretRotator::new(self.client, self.env.poll_policy(), self.env.secrets)
            .with_commit_mode(self.commit_mode);

        let mut updates = ConfigUpdates::new();
        let mut credentials = Vec::new();
        let mut warnings = Vec::new();
        let mut first_write: Option<ApplyReport> = None;
        let mut sent = Vec::new();

        for &kind in kinds {
            let Some(resource) = self.resource_name(kind) else {
                let message = format!("{} is not configured for environment '{}', skipping", kind, self.env.name);
                tracing::warn!(%kind, environment = %self.env.name, "Credential not configured, skipping");
                warnings.push(message);
                credentials.push(CredentialReport {
                    kind,
                    resource: String::new(),
                    outcome: Outcome::Skipped,
                    generation: None,
                    commit_pending: false,
                    error: None,
                });
                continue;
            };

            tracing::info!(%kind, resource = %resource, "Rotating credential");
            let report = match self.prepare(&document, kind, &resource).await {
                Ok((current, discovered)) => {
                    if current.value.is_empty() {
                        warnings.push(format!(
                            "no current {} recorded in {}; the previous value is unknown",
                            kind,
                            path.display()
                        ));
                    }
                    match self.write_ahead(&rotator, &current) {
                        Ok((record, written)) => {
                            if first_write.is_none() {
                                first_write = Some(written);
                            }
                            sent.push(connection::pending_key(kind));
                            let result = rotator.rotate_proposed(record).await;
                            self.record_rotation(&current, &discovered, result, true, &mut updates)
                        }
                        Err(error) => failed(kind, &resource, error),
                    }
                }
                Err(error) => failed(kind, &resource, error),
            };
            credentials.push(report);
        }

        let (final_write, config_error) = config_writer::apply_reported(path, &updates);
        if config_error.is_some() && !sent.is_empty() {
            warnings.push(format!(
                "{} was not updated; values sent to the provider in this run are recorded under {}",
                path.display(),
                sent.join(", ")
            ));
        }

        // Report the backup of the file as it was before this run
        let config = match (final_write, first_write) {
            (Some(mut last), Some(first)) => {
                last.backup = first.backup;
                Some(last)
            }
            (last, first) => last.or(first),
        };

        Ok(RotationReport {
            environment: self.env.name.clone(),
            action: "rotate".to_string(),
            credentials,
            config,
            config_file: path.clone(),
            config_error,
            warnings,
        })
    }

    /// Generate the next value and record it under `<KEY>_PENDING` before
    /// anything is sent to the provider
    fn write_ahead(
        &self,
        rotator: &SecretRotator<'_, C>,
        current: &Credential,
    ) -> std::result::Result<(RotationRecord, ApplyReport), RotationError> {
        let record = rotator.propose(current)?;
        let key = connection::pending_key(current.kind);
        let mut pending = ConfigUpdates::new();
        pending.set(key.clone(), record.new_value.expose());

        let written = config_writer::apply(&self.env.app_config_file, &pending).map_err(|e| {
            tracing::error!(kind = %current.kind, resource = %current.resource, %key, error = %e, "Could not record new credential; not rotating");
            RotationError::WriteAhead {
                kind: current.kind,
                resource: current.resource.clone(),
                key: key.clone(),
                message: e.to_string(),
            }
        })?;
        tracing::debug!(kind = %current.kind, resource = %current.resource, %key, "New credential recorded ahead of rotation");
        Ok((record, written))
    }

    /// Retire the previous cache auth token, keeping only the one recorded in
    /// the config file.
    pub async fn commit(&self) -> Result<RotationReport> {
        let kind = CredentialKind::CacheAuthToken;
        let resource = self.resource_name(kind).ok_or_else(|| EnvironmentError::Invalid {
            name: self.env.name.clone(),
            reason: "no cache with an auth token is configured".to_string(),
        })?;

        let path = &self.env.app_config_file;
        let document = ConfigDocument::read(path)?;
        let rotator = SecretRotator::new(self.client, self.env.poll_policy(), self.env.secrets);
        let mut updates = ConfigUpdates::new();

        let report = match self.prepare(&document, kind, &resource).await {
            Ok((pending, _)) if pending.value.is_empty() => failed(
                kind,
                &resource,
                RotationError::MissingCredential {
                    kind,
                    key: connection::secret_key(kind).to_string(),
                },
            ),
            Ok((pending, discovered)) => {
                let result = rotator.commit(&pending).await;
                self.record_rotation(&pending, &discovered, result, false, &mut updates)
            }
            Err(error) => failed(kind, &resource, error),
        };

        let (config, config_error) = config_writer::apply_reported(path, &updates);

        Ok(RotationReport {
            environment: self.env.name.clone(),
            action: "commit".to_string(),
            credentials: vec![report],
            config,
            config_file: path.clone(),
            config_error,
            warnings: Vec::new(),
        })
    }

    fn resource_name(&self, kind: CredentialKind) -> Option<String> {
        match kind {
            CredentialKind::DbPassword => self.env.database.as_ref().map(|db| db.identifier.clone()),
            CredentialKind::CacheAuthToken => self
                .env
                .cache
                .as_ref()
                .filter(|c| c.auth_token)
                .map(|c| c.replication_group_id.clone()),
        }
    }

    /// Current credential from the config file plus the live resource, which
    /// must be `Available`.
    async fn prepare(
        &self,
        document: &ConfigDocument,
        kind: CredentialKind,
        resource: &str,
    ) -> std::result::Result<(Credential, Discovered), RotationError> {
        let pending_key = connection::pending_key(kind);
        if document.contains_key(&pending_key) {
            return Err(RotationError::Unresolved {
                kind,
                resource: resource.to_string(),
                key: pending_key,
            });
        }

        let machine = ResourceStateMachine::new(self.client, self.env.poll_policy());
        let discovered = match machine.settled_state(kind.resource_kind(), resource).await {
            Ok(ResourceState::Available { endpoint, metadata }) => Discovered { endpoint, metadata },
            Ok(other) => {
                return Err(RotationError::Unavailable {
                    kind,
                    resource: resource.to_string(),
                    state: other.label(),
                })
            }
            Err(WaitError::Provider(source)) => {
                return Err(RotationError::Provider {
                    kind,
                    resource: resource.to_string(),
                    source,
                })
            }
            Err(other) => {
                return Err(RotationError::Unavailable {
                    kind,
                    resource: resource.to_string(),
                    state: other.to_string(),
                })
            }
        };
        tracing::debug!(%kind, resource, endpoint = %discovered.endpoint, "Discovered resource");

        Ok((connection::credential_from_config(document, kind, resource), discovered))
    }

    /// Queue config updates for the result of one rotation and build its
    /// report. `written_ahead` marks a `<KEY>_PENDING` entry to resolve.
    fn record_rotation(
        &self,
        current: &Credential,
        discovered: &Discovered,
        result: std::result::Result<RotationOutcome, RotationError>,
        written_ahead: bool,
        updates: &mut ConfigUpdates,
    ) -> CredentialReport {
        let kind = current.kind;
        let pending_key = connection::pending_key(kind);
        if written_ahead {
            updates.remove(pending_key.clone());
        }
        match result {
            Ok(outcome) => {
                let credential = outcome.credential();
                updates.extend(self.connection_updates(kind, &outcome.endpoint, &outcome.metadata, &credential.value));
                updates.extend(connection::credential_updates(&credential));
                CredentialReport {
                    kind,
                    resource: current.resource.clone(),
                    outcome: if outcome.commit_pending() { Outcome::Rotated } else { Outcome::Committed },
                    generation: Some(credential.generation),
                    commit_pending: outcome.commit_pending(),
                    error: None,
                }
            }
            Err(error) => {
                let mut generation = None;
                match error.retained() {
                    Some((attempted, Retention::Persist)) => {
                        let credential = successor_of(current, attempted, &error);
                        updates.extend(self.connection_updates(
                            kind,
                            &discovered.endpoint,
                            &discovered.metadata,
                            &credential.value,
                        ));
                        updates.extend(connection::credential_updates(&credential));
                        generation = Some(credential.generation);
                        tracing::warn!(%kind, resource = %current.resource, "Persisting attempted credential after failure");
                    }
                    Some((attempted, _)) => {
                        updates.set(pending_key.clone(), attempted.expose());
                        tracing::warn!(
                            %kind,
                            resource = %current.resource,
                            key = %pending_key,
                            "Attempted credential saved for manual resolution"
                        );
                    }
                    None => {}
                }
                CredentialReport {
                    kind,
                    resource: current.resource.clone(),
                    outcome: Outcome::Failed,
                    generation,
                    commit_pending: false,
                    error: Some(error),
                }
            }
        }
    }

    fn connection_updates(
        &self,
        kind: CredentialKind,
        endpoint: &str,
        metadata: &BTreeMap<String, String>,
        secret: &SecretValue,
    ) -> ConfigUpdates {
        match kind {
            CredentialKind::DbPassword => match &self.env.database {
                Some(db) => DatabaseConnection::from_endpoint(
                    endpoint,
                    metadata,
                    db.port,
                    &db.db_name,
                    &db.master_username,
                    secret.clone(),
                )
                .config_updates(),
                None => ConfigUpdates::new(),
            },
            CredentialKind::CacheAuthToken => match &self.env.cache {
                Some(cache) => {
                    CacheConnection::from_endpoint(endpoint, metadata, cache.port, Some(secret.clone())).config_updates()
                }
                None => ConfigUpdates::new(),
            },
        }
    }
}

/// The credential to record for an attempted value that must be kept. A
/// commit keeps the generation it resumed from.
fn successor_of(current: &Credential, attempted: &SecretValue, error: &RotationError) -> Credential {
    let generation = match error {
        RotationError::AmbiguousState { attempted_generation, .. } => *attempted_generation,
        _ if current.value == *attempted => current.generation,
        _ => return current.successor(attempted.clone()),
    };
    Credential::new(current.kind, current.resource.clone(), attempted.clone(), generation)
}

fn failed(kind: CredentialKind, resource: &str, error: RotationError) -> CredentialReport {
    tracing::error!(%kind, resource, error = %error, "Credential not rotated");
    CredentialReport {
        kind,
        resource: resource.to_string(),
        outcome: Outcome::Failed,
        generation: None,
        commit_pending: false,
        error: Some(error),
    }
}

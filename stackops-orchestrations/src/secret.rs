//! Secret generation and the dual-phase rotation protocol for one credential
//!
//! A rotation moves a [`RotationRecord`] through `Started -> DualActive ->
//! Committed`. Cache auth tokens get a real dual phase: the provider accepts
//! the old and the new token until the commit retires the old one. Database
//! master passwords have no such phase, so the single modify call replaces
//! the password outright.
//!
//! Any failure after a modify call may have reached the provider is reported
//! as [`RotationError::AmbiguousState`] (or a timeout) together with the
//! attempted value, and is never retried with a fresh value.

use crate::cloud_client::{CloudClient, CloudError, CredentialStrategy};
use crate::error::{Retention, RotationError};
use crate::wait::{PollPolicy, ResourceStateMachine, WaitError};
use rand::Rng;
use serde::{Deserialize, Serialize};
use stackops_models::{Credential, CredentialKind, ResourceState, RotationPhase, RotationRecord, SecretValue};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

const PASSWORD_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_.~";
const TOKEN_ALPHABET: &[u8] = b"0123456789abcdef";

/// Lengths accepted by the providers
const PASSWORD_LENGTHS: RangeInclusive<usize> = 8..=128;
const TOKEN_LENGTHS: RangeInclusive<usize> = 16..=128;

/// Length of newly generated secrets per credential kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretPolicy {
    pub db_password_length: usize,
    pub cache_token_length: usize,
}

impl Default for SecretPolicy {
    fn default() -> Self {
        Self {
            db_password_length: 32,
            cache_token_length: 64,
        }
    }
}

impl SecretPolicy {
    pub fn length_for(&self, kind: CredentialKind) -> usize {
        match kind {
            CredentialKind::DbPassword => self.db_password_length,
            CredentialKind::CacheAuthToken => self.cache_token_length,
        }
    }

    pub fn validate(&self) -> Result<(), RotationError> {
        for kind in [CredentialKind::DbPassword, CredentialKind::CacheAuthToken] {
            check_length(kind, self.length_for(kind))?;
        }
        Ok(())
    }
}

fn allowed_lengths(kind: CredentialKind) -> RangeInclusive<usize> {
    match kind {
        CredentialKind::DbPassword => PASSWORD_LENGTHS,
        CredentialKind::CacheAuthToken => TOKEN_LENGTHS,
    }
}

fn check_length(kind: CredentialKind, length: usize) -> Result<(), RotationError> {
    let allowed = allowed_lengths(kind);
    if allowed.contains(&length) {
        Ok(())
    } else {
        Err(RotationError::Generation {
            kind,
            reason: format!(
                "length {} outside {}..={}",
                length,
                allowed.start(),
                allowed.end()
            ),
        })
    }
}

/// Generate a new secret for `kind` from the thread-local CSPRNG.
///
/// Passwords use `A-Z a-z 0-9 - _ . ~` and always contain a letter and a
/// digit. Tokens are lowercase hex.
pub fn generate_secret(kind: CredentialKind, policy: &SecretPolicy) -> Result<SecretValue, RotationError> {
    let length = policy.length_for(kind);
    check_length(kind, length)?;

    let mut rng = rand::thread_rng();
    let alphabet = match kind {
        CredentialKind::DbPassword => PASSWORD_ALPHABET,
        CredentialKind::CacheAuthToken => TOKEN_ALPHABET,
    };

    loop {
        let value: String = (0..length)
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
            .collect();
        if kind == CredentialKind::CacheAuthToken || is_strong_password(&value) {
            return Ok(SecretValue::new(value));
        }
    }
}

fn is_strong_password(value: &str) -> bool {
    value.chars().any(|c| c.is_ascii_digit()) && value.chars().any(|c| c.is_ascii_alphabetic())
}

/// Check a secret that did not come from `generate_secret`, e.g. one read back
/// from the config file.
pub fn validate_secret(kind: CredentialKind, value: &SecretValue) -> Result<(), String> {
    let allowed = allowed_lengths(kind);
    if !allowed.contains(&value.len()) {
        return Err(format!("length {} outside {}..={}", value.len(), allowed.start(), allowed.end()));
    }
    let alphabet = match kind {
        CredentialKind::DbPassword => PASSWORD_ALPHABET,
        CredentialKind::CacheAuthToken => TOKEN_ALPHABET,
    };
    if !value.expose().bytes().all(|b| alphabet.contains(&b)) {
        return Err("contains characters outside the allowed set".to_string());
    }
    Ok(())
}

/// When a dual-accept rotation retires the old value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitMode {
    /// Stop at `DualActive`; a later `commit` retires the old value
    #[default]
    Confirm,
    /// Commit right after the dual phase settles
    Immediate,
}

/// Result of a successful `rotate` or `commit`
#[derive(Debug, Clone)]
pub struct RotationOutcome {
    /// In `DualActive` (commit pending) or `Committed`
    pub record: RotationRecord,
    pub endpoint: String,
    pub metadata: BTreeMap<String, String>,
}

impl RotationOutcome {
    pub fn commit_pending(&self) -> bool {
        self.record.phase == RotationPhase::DualActive
    }

    /// The credential the application should use from now on
    pub fn credential(&self) -> Credential {
        self.record.committed_credential()
    }
}

pub struct SecretRotator<'a, C: CloudClient + ?Sized> {
    machine: ResourceStateMachine<'a, C>,
    secrets: SecretPolicy,
    commit_mode: CommitMode,
}

impl<'a, C: CloudClient + ?Sized> SecretRotator<'a, C> {
    pub fn new(client: &'a C, poll: PollPolicy, secrets: SecretPolicy) -> Self {
        Self {
            machine: ResourceStateMachine::new(client, poll),
            secrets,
            commit_mode: CommitMode::default(),
        }
    }

    pub fn with_commit_mode(mut self, commit_mode: CommitMode) -> Self {
        self.commit_mode = commit_mode;
        self
    }

    /// Replace `current` with a freshly generated value.
    ///
    /// The caller must persist `outcome.credential()` on success, and the
    /// value from [`RotationError::retained`] on failure.
    pub async fn rotate(&self, current: &Credential) -> Result<RotationOutcome, RotationError> {
        let record = self.propose(current)?;
        self.rotate_proposed(record).await
    }

    /// Generate the successor of `current` without contacting the provider,
    /// so the caller can record it before [`Self::rotate_proposed`] sends it.
    pub fn propose(&self, current: &Credential) -> Result<RotationRecord, RotationError> {
        let new_value = generate_secret(current.kind, &self.secrets)?;
        Ok(RotationRecord::start(current, new_value))
    }

    /// Send a record from [`Self::propose`] to the provider and drive it to
    /// `DualActive` or `Committed`
    pub async fn rotate_proposed(&self, mut record: RotationRecord) -> Result<RotationOutcome, RotationError> {
        let kind = record.credential_kind;
        let resource = record.resource.clone();
        let resource = resource.as_str();

        let strategy = if kind.supports_dual_accept() {
            CredentialStrategy::DualAccept
        } else {
            tracing::warn!(
                %kind,
                resource,
                "No dual-accept phase for this credential: connections using the old value will fail until they reconnect with the new one"
            );
            CredentialStrategy::SetOnly
        };

        tracing::info!(
            %kind,
            resource,
            generation = record.generation,
            strategy = strategy.as_str(),
            "Proposing new credential"
        );

        if let Err(e) = self
            .machine
            .client()
            .modify_credential(kind.resource_kind(), resource, &record.new_value, strategy)
            .await
        {
            return Err(self.modify_failed(&mut record, e, Retention::PersistPending).await);
        }

        if strategy == CredentialStrategy::DualAccept {
            advance(&mut record, RotationPhase::DualActive);
        }

        let (timeout_retention, failure_retention) = match strategy {
            // Old token still accepted; nothing to keep on a plain timeout
            CredentialStrategy::DualAccept => (Retention::Discard, Retention::PersistPending),
            CredentialStrategy::SetOnly => (Retention::Persist, Retention::Persist),
        };

        let (endpoint, metadata) = match self.machine.wait_until_available(kind.resource_kind(), resource).await {
            Ok(settled) => settled,
            Err(e) => return Err(self.wait_failed(&mut record, e, timeout_retention, failure_retention).await),
        };

        if strategy == CredentialStrategy::SetOnly {
            advance(&mut record, RotationPhase::Committed);
            tracing::info!(%kind, resource, generation = record.generation, "Credential rotated");
            return Ok(RotationOutcome {
                record,
                endpoint,
                metadata,
            });
        }

        match self.commit_mode {
            CommitMode::Immediate => self.finish_commit(record).await,
            CommitMode::Confirm => {
                tracing::info!(
                    %kind,
                    resource,
                    generation = record.generation,
                    "Old and new credential both accepted; commit once every client uses the new one"
                );
                Ok(RotationOutcome {
                    record,
                    endpoint,
                    metadata,
                })
            }
        }
    }

    /// Retire every value except `pending`, finishing a rotation that was
    /// left at `DualActive`.
    pub async fn commit(&self, pending: &Credential) -> Result<RotationOutcome, RotationError> {
        if !pending.kind.supports_dual_accept() {
            return Err(RotationError::ProviderRejected {
                kind: pending.kind,
                resource: pending.resource.clone(),
                message: "credential has no dual-accept phase to commit".to_string(),
            });
        }
        self.finish_commit(RotationRecord::resume_dual_active(pending)).await
    }

    async fn finish_commit(&self, mut record: RotationRecord) -> Result<RotationOutcome, RotationError> {
        let kind = record.credential_kind;
        let resource = record.resource.clone();

        tracing::info!(%kind, resource = %resource, generation = record.generation, "Retiring previous credential");

        if let Err(e) = self
            .machine
            .client()
            .modify_credential(kind.resource_kind(), &resource, &record.new_value, CredentialStrategy::SetOnly)
            .await
        {
            return Err(self.modify_failed(&mut record, e, Retention::Persist).await);
        }

        let (endpoint, metadata) = match self.machine.wait_until_available(kind.resource_kind(), &resource).await {
            Ok(settled) => settled,
            Err(e) => return Err(self.wait_failed(&mut record, e, Retention::Persist, Retention::Persist).await),
        };

        advance(&mut record, RotationPhase::Committed);
        tracing::info!(%kind, resource = %resource, generation = record.generation, "Credential committed");

        Ok(RotationOutcome {
            record,
            endpoint,
            metadata,
        })
    }

    async fn modify_failed(&self, record: &mut RotationRecord, error: CloudError, retention: Retention) -> RotationError {
        let phase = record.phase;
        let kind = record.credential_kind;
        let resource = record.resource.clone();
        advance(record, RotationPhase::Failed);

        // A rejection before anything was applied leaves the old credential in force.
        if phase == RotationPhase::Started {
            match error {
                CloudError::Rejected(message) | CloudError::Unsupported(message) => {
                    tracing::error!(%kind, resource = %resource, %message, "Provider rejected new credential");
                    return RotationError::ProviderRejected { kind, resource, message };
                }
                CloudError::NotFound { .. } => {
                    tracing::error!(%kind, resource = %resource, "Resource not found");
                    return RotationError::Unavailable {
                        kind,
                        resource,
                        state: ResourceState::Absent.label(),
                    };
                }
                _ => {}
            }
        }

        self.ambiguous(record, phase, error.to_string(), retention).await
    }

    async fn wait_failed(
        &self,
        record: &mut RotationRecord,
        error: WaitError,
        timeout_retention: Retention,
        failure_retention: Retention,
    ) -> RotationError {
        let phase = record.phase;
        advance(record, RotationPhase::Failed);

        match error {
            WaitError::Timeout { attempts, last_state } => {
                tracing::error!(
                    kind = %record.credential_kind,
                    resource = %record.resource,
                    %phase,
                    attempts,
                    last_state = %last_state,
                    "Timed out waiting for resource after credential change"
                );
                RotationError::ProvisioningTimeout {
                    kind: record.credential_kind,
                    resource: record.resource.clone(),
                    phase,
                    attempts,
                    last_state,
                    attempted: record.new_value.clone(),
                    retention: timeout_retention,
                }
            }
            other => self.ambiguous(record, phase, other.to_string(), failure_retention).await,
        }
    }

    /// Re-describe the resource and report both candidate values
    async fn ambiguous(&self, record: &RotationRecord, phase: RotationPhase, reason: String, retention: Retention) -> RotationError {
        let kind = record.credential_kind;
        let observed = self
            .machine
            .client()
            .describe(kind.resource_kind(), &record.resource)
            .await
            .ok();

        tracing::error!(
            %kind,
            resource = %record.resource,
            %phase,
            %reason,
            observed = ?observed.as_ref().map(ResourceState::label),
            "Credential state is ambiguous; not retrying"
        );

        RotationError::AmbiguousState {
            kind,
            resource: record.resource.clone(),
            phase,
            reason,
            observed,
            previous: record.previous.clone(),
            attempted: record.new_value.clone(),
            previous_generation: record.generation.saturating_sub(1),
            attempted_generation: record.generation,
            retention,
        }
    }
}

fn advance(record: &mut RotationRecord, next: RotationPhase) {
    if let Err(e) = record.advance(next) {
        tracing::error!(error = %e, resource = %record.resource, "Rotation record out of sequence");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Call, ModifyScript, ScriptedCloud};
    use stackops_models::ResourceKind;
    use std::time::Duration;

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(Duration::ZERO, max_attempts)
    }

    fn cache_token(value: &str) -> Credential {
        Credential::new(CredentialKind::CacheAuthToken, "app-cache", SecretValue::new(value), 2)
    }

    fn db_password(value: &str) -> Credential {
        Credential::new(CredentialKind::DbPassword, "app-db", SecretValue::new(value), 7)
    }

    fn settles(cloud: &ScriptedCloud, kind: ResourceKind, name: &str) {
        cloud.script_describe(
            kind,
            name,
            vec![Ok(ResourceState::pending("modifying")), Ok(ResourceState::available(format!("{name}.internal")))],
        );
    }

    fn assert_only_known_values(accepted: &[String], old: &str, new: &str) {
        assert!(!accepted.is_empty());
        for value in accepted {
            assert!(value == old || value == new, "unexpected credential value accepted");
        }
    }

    #[test]
    fn test_generated_password_shape() {
        let policy = SecretPolicy::default();
        for _ in 0..50 {
            let secret = generate_secret(CredentialKind::DbPassword, &policy).unwrap();
            assert_eq!(secret.len(), 32);
            assert!(is_strong_password(secret.expose()));
            assert!(validate_secret(CredentialKind::DbPassword, &secret).is_ok());
            assert!(!secret.expose().contains(['/', '@', '"', ' ']));
        }
    }

    #[test]
    fn test_generated_token_is_lowercase_hex() {
        let secret = generate_secret(CredentialKind::CacheAuthToken, &SecretPolicy::default()).unwrap();
        assert_eq!(secret.len(), 64);
        assert!(secret.expose().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_out_of_range_length_is_generation_error() {
        let policy = SecretPolicy {
            db_password_length: 4,
            cache_token_length: 64,
        };
        let err = generate_secret(CredentialKind::DbPassword, &policy).unwrap_err();
        assert!(matches!(err, RotationError::Generation { kind: CredentialKind::DbPassword, .. }));
        assert!(policy.validate().is_err());
        assert!(SecretPolicy::default().validate().is_ok());
    }

    #[test]
    fn test_validate_secret_rejects_foreign_characters() {
        let err = validate_secret(CredentialKind::CacheAuthToken, &SecretValue::new("ABCDEF0123456789ZZ")).unwrap_err();
        assert!(err.contains("characters"));
        assert!(validate_secret(CredentialKind::DbPassword, &SecretValue::new("short")).is_err());
    }

    #[tokio::test]
    async fn test_db_password_rotation_is_set_only() {
        let cloud = ScriptedCloud::new();
        cloud.set_accepted(ResourceKind::Database, "app-db", &["old-password-1"]);
        settles(&cloud, ResourceKind::Database, "app-db");
        let rotator = SecretRotator::new(&cloud, fast(5), SecretPolicy::default());

        let outcome = rotator.rotate(&db_password("old-password-1")).await.unwrap();

        assert_eq!(outcome.record.phase, RotationPhase::Committed);
        assert!(!outcome.commit_pending());
        assert_eq!(outcome.credential().generation, 8);
        assert_eq!(outcome.endpoint, "app-db.internal");
        assert_eq!(
            cloud.accepted(ResourceKind::Database, "app-db"),
            vec![outcome.credential().value.expose().to_string()]
        );
        assert_eq!(cloud.modify_count(), 1);
        assert!(cloud
            .calls()
            .contains(&Call::Modify(ResourceKind::Database, "app-db".to_string(), CredentialStrategy::SetOnly)));
    }

    #[tokio::test]
    async fn test_cache_rotation_stops_at_dual_active_by_default() {
        let cloud = ScriptedCloud::new();
        cloud.set_accepted(ResourceKind::CacheCluster, "app-cache", &["old-token"]);
        settles(&cloud, ResourceKind::CacheCluster, "app-cache");
        let rotator = SecretRotator::new(&cloud, fast(5), SecretPolicy::default());

        let outcome = rotator.rotate(&cache_token("old-token")).await.unwrap();

        assert!(outcome.commit_pending());
        assert_eq!(outcome.record.previous.as_ref().map(|p| p.expose()), Some("old-token"));
        let new = outcome.credential().value.expose().to_string();
        assert_eq!(cloud.accepted(ResourceKind::CacheCluster, "app-cache"), vec!["old-token".to_string(), new]);
        assert_eq!(
            cloud.calls().iter().filter(|c| matches!(c, Call::Modify(..))).collect::<Vec<_>>(),
            vec![&Call::Modify(ResourceKind::CacheCluster, "app-cache".to_string(), CredentialStrategy::DualAccept)]
        );
    }

    #[tokio::test]
    async fn test_cache_rotation_with_immediate_commit() {
        let cloud = ScriptedCloud::new();
        cloud.set_accepted(ResourceKind::CacheCluster, "app-cache", &["old-token"]);
        settles(&cloud, ResourceKind::CacheCluster, "app-cache");
        let rotator =
            SecretRotator::new(&cloud, fast(5), SecretPolicy::default()).with_commit_mode(CommitMode::Immediate);

        let outcome = rotator.rotate(&cache_token("old-token")).await.unwrap();

        assert_eq!(outcome.record.phase, RotationPhase::Committed);
        assert!(outcome.record.previous.is_none());
        assert_eq!(
            cloud.accepted(ResourceKind::CacheCluster, "app-cache"),
            vec![outcome.credential().value.expose().to_string()]
        );
        assert_eq!(cloud.modify_count(), 2);
    }

    #[tokio::test]
    async fn test_dual_accept_then_wait_timeout_keeps_old_token() {
        let cloud = ScriptedCloud::new();
        cloud.set_accepted(ResourceKind::CacheCluster, "app-cache", &["old-token"]);
        cloud.script_describe(ResourceKind::CacheCluster, "app-cache", vec![Ok(ResourceState::pending("modifying"))]);
        let rotator =
            SecretRotator::new(&cloud, fast(3), SecretPolicy::default()).with_commit_mode(CommitMode::Immediate);

        let err = rotator.rotate(&cache_token("old-token")).await.unwrap_err();

        match &err {
            RotationError::ProvisioningTimeout { phase, attempts, .. } => {
                assert_eq!(*phase, RotationPhase::DualActive);
                assert_eq!(*attempts, 3);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        // Commit never reached, old token still valid: nothing to persist
        assert!(err.retained().is_none());
        assert_eq!(cloud.modify_count(), 1);
        let accepted = cloud.accepted(ResourceKind::CacheCluster, "app-cache");
        assert!(accepted.contains(&"old-token".to_string()));
    }

    #[tokio::test]
    async fn test_failure_between_dual_active_and_commit_never_strands_resource() {
        let cloud = ScriptedCloud::new();
        cloud.set_accepted(ResourceKind::CacheCluster, "app-cache", &["old-token"]);
        settles(&cloud, ResourceKind::CacheCluster, "app-cache");
        cloud.on_modify(
            ResourceKind::CacheCluster,
            "app-cache",
            vec![
                ModifyScript::Ok,
                ModifyScript::FailAfterApply(CloudError::Provider("connection reset".to_string())),
            ],
        );
        let rotator =
            SecretRotator::new(&cloud, fast(5), SecretPolicy::default()).with_commit_mode(CommitMode::Immediate);

        let err = rotator.rotate(&cache_token("old-token")).await.unwrap_err();

        let (attempted, retention) = match &err {
            RotationError::AmbiguousState {
                phase,
                observed,
                previous,
                attempted,
                previous_generation,
                attempted_generation,
                ..
            } => {
                assert_eq!(*phase, RotationPhase::DualActive);
                assert!(observed.is_some());
                assert_eq!(previous.as_ref().map(|p| p.expose()), Some("old-token"));
                assert_eq!((*previous_generation, *attempted_generation), (2, 3));
                (attempted.expose().to_string(), err.retained().map(|(_, r)| r))
            }
            other => panic!("expected ambiguous state, got {other:?}"),
        };
        assert_eq!(retention, Some(Retention::Persist));
        assert_only_known_values(&cloud.accepted(ResourceKind::CacheCluster, "app-cache"), "old-token", &attempted);
        // Not retried with another value
        assert_eq!(cloud.modify_count(), 2);
    }

    #[tokio::test]
    async fn test_rejected_password_leaves_old_value() {
        let cloud = ScriptedCloud::new();
        cloud.set_accepted(ResourceKind::Database, "app-db", &["old-password-1"]);
        cloud.on_modify(
            ResourceKind::Database,
            "app-db",
            vec![ModifyScript::Fail(CloudError::Rejected("InvalidParameterValue".to_string()))],
        );
        let rotator = SecretRotator::new(&cloud, fast(5), SecretPolicy::default());

        let err = rotator.rotate(&db_password("old-password-1")).await.unwrap_err();

        assert!(matches!(err, RotationError::ProviderRejected { .. }));
        assert!(err.retained().is_none());
        assert_eq!(cloud.accepted(ResourceKind::Database, "app-db"), vec!["old-password-1".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_password_modify_is_ambiguous_and_kept_pending() {
        let cloud = ScriptedCloud::new();
        cloud.set_accepted(ResourceKind::Database, "app-db", &["old-password-1"]);
        cloud.script_describe(
            ResourceKind::Database,
            "app-db",
            vec![Ok(ResourceState::pending("resetting-master-credentials"))],
        );
        cloud.on_modify(
            ResourceKind::Database,
            "app-db",
            vec![ModifyScript::FailAfterApply(CloudError::Provider("read timeout".to_string()))],
        );
        let rotator = SecretRotator::new(&cloud, fast(5), SecretPolicy::default());

        let err = rotator.rotate(&db_password("old-password-1")).await.unwrap_err();

        assert!(err.is_ambiguous());
        let (attempted, retention) = err.retained().unwrap();
        assert_eq!(retention, Retention::PersistPending);
        assert_only_known_values(
            &cloud.accepted(ResourceKind::Database, "app-db"),
            "old-password-1",
            attempted.expose(),
        );
        assert_eq!(cloud.describe_count(ResourceKind::Database, "app-db"), 1);
    }

    #[tokio::test]
    async fn test_password_timeout_after_modify_must_persist() {
        let cloud = ScriptedCloud::new();
        cloud.script_describe(ResourceKind::Database, "app-db", vec![Ok(ResourceState::pending("modifying"))]);
        let rotator = SecretRotator::new(&cloud, fast(2), SecretPolicy::default());

        let err = rotator.rotate(&db_password("old-password-1")).await.unwrap_err();

        assert!(matches!(err, RotationError::ProvisioningTimeout { phase: RotationPhase::Started, .. }));
        assert_eq!(err.retained().map(|(_, r)| r), Some(Retention::Persist));
    }

    #[tokio::test]
    async fn test_commit_retires_old_token() {
        let cloud = ScriptedCloud::new();
        cloud.set_accepted(ResourceKind::CacheCluster, "app-cache", &["old-token", "new-token"]);
        settles(&cloud, ResourceKind::CacheCluster, "app-cache");
        let rotator = SecretRotator::new(&cloud, fast(5), SecretPolicy::default());

        let outcome = rotator.commit(&cache_token("new-token")).await.unwrap();

        assert_eq!(outcome.record.phase, RotationPhase::Committed);
        assert_eq!(outcome.credential().generation, 2);
        assert_eq!(cloud.accepted(ResourceKind::CacheCluster, "app-cache"), vec!["new-token".to_string()]);
    }

    #[tokio::test]
    async fn test_commit_of_password_is_rejected_locally() {
        let cloud = ScriptedCloud::new();
        let rotator = SecretRotator::new(&cloud, fast(5), SecretPolicy::default());

        let err = rotator.commit(&db_password("pw-123456")).await.unwrap_err();
        assert!(matches!(err, RotationError::ProviderRejected { .. }));
        assert!(cloud.calls().is_empty());
    }
}

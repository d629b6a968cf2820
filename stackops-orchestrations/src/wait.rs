//! Check-then-create idempotency and bounded polling for a single resource
//!
//! This is the one polling primitive in the crate. Provisioning uses
//! [`ResourceStateMachine::ensure_available`]; credential rotation reuses
//! [`ResourceStateMachine::wait_until_available`] after each modification.

use crate::cloud_client::{CloudClient, CloudError, CreateOutcome};
use crate::error::ProvisionError;
use serde::{Deserialize, Serialize};
use stackops_models::{ResourceKind, ResourceSpec, ResourceState};
use std::collections::BTreeMap;
use std::time::Duration;

/// Fixed-interval, bounded polling policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(30);
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 40;

    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self { interval, max_attempts }
    }

    /// Upper bound on the time spent sleeping in one wait
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_INTERVAL, Self::DEFAULT_MAX_ATTEMPTS)
    }
}

/// How `ensure_available` got to `Available`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsureOutcome {
    /// Available on the first look, no calls besides `describe`
    AlreadyAvailable,
    /// Existed but was still pending; waited for it
    Awaited,
    /// Created by this call (or concurrently by someone else)
    Created,
    /// Existed, but the provider had to finish settings a create sets up
    Converged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ensured {
    pub endpoint: String,
    pub metadata: BTreeMap<String, String>,
    pub outcome: EnsureOutcome,
}

/// Why a wait ended without reaching `Available`
#[derive(Debug, Clone, PartialEq)]
pub enum WaitError {
    Timeout { attempts: u32, last_state: ResourceState },
    Failed { reason: String },
    /// `Absent` while waiting
    Vanished,
    Provider(CloudError),
}

impl WaitError {
    pub fn into_provision_error(self, kind: ResourceKind, name: &str) -> ProvisionError {
        let name = name.to_string();
        match self {
            WaitError::Timeout { attempts, last_state } => ProvisionError::ProvisioningTimeout {
                kind,
                name,
                attempts,
                last_state,
            },
            WaitError::Failed { reason } => ProvisionError::ResourceFailed { kind, name, reason },
            WaitError::Vanished => ProvisionError::UnexpectedState {
                kind,
                name,
                state: ResourceState::Absent,
            },
            WaitError::Provider(source) => ProvisionError::Provider { kind, name, source },
        }
    }
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::Timeout { attempts, last_state } => {
                write!(f, "still {} after {} polls", last_state, attempts)
            }
            WaitError::Failed { reason } => write!(f, "resource failed: {}", reason),
            WaitError::Vanished => f.write_str("resource disappeared"),
            WaitError::Provider(e) => write!(f, "{}", e),
        }
    }
}

/// Drives one resource through `Absent -> Creating -> Available`.
///
/// Holds no state between calls: every decision is made from a fresh
/// `describe`.
pub struct ResourceStateMachine<'a, C: CloudClient + ?Sized> {
    client: &'a C,
    policy: PollPolicy,
}

impl<'a, C: CloudClient + ?Sized> ResourceStateMachine<'a, C> {
    pub fn new(client: &'a C, policy: PollPolicy) -> Self {
        Self { client, policy }
    }

    pub fn client(&self) -> &'a C {
        self.client
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Make sure `spec` exists and is available, creating it if absent.
    ///
    /// Calling this on an already-available, fully configured resource issues
    /// exactly one `describe` and nothing else. Transient errors on the first
    /// look draw on the same `max_attempts` budget as the polls after it.
    pub async fn ensure_available(&self, spec: &ResourceSpec) -> Result<Ensured, ProvisionError> {
        let kind = spec.kind;
        let name = spec.name.as_str();

        let (current, used) = self
            .observe(kind, name)
            .await
            .map_err(|e| e.into_provision_error(kind, name))?;

        let (outcome, last_state) = match current {
            ResourceState::Available { endpoint, metadata } => {
                let converged = self.converge(spec, &endpoint, &metadata).await?;
                if converged {
                    tracing::info!(%kind, resource = name, %endpoint, "Available, missing settings applied");
                } else {
                    tracing::info!(%kind, resource = name, %endpoint, "Already available, nothing to do");
                }
                return Ok(Ensured {
                    endpoint,
                    metadata,
                    outcome: if converged {
                        EnsureOutcome::Converged
                    } else {
                        EnsureOutcome::AlreadyAvailable
                    },
                });
            }
            ResourceState::Failed { reason } => {
                tracing::error!(%kind, resource = name, %reason, "Resource is in a failed state");
                return Err(ProvisionError::ResourceFailed {
                    kind,
                    name: name.to_string(),
                    reason,
                });
            }
            ResourceState::Absent if kind.is_discover_only() => {
                tracing::error!(%kind, resource = name, "Resource not found and cannot be created");
                return Err(ProvisionError::NotFound {
                    kind,
                    name: name.to_string(),
                });
            }
            ResourceState::Absent => {
                tracing::info!(%kind, resource = name, "Resource absent, creating");
                self.create(spec).await?;
                (EnsureOutcome::Created, ResourceState::pending("creating"))
            }
            pending @ ResourceState::Pending { .. } => {
                tracing::info!(%kind, resource = name, state = %pending, "Resource exists but is not ready yet");
                (EnsureOutcome::Awaited, pending)
            }
        };

        match self.poll(kind, name, last_state, used).await {
            Ok((endpoint, metadata)) => Ok(Ensured {
                endpoint,
                metadata,
                outcome,
            }),
            Err(e) => {
                tracing::error!(%kind, resource = name, error = %e, "Resource did not become available");
                Err(e.into_provision_error(kind, name))
            }
        }
    }

    /// Wait for an existing resource to settle back to `Available`, e.g. after
    /// a credential modification. Always polls at least once.
    pub async fn wait_until_available(
        &self,
        kind: ResourceKind,
        name: &str,
    ) -> Result<(String, BTreeMap<String, String>), WaitError> {
        self.poll(kind, name, ResourceState::pending("modifying"), 0).await
    }

    /// Current state, waiting first if the resource is mid-transition.
    /// `Absent` and `Failed` are returned as-is.
    pub async fn settled_state(&self, kind: ResourceKind, name: &str) -> Result<ResourceState, WaitError> {
        match self.observe(kind, name).await? {
            (pending @ ResourceState::Pending { .. }, used) => {
                let (endpoint, metadata) = self.poll(kind, name, pending, used).await?;
                Ok(ResourceState::Available { endpoint, metadata })
            }
            (other, _) => Ok(other),
        }
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<(), ProvisionError> {
        let kind = spec.kind;
        let name = spec.name.clone();
        match self.client.create(spec).await {
            Ok(CreateOutcome::Created) => {
                tracing::info!(%kind, resource = %name, "Create request accepted");
                Ok(())
            }
            Ok(CreateOutcome::AlreadyExists) | Err(CloudError::AlreadyExists { .. }) => {
                tracing::info!(%kind, resource = %name, "Resource was created concurrently, continuing");
                Ok(())
            }
            Err(CloudError::Rejected(message)) | Err(CloudError::Unsupported(message)) => {
                tracing::error!(%kind, resource = %name, %message, "Provider rejected create");
                Err(ProvisionError::ProviderRejected { kind, name, message })
            }
            Err(source) => {
                tracing::error!(%kind, resource = %name, error = %source, "Create failed");
                Err(ProvisionError::Provider { kind, name, source })
            }
        }
    }

    async fn converge(
        &self,
        spec: &ResourceSpec,
        endpoint: &str,
        metadata: &BTreeMap<String, String>,
    ) -> Result<bool, ProvisionError> {
        let kind = spec.kind;
        let name = spec.name.clone();
        match self.client.converge(spec, endpoint, metadata).await {
            Ok(changed) => Ok(changed),
            Err(CloudError::Rejected(message)) | Err(CloudError::Unsupported(message)) => {
                tracing::error!(%kind, resource = %name, %message, "Provider rejected update of existing resource");
                Err(ProvisionError::ProviderRejected { kind, name, message })
            }
            Err(source) => {
                tracing::error!(%kind, resource = %name, error = %source, "Update of existing resource failed");
                Err(ProvisionError::Provider { kind, name, source })
            }
        }
    }

    /// One `describe`, retrying transient errors. Returns the state and the
    /// number of retries, which the following `poll` must not spend again.
    async fn observe(&self, kind: ResourceKind, name: &str) -> Result<(ResourceState, u32), WaitError> {
        let mut retries = 0;
        loop {
            match self.client.describe(kind, name).await {
                Ok(state) => return Ok((state, retries)),
                Err(e) if e.is_transient() && retries < self.policy.max_attempts => {
                    retries += 1;
                    tracing::warn!(%kind, resource = name, error = %e, retry = retries, "Transient error on describe, retrying");
                    tokio::time::sleep(self.policy.interval).await;
                }
                Err(e) => return Err(WaitError::Provider(e)),
            }
        }
    }

    /// Sleep-then-describe until `max_attempts` describes have been spent,
    /// counting the `used` ones made before
    async fn poll(
        &self,
        kind: ResourceKind,
        name: &str,
        mut last_state: ResourceState,
        used: u32,
    ) -> Result<(String, BTreeMap<String, String>), WaitError> {
        let max_attempts = self.policy.max_attempts;

        for attempt in used.saturating_add(1)..=max_attempts {
            tokio::time::sleep(self.policy.interval).await;

            match self.client.describe(kind, name).await {
                Ok(ResourceState::Available { endpoint, metadata }) => {
                    tracing::info!(%kind, resource = name, %endpoint, attempt, "Resource available");
                    return Ok((endpoint, metadata));
                }
                Ok(state @ ResourceState::Pending { .. }) => {
                    tracing::debug!(
                        %kind, resource = name, state = %state, attempt, max_attempts,
                        "Not ready yet, waiting {:?}", self.policy.interval
                    );
                    last_state = state;
                }
                Ok(ResourceState::Failed { reason }) => return Err(WaitError::Failed { reason }),
                Ok(ResourceState::Absent) => return Err(WaitError::Vanished),
                Err(e) if e.is_transient() => {
                    tracing::warn!(%kind, resource = name, error = %e, attempt, max_attempts, "Transient error while polling");
                }
                Err(e) => return Err(WaitError::Provider(e)),
            }
        }

        Err(WaitError::Timeout {
            attempts: max_attempts,
            last_state,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Call, ScriptedCloud};

    fn fast(max_attempts: u32) -> PollPolicy {
        PollPolicy::new(Duration::ZERO, max_attempts)
    }

    #[test]
    fn test_default_policy_is_twenty_minutes() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(30));
        assert_eq!(policy.max_attempts, 40);
        assert_eq!(policy.budget(), Duration::from_secs(20 * 60));
    }

    #[tokio::test]
    async fn test_second_ensure_on_available_resource_is_a_noop() {
        let cloud = ScriptedCloud::new();
        cloud.script_describe(
            ResourceKind::Database,
            "app-db",
            vec![
                Ok(ResourceState::Absent),
                Ok(ResourceState::pending("creating")),
                Ok(ResourceState::available("app-db.abc.rds.amazonaws.com")),
            ],
        );
        let machine = ResourceStateMachine::new(&cloud, fast(5));
        let spec = ResourceSpec::new(ResourceKind::Database, "app-db");

        let first = machine.ensure_available(&spec).await.unwrap();
        assert_eq!(first.outcome, EnsureOutcome::Created);
        let calls_after_first = cloud.calls().len();

        let second = machine.ensure_available(&spec).await.unwrap();
        assert_eq!(second.outcome, EnsureOutcome::AlreadyAvailable);
        assert_eq!(second.endpoint, "app-db.abc.rds.amazonaws.com");

        let calls = cloud.calls();
        let new_calls = &calls[calls_after_first..];
        assert_eq!(new_calls, &[Call::Describe(ResourceKind::Database, "app-db".to_string())]);
        assert_eq!(cloud.create_count(), 1);
        assert_eq!(cloud.modify_count(), 0);
    }

    #[tokio::test]
    async fn test_pending_forever_times_out_after_exactly_max_attempts() {
        let cloud = ScriptedCloud::new();
        cloud.script_describe(ResourceKind::CacheCluster, "app-cache", vec![Ok(ResourceState::pending("creating"))]);
        let machine = ResourceStateMachine::new(&cloud, fast(7));
        let spec = ResourceSpec::new(ResourceKind::CacheCluster, "app-cache");

        let err = machine.ensure_available(&spec).await.unwrap_err();
        match err {
            ProvisionError::ProvisioningTimeout { attempts, last_state, .. } => {
                assert_eq!(attempts, 7);
                assert!(matches!(last_state, ResourceState::Pending { .. }));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        // One initial look plus exactly max_attempts polls
        assert_eq!(cloud.describe_count(ResourceKind::CacheCluster, "app-cache"), 1 + 7);
        assert_eq!(cloud.create_count(), 0);
    }

    #[tokio::test]
    async fn test_already_exists_on_create_is_success() {
        let cloud = ScriptedCloud::new();
        cloud.script_describe(
            ResourceKind::SecurityGroup,
            "app-db-sg",
            vec![Ok(ResourceState::Absent), Ok(ResourceState::available("sg-123"))],
        );
        cloud.on_create(
            ResourceKind::SecurityGroup,
            "app-db-sg",
            Err(CloudError::AlreadyExists {
                kind: ResourceKind::SecurityGroup,
                name: "app-db-sg".to_string(),
            }),
        );
        let machine = ResourceStateMachine::new(&cloud, fast(3));

        let ensured = machine
            .ensure_available(&ResourceSpec::new(ResourceKind::SecurityGroup, "app-db-sg"))
            .await
            .unwrap();
        assert_eq!(ensured.endpoint, "sg-123");
        assert_eq!(ensured.outcome, EnsureOutcome::Created);
    }

    #[tokio::test]
    async fn test_failed_state_while_polling_is_hard_failure() {
        let cloud = ScriptedCloud::new();
        cloud.script_describe(
            ResourceKind::CacheCluster,
            "app-cache",
            vec![
                Ok(ResourceState::Absent),
                Ok(ResourceState::pending("creating")),
                Ok(ResourceState::Failed {
                    reason: "create-failed".to_string(),
                }),
            ],
        );
        let machine = ResourceStateMachine::new(&cloud, fast(10));

        let err = machine
            .ensure_available(&ResourceSpec::new(ResourceKind::CacheCluster, "app-cache"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ResourceFailed { ref reason, .. } if reason == "create-failed"));
        assert_eq!(cloud.describe_count(ResourceKind::CacheCluster, "app-cache"), 3);
    }

    #[tokio::test]
    async fn test_transient_errors_count_as_polls() {
        let cloud = ScriptedCloud::new();
        cloud.script_describe(
            ResourceKind::Database,
            "app-db",
            vec![
                Ok(ResourceState::pending("backing-up")),
                Err(CloudError::Transient("Throttling".to_string())),
                Err(CloudError::Transient("Throttling".to_string())),
                Ok(ResourceState::available("app-db.internal")),
            ],
        );
        let machine = ResourceStateMachine::new(&cloud, fast(3));

        let ensured = machine
            .ensure_available(&ResourceSpec::new(ResourceKind::Database, "app-db"))
            .await
            .unwrap();
        assert_eq!(ensured.outcome, EnsureOutcome::Awaited);
        assert_eq!(cloud.create_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_errors_on_first_look_share_the_poll_budget() {
        let cloud = ScriptedCloud::new();
        cloud.script_describe(
            ResourceKind::Database,
            "app-db",
            vec![
                Err(CloudError::Transient("Throttling".to_string())),
                Err(CloudError::Transient("Throttling".to_string())),
                Ok(ResourceState::pending("creating")),
            ],
        );
        let machine = ResourceStateMachine::new(&cloud, fast(3));

        let err = machine
            .ensure_available(&ResourceSpec::new(ResourceKind::Database, "app-db"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ProvisioningTimeout { attempts: 3, .. }));
        // Never more than one look plus max_attempts describes
        assert_eq!(cloud.describe_count(ResourceKind::Database, "app-db"), 1 + 3);
    }

    #[tokio::test]
    async fn test_absent_network_is_not_found() {
        let cloud = ScriptedCloud::new();
        let machine = ResourceStateMachine::new(&cloud, fast(3));

        let err = machine
            .ensure_available(&ResourceSpec::new(ResourceKind::Network, "vpc-missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::NotFound { kind: ResourceKind::Network, .. }));
        assert_eq!(cloud.create_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_create_is_not_polled() {
        let cloud = ScriptedCloud::new();
        cloud.on_create(
            ResourceKind::Database,
            "app-db",
            Err(CloudError::Rejected("InvalidParameterValue: bad class".to_string())),
        );
        let machine = ResourceStateMachine::new(&cloud, fast(3));

        let err = machine
            .ensure_available(&ResourceSpec::new(ResourceKind::Database, "app-db"))
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::ProviderRejected { .. }));
        assert_eq!(cloud.describe_count(ResourceKind::Database, "app-db"), 1);
    }

    #[tokio::test]
    async fn test_wait_until_available_always_polls() {
        let cloud = ScriptedCloud::new();
        cloud.script_describe(
            ResourceKind::Database,
            "app-db",
            vec![
                Ok(ResourceState::pending("resetting-master-credentials")),
                Ok(ResourceState::available("app-db.internal")),
            ],
        );
        let machine = ResourceStateMachine::new(&cloud, fast(4));

        let (endpoint, _) = machine.wait_until_available(ResourceKind::Database, "app-db").await.unwrap();
        assert_eq!(endpoint, "app-db.internal");
        assert_eq!(cloud.describe_count(ResourceKind::Database, "app-db"), 2);
    }

    #[tokio::test]
    async fn test_zero_attempts_times_out_without_polling() {
        let cloud = ScriptedCloud::new();
        let machine = ResourceStateMachine::new(&cloud, fast(0));

        let err = machine.wait_until_available(ResourceKind::Database, "app-db").await.unwrap_err();
        assert!(matches!(err, WaitError::Timeout { attempts: 0, .. }));
        assert!(cloud.calls().is_empty());
    }
}

//! In-memory `CloudClient` for unit tests

use crate::cloud_client::{CloudClient, CloudError, CreateOutcome, CredentialStrategy};
use crate::environment::Environment;
use async_trait::async_trait;
use stackops_models::{ResourceKind, ResourceSpec, ResourceState, SecretValue};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

type Key = (ResourceKind, String);

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Describe(ResourceKind, String),
    Create(ResourceKind, String),
    Modify(ResourceKind, String, CredentialStrategy),
}

/// Scripted result of a `modify_credential` call
#[derive(Debug, Clone)]
pub enum ModifyScript {
    Ok,
    Fail(CloudError),
    /// The provider applied the change, then the call still failed
    FailAfterApply(CloudError),
}

#[derive(Default)]
struct Inner {
    describe: HashMap<Key, VecDeque<Result<ResourceState, CloudError>>>,
    create: HashMap<Key, VecDeque<Result<CreateOutcome, CloudError>>>,
    modify: HashMap<Key, VecDeque<ModifyScript>>,
    accepted: HashMap<Key, Vec<String>>,
    specs: Vec<ResourceSpec>,
    calls: Vec<Call>,
}

/// Serves scripted `describe` sequences (the last entry repeats), records every
/// call, and tracks which credential values each resource accepts.
#[derive(Default)]
pub struct ScriptedCloud {
    inner: Mutex<Inner>,
}

impl ScriptedCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_describe(&self, kind: ResourceKind, name: &str, states: Vec<Result<ResourceState, CloudError>>) {
        let mut inner = self.inner.lock().unwrap();
        inner.describe.insert((kind, name.to_string()), states.into());
    }

    pub fn on_create(&self, kind: ResourceKind, name: &str, result: Result<CreateOutcome, CloudError>) {
        let mut inner = self.inner.lock().unwrap();
        inner.create.entry((kind, name.to_string())).or_default().push_back(result);
    }

    pub fn on_modify(&self, kind: ResourceKind, name: &str, results: Vec<ModifyScript>) {
        let mut inner = self.inner.lock().unwrap();
        inner.modify.insert((kind, name.to_string()), results.into());
    }

    pub fn set_accepted(&self, kind: ResourceKind, name: &str, values: &[&str]) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .accepted
            .insert((kind, name.to_string()), values.iter().map(|v| v.to_string()).collect());
    }

    pub fn accepted(&self, kind: ResourceKind, name: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.accepted.get(&(kind, name.to_string())).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn created_specs(&self) -> Vec<ResourceSpec> {
        self.inner.lock().unwrap().specs.clone()
    }

    pub fn describe_count(&self, kind: ResourceKind, name: &str) -> usize {
        self.count(|c| matches!(c, Call::Describe(k, n) if *k == kind && n == name))
    }

    pub fn create_count(&self) -> usize {
        self.count(|c| matches!(c, Call::Create(..)))
    }

    pub fn modify_count(&self) -> usize {
        self.count(|c| matches!(c, Call::Modify(..)))
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.inner.lock().unwrap().calls.iter().filter(|c| pred(c)).count()
    }

    fn apply_modify(inner: &mut Inner, key: &Key, value: &str, strategy: CredentialStrategy) {
        let accepted = inner.accepted.entry(key.clone()).or_default();
        match strategy {
            CredentialStrategy::DualAccept => {
                // Providers keep at most the current value plus the new one.
                if let Some(current) = accepted.last().cloned() {
                    *accepted = vec![current];
                }
                accepted.push(value.to_string());
            }
            CredentialStrategy::SetOnly => *accepted = vec![value.to_string()],
        }
    }
}

#[async_trait]
impl CloudClient for ScriptedCloud {
    async fn describe(&self, kind: ResourceKind, name: &str) -> Result<ResourceState, CloudError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Describe(kind, name.to_string()));
        match inner.describe.get_mut(&(kind, name.to_string())) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Ok(ResourceState::Absent)),
            Some(queue) => queue.front().cloned().unwrap_or(Ok(ResourceState::Absent)),
            None => Ok(ResourceState::Absent),
        }
    }

    async fn create(&self, spec: &ResourceSpec) -> Result<CreateOutcome, CloudError> {
        let mut inner = self.inner.lock().unwrap();
        inner.calls.push(Call::Create(spec.kind, spec.name.clone()));
        inner.specs.push(spec.clone());
        inner
            .create
            .get_mut(&(spec.kind, spec.name.clone()))
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Ok(CreateOutcome::Created))
    }

    async fn modify_credential(
        &self,
        kind: ResourceKind,
        name: &str,
        value: &SecretValue,
        strategy: CredentialStrategy,
    ) -> Result<(), CloudError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (kind, name.to_string());
        inner.calls.push(Call::Modify(kind, name.to_string(), strategy));
        let script = inner
            .modify
            .get_mut(&key)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(ModifyScript::Ok);
        match script {
            ModifyScript::Ok => {
                Self::apply_modify(&mut inner, &key, value.expose(), strategy);
                Ok(())
            }
            ModifyScript::Fail(e) => Err(e),
            ModifyScript::FailAfterApply(e) => {
                Self::apply_modify(&mut inner, &key, value.expose(), strategy);
                Err(e)
            }
        }
    }
}

/// Environment with a database and an auth-token cache, writing to `config_file`
pub fn test_environment(config_file: &Path) -> Environment {
    let yaml = format!(
        r#"
name: test
region: us-east-1
app_config_file: {}
polling:
  interval_secs: 0
  max_attempts: 5
database:
  identifier: app-db
  db_name: app
  master_username: app_admin
  security_group: app-db-sg
  subnet_group: app-db-subnets
cache:
  replication_group_id: app-cache
  security_group: app-cache-sg
  subnet_group: app-cache-subnets
"#,
        config_file.display()
    );
    let env = Environment::from_yaml(&yaml).unwrap();
    env.validate().unwrap();
    env
}

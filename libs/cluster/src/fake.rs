//! In-memory cluster used by tests.
//!
//! Behaves like a minimal API server: resource versions are assigned and
//! checked, creates of existing objects fail, status is dropped on create,
//! and merge patches follow RFC 7386. Tests can additionally:
//!
//! - inject errors per verb and resource ([`InMemoryCluster::fail`])
//! - keep deleted objects visible for a number of reads
//!   ([`InMemoryCluster::linger_deletes`])
//! - react to writes ([`InMemoryCluster::on_write`]), e.g. to simulate a
//!   node daemon rendering a secret to disk

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::DynamicObject;
use kube::core::TypeMeta;
use kube::discovery::ApiResource;
use serde_json::Value;

use crate::{ApiError, ClusterClient, ClusterReader, HubConnector, ObjectRef, Propagation};

/// API verbs that can have failures injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    List,
    Create,
    UpdateStatus,
    Patch,
    Delete,
}

type Key = (String, Option<String>, String);
type WriteHook = Arc<dyn Fn(&DynamicObject) + Send + Sync>;

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, DynamicObject>,
    next_version: u64,
    lingering: HashMap<Key, u32>,
    linger_policy: HashMap<String, u32>,
    failures: HashMap<(Verb, String), ApiError>,
    journal: Vec<String>,
}

impl State {
    fn bump(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }

    fn check_failure(&self, verb: Verb, resource: &ApiResource) -> Result<(), ApiError> {
        match self.failures.get(&(verb, resource_key(resource))) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    /// Read an object, retiring it if it was lingering after a delete.
    fn observe(&mut self, key: &Key) -> Option<DynamicObject> {
        if let Some(remaining) = self.lingering.get_mut(key) {
            if *remaining == 0 {
                self.lingering.remove(key);
                self.objects.remove(key);
                return None;
            }
            *remaining -= 1;
        }
        self.objects.get(key).cloned()
    }
}

fn resource_key(resource: &ApiResource) -> String {
    format!("{}/{}", resource.group, resource.plural)
}

fn key_of(obj: &ObjectRef) -> Key {
    (resource_key(&obj.resource), obj.namespace.clone(), obj.name.clone())
}

fn matches_selector(obj: &DynamicObject, selector: &str) -> bool {
    let labels = obj.metadata.labels.clone().unwrap_or_default();
    selector
        .split(',')
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once("==").or_else(|| term.split_once('=')) {
            Some((key, value)) => labels.get(key) == Some(&value.to_string()),
            None => labels.contains_key(term),
        })
}

fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                } else {
                    merge(target.entry(key.clone()).or_insert(Value::Null), value);
                }
            }
        }
        (target, patch) => {
            *target = patch.clone();
        }
    }
}

/// In-memory stand-in for the API server.
#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
    hooks: Mutex<Vec<WriteHook>>,
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_hooks(&self, obj: &DynamicObject) {
        let hooks = self.hooks.lock().unwrap_or_else(PoisonError::into_inner).clone();
        for hook in hooks {
            hook(obj);
        }
    }

    /// Seed an object, keeping its status. Returns the stored copy.
    pub fn insert(&self, resource: &ApiResource, obj: DynamicObject) -> DynamicObject {
        let mut state = self.state();
        let version = state.bump();
        let mut stored = obj;
        stored.metadata.resource_version = Some(version.to_string());
        stored.metadata.uid.get_or_insert_with(|| format!("uid-{version}"));
        stored.metadata.generation.get_or_insert(1);
        if stored.types.is_none() {
            stored.types = Some(TypeMeta {
                api_version: resource.api_version.clone(),
                kind: resource.kind.clone(),
            });
        }
        let key = (
            resource_key(resource),
            stored.metadata.namespace.clone(),
            stored.metadata.name.clone().unwrap_or_default(),
        );
        state.objects.insert(key, stored.clone());
        stored
    }

    /// Current copy of an object, without counting as a read.
    pub fn object(&self, obj: &ObjectRef) -> Option<DynamicObject> {
        self.state().objects.get(&key_of(obj)).cloned()
    }

    /// All stored objects of a resource.
    pub fn objects(&self, resource: &ApiResource) -> Vec<DynamicObject> {
        let key = resource_key(resource);
        self.state()
            .objects
            .iter()
            .filter(|((r, _, _), _)| *r == key)
            .map(|(_, obj)| obj.clone())
            .collect()
    }

    /// Keep deleted objects of `resource` visible for `reads` further reads.
    pub fn linger_deletes(&self, resource: &ApiResource, reads: u32) {
        self.state().linger_policy.insert(resource_key(resource), reads);
    }

    /// Fail every `verb` on `resource` with `err` until cleared.
    pub fn fail(&self, verb: Verb, resource: &ApiResource, err: ApiError) {
        self.state().failures.insert((verb, resource_key(resource)), err);
    }

    pub fn clear_failure(&self, verb: Verb, resource: &ApiResource) {
        self.state().failures.remove(&(verb, resource_key(resource)));
    }

    /// Register a callback run after every successful write.
    pub fn on_write(&self, hook: impl Fn(&DynamicObject) + Send + Sync + 'static) {
        self.hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    /// Writes performed so far, e.g. `"delete Secret ns/name"`.
    pub fn journal(&self) -> Vec<String> {
        self.state().journal.clone()
    }
}

#[async_trait]
impl ClusterReader for InMemoryCluster {
    async fn get(&self, obj: &ObjectRef) -> Result<DynamicObject, ApiError> {
        let mut state = self.state();
        state.check_failure(Verb::Get, &obj.resource)?;
        state
            .observe(&key_of(obj))
            .ok_or_else(|| ApiError::NotFound(obj.to_string()))
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<DynamicObject>, ApiError> {
        let mut state = self.state();
        state.check_failure(Verb::List, resource)?;

        let wanted = resource_key(resource);
        let keys: Vec<Key> = state
            .objects
            .keys()
            .filter(|(r, ns, _)| *r == wanted && namespace.is_none_or(|n| ns.as_deref() == Some(n)))
            .cloned()
            .collect();

        Ok(keys
            .iter()
            .filter_map(|key| state.observe(key))
            .filter(|obj| label_selector.is_none_or(|selector| matches_selector(obj, selector)))
            .collect())
    }
}

#[async_trait]
impl ClusterClient for InMemoryCluster {
    async fn create(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject, ApiError> {
        let stored = {
            let mut state = self.state();
            state.check_failure(Verb::Create, resource)?;

            let name = obj
                .metadata
                .name
                .clone()
                .ok_or_else(|| ApiError::Invalid("metadata.name is required".to_string()))?;
            let target = ObjectRef {
                resource: resource.clone(),
                namespace: obj.metadata.namespace.clone(),
                name,
            };
            if obj.metadata.resource_version.as_deref().is_some_and(|v| !v.is_empty()) {
                return Err(ApiError::Invalid(format!(
                    "{target}: resourceVersion should not be set on objects to be created"
                )));
            }
            let key = key_of(&target);
            if state.objects.contains_key(&key) {
                return Err(ApiError::AlreadyExists(target.to_string()));
            }

            let version = state.bump();
            let mut stored = obj.clone();
            stored.metadata.resource_version = Some(version.to_string());
            stored.metadata.uid = Some(format!("uid-{version}"));
            stored.metadata.generation = Some(1);
            if stored.types.is_none() {
                stored.types = Some(TypeMeta {
                    api_version: resource.api_version.clone(),
                    kind: resource.kind.clone(),
                });
            }
            if let Some(data) = stored.data.as_object_mut() {
                data.remove("status");
            }

            state.objects.insert(key, stored.clone());
            state.journal.push(format!("create {target}"));
            stored
        };
        self.run_hooks(&stored);
        Ok(stored)
    }

    async fn update_status(&self, resource: &ApiResource, obj: &DynamicObject) -> Result<DynamicObject, ApiError> {
        let target = ObjectRef::from_object(resource, obj);
        let stored = {
            let mut state = self.state();
            state.check_failure(Verb::UpdateStatus, resource)?;

            let key = key_of(&target);
            let version = state.next_version + 1;
            let existing = state
                .objects
                .get_mut(&key)
                .ok_or_else(|| ApiError::NotFound(target.to_string()))?;

            if let Some(requested) = obj.metadata.resource_version.as_deref() {
                if existing.metadata.resource_version.as_deref() != Some(requested) {
                    return Err(ApiError::Conflict(format!(
                        "{target}: the object has been modified; please apply your changes to the latest version"
                    )));
                }
            }

            if !existing.data.is_object() {
                existing.data = Value::Object(Default::default());
            }
            match obj.data.get("status") {
                Some(status) => existing.data["status"] = status.clone(),
                None => {
                    if let Some(data) = existing.data.as_object_mut() {
                        data.remove("status");
                    }
                }
            }
            existing.metadata.resource_version = Some(version.to_string());
            let stored = existing.clone();

            state.next_version = version;
            state.journal.push(format!("status {target}"));
            stored
        };
        self.run_hooks(&stored);
        Ok(stored)
    }

    async fn merge_patch(&self, obj: &ObjectRef, patch: &Value) -> Result<DynamicObject, ApiError> {
        let stored = {
            let mut state = self.state();
            state.check_failure(Verb::Patch, &obj.resource)?;

            let key = key_of(obj);
            let existing = state
                .objects
                .get(&key)
                .ok_or_else(|| ApiError::NotFound(obj.to_string()))?;

            if let Some(requested) = patch.pointer("/metadata/resourceVersion").and_then(Value::as_str) {
                if existing.metadata.resource_version.as_deref() != Some(requested) {
                    return Err(ApiError::Conflict(obj.to_string()));
                }
            }

            let mut value = serde_json::to_value(existing)?;
            merge(&mut value, patch);
            let mut updated: DynamicObject = serde_json::from_value(value)?;

            let version = state.bump();
            updated.metadata.resource_version = Some(version.to_string());
            state.objects.insert(key, updated.clone());
            state.journal.push(format!("patch {obj}"));
            updated
        };
        self.run_hooks(&stored);
        Ok(stored)
    }

    async fn delete(&self, obj: &ObjectRef, propagation: Propagation) -> Result<(), ApiError> {
        let mut state = self.state();
        state.check_failure(Verb::Delete, &obj.resource)?;

        let key = key_of(obj);
        if !state.objects.contains_key(&key) {
            return Err(ApiError::NotFound(obj.to_string()));
        }

        match state.linger_policy.get(&key.0).copied() {
            Some(reads) if !state.lingering.contains_key(&key) => {
                if let Some(existing) = state.objects.get_mut(&key) {
                    existing.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                }
                state.lingering.insert(key, reads);
            }
            Some(_) => {}
            None => {
                state.objects.remove(&key);
            }
        }

        let entry = match propagation {
            Propagation::Foreground => format!("delete {obj} (foreground)"),
            Propagation::Background => format!("delete {obj}"),
        };
        state.journal.push(entry);
        Ok(())
    }
}

/// Hub connector handing out a fixed in-memory hub.
pub struct MockHubConnector {
    hub: Option<Arc<InMemoryCluster>>,
    kubeconfigs: Mutex<Vec<Vec<u8>>>,
}

impl MockHubConnector {
    /// Connector that always returns `hub`.
    pub fn new(hub: Arc<InMemoryCluster>) -> Self {
        Self {
            hub: Some(hub),
            kubeconfigs: Mutex::new(Vec::new()),
        }
    }

    /// Connector whose hub can never be reached.
    pub fn unreachable() -> Self {
        Self {
            hub: None,
            kubeconfigs: Mutex::new(Vec::new()),
        }
    }

    /// Kubeconfigs passed to `connect` so far.
    pub fn kubeconfigs(&self) -> Vec<Vec<u8>> {
        self.kubeconfigs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl HubConnector for MockHubConnector {
    async fn connect(&self, kubeconfig: &[u8]) -> Result<Arc<dyn ClusterClient>, ApiError> {
        self.kubeconfigs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(kubeconfig.to_vec());
        match &self.hub {
            Some(hub) => Ok(hub.clone() as Arc<dyn ClusterClient>),
            None => Err(ApiError::Transient("hub unreachable".to_string())),
        }
    }
}

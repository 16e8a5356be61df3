//! An in-memory cluster for tests.
//!
//! Objects are keyed by namespace and name. Writes bump a per-object
//! `resourceVersion` and replacements carrying a stale version conflict, so
//! tests observe the same optimistic concurrency a real API server applies.

use crate::{
    cluster::{LogApi, NamespaceApi, ResourceApi, ScaleApi},
    k8s::{Deployment, Namespace, ObjectMeta, Pod, Resource, ResourceExt, Scale, ScaleSpec},
    Error, ResourceRef, Result,
};
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

#[derive(Clone, Debug, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

/// A successful mutation of the fake cluster.
#[derive(Clone, Debug, PartialEq)]
pub enum Write {
    Create(ResourceRef),
    Replace(ResourceRef),
    Patch(ResourceRef, Value),
    Delete(ResourceRef),
    Scale(ResourceRef, i32),
}

/// An object that can be seeded into a [`FakeCluster`].
pub trait FakeObject {
    fn insert_into(self, cluster: &FakeCluster);
}

#[derive(Debug, Default)]
struct State {
    namespaces: BTreeSet<String>,
    pods: Objects<Pod>,
    deployments: Objects<Deployment>,
    logs: BTreeMap<(String, String, String), String>,
    writes: Vec<Write>,
    max_replicas: Option<i32>,
    unavailable: bool,
}

#[derive(Debug)]
struct Objects<K>(BTreeMap<(String, String), K>);

/// Builds a Pod created `created_secs` seconds after the start of 2024.
pub fn pod(namespace: &str, name: &str, created_secs: u32) -> Pod {
    serde_json::from_value(serde_json::json!({
        "metadata": {
            "name": name,
            "namespace": namespace,
            "creationTimestamp": timestamp(created_secs),
        },
    }))
    .expect("pod must deserialize")
}

/// Builds a Deployment with a single container named after it, created
/// `created_secs` seconds after the start of 2024.
pub fn deployment(namespace: &str, name: &str, created_secs: u32) -> Deployment {
    serde_json::from_value(serde_json::json!({
        "metadata": {
            "name": name,
            "namespace": namespace,
            "creationTimestamp": timestamp(created_secs),
        },
        "spec": {
            "replicas": 1,
            "selector": { "matchLabels": { "app": name } },
            "template": {
                "metadata": { "labels": { "app": name } },
                "spec": { "containers": [{ "name": name, "image": "nginx" }] },
            },
        },
    }))
    .expect("deployment must deserialize")
}

fn timestamp(created_secs: u32) -> String {
    const START_OF_2024: i64 = 1_704_067_200;
    chrono::DateTime::from_timestamp(START_OF_2024 + i64::from(created_secs), 0)
        .expect("timestamp must be in range")
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

// === impl FakeCluster ===

impl FakeCluster {
    /// Caps the replica count the cluster accepts on scale.
    pub fn with_max_replicas(self, max: i32) -> Self {
        self.state.lock().max_replicas = Some(max);
        self
    }

    pub fn insert(&self, object: impl FakeObject) {
        object.insert_into(self);
    }

    pub fn add_namespace(&self, namespace: impl Into<String>) {
        self.state.lock().namespaces.insert(namespace.into());
    }

    pub fn set_logs(&self, namespace: &str, pod: &str, container: &str, logs: impl Into<String>) {
        let key = (namespace.to_string(), pod.to_string(), container.to_string());
        self.state.lock().logs.insert(key, logs.into());
    }

    /// Fails every subsequent request while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn writes(&self) -> Vec<Write> {
        self.state.lock().writes.clone()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let mut state = self.state.lock();
        if state.unavailable {
            return Err(Error::unavailable("cluster is unavailable"));
        }
        f(&mut state)
    }
}

impl FakeObject for Pod {
    fn insert_into(self, cluster: &FakeCluster) {
        let mut state = cluster.state.lock();
        state.namespaces.insert(self.namespace().unwrap_or_default());
        state.pods.seed(self);
    }
}

impl FakeObject for Deployment {
    fn insert_into(self, cluster: &FakeCluster) {
        let mut state = cluster.state.lock();
        state.namespaces.insert(self.namespace().unwrap_or_default());
        state.deployments.seed(self);
    }
}

macro_rules! impl_resource_api {
    ($kind:ty, $field:ident) => {
        #[async_trait::async_trait]
        impl ResourceApi<$kind> for FakeCluster {
            async fn list(&self, namespace: &str) -> Result<Vec<$kind>> {
                self.with_state(|s| Ok(s.$field.list(namespace)))
            }

            async fn get(&self, namespace: &str, name: &str) -> Result<$kind> {
                self.with_state(|s| s.$field.get(namespace, name).cloned())
            }

            async fn create(&self, namespace: &str, resource: &$kind) -> Result<$kind> {
                self.with_state(|s| {
                    let created = s.$field.create(namespace, resource.clone())?;
                    s.writes.push(Write::Create(s.$field.reference(namespace, &created.name_any())));
                    Ok(created)
                })
            }

            async fn replace(&self, namespace: &str, name: &str, resource: &$kind) -> Result<$kind> {
                self.with_state(|s| {
                    let replaced = s.$field.replace(namespace, name, resource.clone())?;
                    s.writes.push(Write::Replace(s.$field.reference(namespace, name)));
                    Ok(replaced)
                })
            }

            async fn patch(&self, namespace: &str, name: &str, patch: &Value) -> Result<$kind> {
                self.with_state(|s| {
                    let patched = s.$field.patch(namespace, name, patch)?;
                    s.writes
                        .push(Write::Patch(s.$field.reference(namespace, name), patch.clone()));
                    Ok(patched)
                })
            }

            async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
                self.with_state(|s| {
                    s.$field.delete(namespace, name)?;
                    s.writes.push(Write::Delete(s.$field.reference(namespace, name)));
                    Ok(())
                })
            }
        }
    };
}

impl_resource_api!(Pod, pods);
impl_resource_api!(Deployment, deployments);

#[async_trait::async_trait]
impl ScaleApi for FakeCluster {
    async fn get_scale(&self, namespace: &str, name: &str) -> Result<Scale> {
        self.with_state(|s| {
            let deployment = s.deployments.get(namespace, name)?;
            Ok(Scale {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    namespace: Some(namespace.to_string()),
                    resource_version: deployment.metadata.resource_version.clone(),
                    ..Default::default()
                },
                spec: Some(ScaleSpec {
                    replicas: deployment.spec.as_ref().and_then(|s| s.replicas),
                }),
                status: None,
            })
        })
    }

    async fn replace_scale(&self, namespace: &str, name: &str, scale: &Scale) -> Result<Scale> {
        self.with_state(|s| {
            let requested = scale.spec.as_ref().and_then(|s| s.replicas).unwrap_or(0);
            let replicas = match s.max_replicas {
                Some(max) => requested.min(max),
                None => requested,
            };

            let deployment = s.deployments.get_mut(namespace, name)?;
            deployment.spec.get_or_insert_with(Default::default).replicas = Some(replicas);
            Objects::<Deployment>::bump(&mut deployment.metadata);

            s.writes.push(Write::Scale(
                s.deployments.reference(namespace, name),
                replicas,
            ));
            let mut scale = scale.clone();
            scale.spec = Some(ScaleSpec {
                replicas: Some(replicas),
            });
            Ok(scale)
        })
    }
}

#[async_trait::async_trait]
impl LogApi for FakeCluster {
    async fn logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: Option<i64>,
    ) -> Result<String> {
        self.with_state(|s| {
            s.pods.get(namespace, pod)?;
            let key = (namespace.to_string(), pod.to_string(), container.to_string());
            let logs = s.logs.get(&key).map(String::as_str).unwrap_or_default();
            Ok(match tail_lines {
                Some(n) => tail(logs, n),
                None => logs.to_string(),
            })
        })
    }
}

#[async_trait::async_trait]
impl NamespaceApi for FakeCluster {
    async fn namespaces(&self) -> Result<Vec<Namespace>> {
        self.with_state(|s| {
            Ok(s.namespaces
                .iter()
                .map(|name| Namespace {
                    metadata: ObjectMeta {
                        name: Some(name.clone()),
                        ..Default::default()
                    },
                    ..Default::default()
                })
                .collect())
        })
    }
}

fn tail(logs: &str, lines: i64) -> String {
    let all = logs.split_inclusive('\n').collect::<Vec<_>>();
    let keep = usize::try_from(lines).unwrap_or(0).min(all.len());
    all[all.len() - keep..].concat()
}

// === impl Objects ===

impl<K> Default for Objects<K> {
    fn default() -> Self {
        Self(BTreeMap::new())
    }
}

impl<K> Objects<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned,
{
    fn key(namespace: &str, name: &str) -> (String, String) {
        (namespace.to_string(), name.to_string())
    }

    fn reference(&self, namespace: &str, name: &str) -> ResourceRef {
        ResourceRef::new(K::kind(&()), namespace, name)
    }

    fn not_found(&self, namespace: &str, name: &str) -> Error {
        Error::NotFound(self.reference(namespace, name))
    }

    fn bump(meta: &mut ObjectMeta) {
        let version = meta
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);
        meta.resource_version = Some((version + 1).to_string());
    }

    fn seed(&mut self, mut object: K) {
        let key = Self::key(
            object.meta().namespace.as_deref().unwrap_or_default(),
            object.meta().name.as_deref().unwrap_or_default(),
        );
        if object.meta().resource_version.is_none() {
            Self::bump(object.meta_mut());
        }
        self.0.insert(key, object);
    }

    fn list(&self, namespace: &str) -> Vec<K> {
        self.0
            .iter()
            .filter(|((ns, _), _)| namespace.is_empty() || ns == namespace)
            .map(|(_, object)| object.clone())
            .collect()
    }

    fn get(&self, namespace: &str, name: &str) -> Result<&K> {
        self.0
            .get(&Self::key(namespace, name))
            .ok_or_else(|| self.not_found(namespace, name))
    }

    fn get_mut(&mut self, namespace: &str, name: &str) -> Result<&mut K> {
        let not_found = self.not_found(namespace, name);
        self.0.get_mut(&Self::key(namespace, name)).ok_or(not_found)
    }

    fn create(&mut self, namespace: &str, mut object: K) -> Result<K> {
        let name = object.meta().name.clone().ok_or(Error::MissingName)?;
        let key = Self::key(namespace, &name);
        if self.0.contains_key(&key) {
            return Err(Error::WriteConflict {
                resource: self.reference(namespace, &name),
                message: "already exists".to_string(),
            });
        }

        let meta = object.meta_mut();
        meta.namespace = Some(namespace.to_string());
        meta.resource_version = None;
        Self::bump(meta);
        self.0.insert(key, object.clone());
        Ok(object)
    }

    fn replace(&mut self, namespace: &str, name: &str, mut object: K) -> Result<K> {
        let resource = self.reference(namespace, name);
        let stored = self.get_mut(namespace, name)?;
        let current = stored.meta().resource_version.clone();
        if let Some(version) = object.meta().resource_version.as_ref() {
            if Some(version) != current.as_ref() {
                return Err(Error::WriteConflict {
                    resource,
                    message: format!(
                        "resourceVersion {version} does not match {}",
                        current.unwrap_or_default()
                    ),
                });
            }
        }

        object.meta_mut().resource_version = current;
        Self::bump(object.meta_mut());
        *stored = object.clone();
        Ok(object)
    }

    fn patch(&mut self, namespace: &str, name: &str, patch: &Value) -> Result<K> {
        let stored = self.get_mut(namespace, name)?;
        let mut value = serde_json::to_value(&*stored)?;
        merge(&mut value, patch);
        let mut patched = serde_json::from_value::<K>(value)?;
        Self::bump(patched.meta_mut());
        *stored = patched.clone();
        Ok(patched)
    }

    fn delete(&mut self, namespace: &str, name: &str) -> Result<()> {
        match self.0.remove(&Self::key(namespace, name)) {
            Some(_) => Ok(()),
            None => Err(self.not_found(namespace, name)),
        }
    }
}

/// Applies a strategic merge patch. Lists whose elements all carry a `name`
/// are merged element-wise by name; any other list is replaced.
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                if value.is_null() {
                    target.remove(key);
                    continue;
                }
                match target.get_mut(key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(patch)) if is_named_list(patch) => {
            for item in patch {
                let name = item.get("name");
                match target.iter_mut().find(|t| t.get("name") == name) {
                    Some(existing) => merge(existing, item),
                    None => target.push(item.clone()),
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn is_named_list(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(|item| item.get("name").is_some())
}

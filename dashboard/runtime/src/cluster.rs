use crate::k8s::{Deployment, Namespace, Pod, Resource, Scale};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kubedash_core::{Error, LogApi, NamespaceApi, ResourceApi, ResourceRef, Result, ScaleApi};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt;
use tracing::{debug, trace};

/// Serves cluster requests through the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
}

impl KubeCluster {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// An empty namespace lists across the whole cluster.
    fn listable<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            self.namespaced(namespace)
        }
    }
}

impl fmt::Debug for KubeCluster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeCluster").finish_non_exhaustive()
    }
}

/// Classifies a client error for the resource it was raised for.
fn api_error<K>(namespace: &str, name: &str, error: kube::Error) -> Error
where
    K: Resource<DynamicType = ()>,
{
    let resource = || ResourceRef::new(K::kind(&()), namespace, name);
    match error {
        kube::Error::Api(rsp) if rsp.code == 404 => Error::NotFound(resource()),
        kube::Error::Api(rsp) if rsp.code == 409 => Error::WriteConflict {
            resource: resource(),
            message: rsp.message,
        },
        error => {
            debug!(%error, %namespace, %name, "Kubernetes API request failed");
            Error::unavailable(error)
        }
    }
}

#[async_trait::async_trait]
impl<K> ResourceApi<K> for KubeCluster
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    K: Clone + DeserializeOwned + Serialize + fmt::Debug + Send + Sync + 'static,
{
    async fn list(&self, namespace: &str) -> Result<Vec<K>> {
        let list = self
            .listable::<K>(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| api_error::<K>(namespace, "", e))?;
        trace!(%namespace, kind = %K::kind(&()), count = list.items.len(), "Listed");
        Ok(list.items)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<K> {
        self.namespaced::<K>(namespace)
            .get(name)
            .await
            .map_err(|e| api_error::<K>(namespace, name, e))
    }

    async fn create(&self, namespace: &str, resource: &K) -> Result<K> {
        let name = resource.meta().name.clone().unwrap_or_default();
        self.namespaced::<K>(namespace)
            .create(&PostParams::default(), resource)
            .await
            .map_err(|e| api_error::<K>(namespace, &name, e))
    }

    async fn replace(&self, namespace: &str, name: &str, resource: &K) -> Result<K> {
        self.namespaced::<K>(namespace)
            .replace(name, &PostParams::default(), resource)
            .await
            .map_err(|e| api_error::<K>(namespace, name, e))
    }

    async fn patch(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<K> {
        self.namespaced::<K>(namespace)
            .patch(name, &PatchParams::default(), &Patch::Strategic(patch))
            .await
            .map_err(|e| api_error::<K>(namespace, name, e))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        self.namespaced::<K>(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| api_error::<K>(namespace, name, e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ScaleApi for KubeCluster {
    async fn get_scale(&self, namespace: &str, name: &str) -> Result<Scale> {
        self.namespaced::<Deployment>(namespace)
            .get_scale(name)
            .await
            .map_err(|e| api_error::<Deployment>(namespace, name, e))
    }

    async fn replace_scale(&self, namespace: &str, name: &str, scale: &Scale) -> Result<Scale> {
        let data = serde_json::to_vec(scale)?;
        self.namespaced::<Deployment>(namespace)
            .replace_scale(name, &PostParams::default(), data)
            .await
            .map_err(|e| api_error::<Deployment>(namespace, name, e))
    }
}

#[async_trait::async_trait]
impl LogApi for KubeCluster {
    async fn logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: Option<i64>,
    ) -> Result<String> {
        let params = LogParams {
            container: Some(container.to_string()),
            tail_lines,
            ..Default::default()
        };
        self.namespaced::<Pod>(namespace)
            .logs(pod, &params)
            .await
            .map_err(|e| api_error::<Pod>(namespace, pod, e))
    }
}

#[async_trait::async_trait]
impl NamespaceApi for KubeCluster {
    async fn namespaces(&self) -> Result<Vec<Namespace>> {
        let list = Api::<Namespace>::all(self.client.clone())
            .list(&ListParams::default())
            .await
            .map_err(|e| api_error::<Namespace>("", "", e))?;
        Ok(list.items)
    }
}

//! The subset of the Kubernetes API the services depend on.
//!
//! Services hold an implementation of these traits rather than a concrete
//! client so the transport can be swapped out (see [`crate::fake`]). An empty
//! `namespace` in a list call means "all namespaces".

use crate::{
    k8s::{Namespace, Scale},
    NamespaceCount, Result,
};

/// Reads and writes namespaced resources of kind `K`.
#[async_trait::async_trait]
pub trait ResourceApi<K>: Send + Sync {
    async fn list(&self, namespace: &str) -> Result<Vec<K>>;

    async fn get(&self, namespace: &str, name: &str) -> Result<K>;

    async fn create(&self, namespace: &str, resource: &K) -> Result<K>;

    /// Replaces the named resource with `resource`.
    ///
    /// No precondition is applied beyond whatever `resourceVersion` the
    /// object itself carries.
    async fn replace(&self, namespace: &str, name: &str, resource: &K) -> Result<K>;

    /// Applies a strategic merge patch to the named resource.
    async fn patch(&self, namespace: &str, name: &str, patch: &serde_json::Value) -> Result<K>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

/// The `scale` subresource of a Deployment.
#[async_trait::async_trait]
pub trait ScaleApi: Send + Sync {
    async fn get_scale(&self, namespace: &str, name: &str) -> Result<Scale>;

    async fn replace_scale(&self, namespace: &str, name: &str, scale: &Scale) -> Result<Scale>;
}

#[async_trait::async_trait]
pub trait LogApi: Send + Sync {
    /// Reads a container's log to completion.
    ///
    /// At most `tail_lines` lines are returned when it is set.
    async fn logs(
        &self,
        namespace: &str,
        pod: &str,
        container: &str,
        tail_lines: Option<i64>,
    ) -> Result<String>;
}

#[async_trait::async_trait]
pub trait NamespaceApi: Send + Sync {
    async fn namespaces(&self) -> Result<Vec<Namespace>>;
}

/// Counts the resources of kind `K` in every namespace, in the order the
/// cluster lists namespaces. Namespaces without resources are included.
pub(crate) async fn count_per_namespace<K, C>(client: &C) -> Result<Vec<NamespaceCount>>
where
    C: ResourceApi<K> + NamespaceApi,
{
    let namespaces = client.namespaces().await?;
    let mut counts = Vec::with_capacity(namespaces.len());
    for ns in namespaces {
        let Some(namespace) = ns.metadata.name else {
            continue;
        };
        let count = client.list(&namespace).await?.len();
        counts.push(NamespaceCount { namespace, count });
    }
    Ok(counts)
}

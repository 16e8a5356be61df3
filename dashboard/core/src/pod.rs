use crate::{
    cluster::{self, LogApi, NamespaceApi, ResourceApi},
    k8s::{Container, Pod, Time},
    select::{Listable, SelectQuery, Selection},
    Error, NamespaceCount, Result,
};
use std::ops::{Deref, DerefMut};
use tracing::{debug, info};

/// A [`Pod`] that can be run through the selection pipeline.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PodCell(pub Pod);

/// Pod operations against a cluster.
#[derive(Clone, Debug)]
pub struct Pods<C> {
    client: C,
    tail_lines: Option<i64>,
}

// === impl PodCell ===

impl Listable for PodCell {
    fn name(&self) -> &str {
        self.0.metadata.name.as_deref().unwrap_or_default()
    }

    fn creation_timestamp(&self) -> Option<&Time> {
        self.0.metadata.creation_timestamp.as_ref()
    }
}

impl From<Pod> for PodCell {
    #[inline]
    fn from(pod: Pod) -> Self {
        Self(pod)
    }
}

impl From<PodCell> for Pod {
    #[inline]
    fn from(PodCell(pod): PodCell) -> Self {
        pod
    }
}

impl Deref for PodCell {
    type Target = Pod;

    #[inline]
    fn deref(&self) -> &Pod {
        &self.0
    }
}

impl DerefMut for PodCell {
    #[inline]
    fn deref_mut(&mut self) -> &mut Pod {
        &mut self.0
    }
}

// === impl Pods ===

impl<C> Pods<C> {
    /// `tail_lines` bounds the number of log lines returned by [`Pods::logs`].
    pub fn new(client: C, tail_lines: Option<i64>) -> Self {
        Self { client, tail_lines }
    }
}

impl<C> Pods<C>
where
    C: ResourceApi<Pod>,
{
    pub async fn list(&self, namespace: &str, query: &SelectQuery) -> Result<Selection<Pod>> {
        let pods = self.client.list(namespace).await?;
        debug!(%namespace, count = pods.len(), "Listed pods");
        let cells = pods.into_iter().map(PodCell).collect();
        Ok(query.select(cells).map(Pod::from))
    }

    pub async fn detail(&self, name: &str, namespace: &str) -> Result<Pod> {
        self.client.get(namespace, name).await
    }

    pub async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        self.client.delete(namespace, name).await?;
        info!(%namespace, %name, "Deleted pod");
        Ok(())
    }

    /// Replaces a Pod with the JSON object in `content`.
    pub async fn update(&self, namespace: &str, content: &str) -> Result<Pod> {
        let pod = serde_json::from_str::<Pod>(content)?;
        let name = pod.metadata.name.clone().ok_or(Error::MissingName)?;
        let updated = self.client.replace(namespace, &name, &pod).await?;
        info!(%namespace, %name, "Updated pod");
        Ok(updated)
    }

    /// Returns the pod's containers in spec order.
    pub async fn containers(&self, name: &str, namespace: &str) -> Result<Vec<Container>> {
        let pod = self.client.get(namespace, name).await?;
        Ok(pod.spec.map(|spec| spec.containers).unwrap_or_default())
    }
}

impl<C> Pods<C>
where
    C: LogApi,
{
    pub async fn logs(&self, container: &str, pod: &str, namespace: &str) -> Result<String> {
        self.client
            .logs(namespace, pod, container, self.tail_lines)
            .await
    }
}

impl<C> Pods<C>
where
    C: ResourceApi<Pod> + NamespaceApi,
{
    pub async fn counts(&self) -> Result<Vec<NamespaceCount>> {
        cluster::count_per_namespace::<Pod, _>(&self.client).await
    }
}

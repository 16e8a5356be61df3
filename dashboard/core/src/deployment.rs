use crate::{
    cluster::{self, NamespaceApi, ResourceApi, ScaleApi},
    k8s::{
        resource_names, Container, ContainerPort, Deployment, DeploymentSpec, HTTPGetAction,
        IntOrString, K8sQuantity, LabelSelector, ObjectMeta, PodSpec, PodTemplateSpec, Probe,
        Quantity, ResourceRequirements, Time,
    },
    select::{Listable, SelectQuery, Selection},
    Error, NamespaceCount, Result,
};
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    ops::{Deref, DerefMut},
};
use tracing::{debug, info};

/// The environment variable rewritten to force a rollout.
pub const RESTART_ENV: &str = "RESTART_";

/// The name given to the single container port of a created Deployment.
pub const PORT_NAME: &str = "http";

const READINESS_INITIAL_DELAY_SECS: i32 = 5;
const LIVENESS_INITIAL_DELAY_SECS: i32 = 15;
const HEALTH_CHECK_TIMEOUT_SECS: i32 = 5;
const HEALTH_CHECK_PERIOD_SECS: i32 = 5;

/// A simplified description of a single-container Deployment.
///
/// Missing fields read as zero or empty.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DeploymentRequest {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    #[serde(alias = "imag")]
    pub image: String,
    #[serde(alias = "label")]
    pub labels: BTreeMap<String, String>,
    pub cpu: String,
    pub memory: String,
    pub container_port: i32,
    pub health_check: bool,
    pub health_path: String,
}

/// A [`Deployment`] that can be run through the selection pipeline.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeploymentCell(pub Deployment);

/// Deployment operations against a cluster.
#[derive(Clone, Debug)]
pub struct Deployments<C> {
    client: C,
}

// === impl DeploymentRequest ===

impl DeploymentRequest {
    /// Builds the full Deployment described by this request.
    ///
    /// Fails only if `cpu` or `memory` is not a valid resource quantity.
    pub fn build(&self) -> Result<Deployment> {
        let cpu = parse_quantity("cpu", &self.cpu)?;
        let memory = parse_quantity("memory", &self.memory)?;
        let resources = BTreeMap::from([
            (resource_names::CPU.to_string(), cpu),
            (resource_names::MEMORY.to_string(), memory),
        ]);

        let (readiness_probe, liveness_probe) = if self.health_check {
            (
                Some(self.http_get_check(READINESS_INITIAL_DELAY_SECS)),
                Some(self.http_get_check(LIVENESS_INITIAL_DELAY_SECS)),
            )
        } else {
            (None, None)
        };

        let container = Container {
            name: self.name.clone(),
            image: Some(self.image.clone()),
            ports: Some(vec![ContainerPort {
                name: Some(PORT_NAME.to_string()),
                protocol: Some("TCP".to_string()),
                container_port: self.container_port,
                ..Default::default()
            }]),
            readiness_probe,
            liveness_probe,
            resources: Some(ResourceRequirements {
                limits: Some(resources.clone()),
                requests: Some(resources),
                ..Default::default()
            }),
            ..Default::default()
        };

        Ok(Deployment {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(self.namespace.clone()),
                labels: Some(self.labels.clone()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(self.replicas),
                // The selector must always match the template's labels.
                selector: LabelSelector {
                    match_labels: Some(self.labels.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(self.labels.clone()),
                        ..Default::default()
                    }),
                    spec: Some(PodSpec {
                        containers: vec![container],
                        ..Default::default()
                    }),
                },
                ..Default::default()
            }),
            status: None,
        })
    }

    fn http_get_check(&self, initial_delay_seconds: i32) -> Probe {
        Probe {
            http_get: Some(HTTPGetAction {
                path: Some(self.health_path.clone()),
                port: IntOrString::Int(self.container_port),
                ..Default::default()
            }),
            initial_delay_seconds: Some(initial_delay_seconds),
            timeout_seconds: Some(HEALTH_CHECK_TIMEOUT_SECS),
            period_seconds: Some(HEALTH_CHECK_PERIOD_SECS),
            ..Default::default()
        }
    }
}

fn parse_quantity(field: &'static str, value: &str) -> Result<Quantity> {
    value
        .parse::<K8sQuantity>()
        .map(Into::into)
        .map_err(|source| Error::InvalidQuantity {
            field,
            value: value.to_string(),
            source,
        })
}

/// A strategic merge patch that sets [`RESTART_ENV`] to `timestamp` on the
/// container named `container`.
///
/// Containers and their environment are merged by name, so every other
/// field of the pod template is left as it is.
pub fn restart_patch(container: &str, timestamp: i64) -> serde_json::Value {
    serde_json::json!({
        "spec": {
            "template": {
                "spec": {
                    "containers": [{
                        "name": container,
                        "env": [{
                            "name": RESTART_ENV,
                            "value": timestamp.to_string(),
                        }],
                    }],
                },
            },
        },
    })
}

// === impl DeploymentCell ===

impl Listable for DeploymentCell {
    fn name(&self) -> &str {
        self.0.metadata.name.as_deref().unwrap_or_default()
    }

    fn creation_timestamp(&self) -> Option<&Time> {
        self.0.metadata.creation_timestamp.as_ref()
    }
}

impl From<Deployment> for DeploymentCell {
    #[inline]
    fn from(deployment: Deployment) -> Self {
        Self(deployment)
    }
}

impl From<DeploymentCell> for Deployment {
    #[inline]
    fn from(DeploymentCell(deployment): DeploymentCell) -> Self {
        deployment
    }
}

impl Deref for DeploymentCell {
    type Target = Deployment;

    #[inline]
    fn deref(&self) -> &Deployment {
        &self.0
    }
}

impl DerefMut for DeploymentCell {
    #[inline]
    fn deref_mut(&mut self) -> &mut Deployment {
        &mut self.0
    }
}

// === impl Deployments ===

impl<C> Deployments<C> {
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

impl<C> Deployments<C>
where
    C: ResourceApi<Deployment>,
{
    pub async fn list(&self, namespace: &str, query: &SelectQuery) -> Result<Selection<Deployment>> {
        let deployments = self.client.list(namespace).await?;
        debug!(%namespace, count = deployments.len(), "Listed deployments");
        let cells = deployments.into_iter().map(DeploymentCell).collect();
        Ok(query.select(cells).map(Deployment::from))
    }

    pub async fn detail(&self, name: &str, namespace: &str) -> Result<Deployment> {
        self.client.get(namespace, name).await
    }

    /// Builds and creates the Deployment described by `request`.
    ///
    /// Nothing is written if the request cannot be built.
    pub async fn create(&self, request: &DeploymentRequest) -> Result<Deployment> {
        let deployment = request.build()?;
        let created = self.client.create(&request.namespace, &deployment).await?;
        info!(namespace = %request.namespace, name = %request.name, "Created deployment");
        Ok(created)
    }

    pub async fn delete(&self, name: &str, namespace: &str) -> Result<()> {
        self.client.delete(namespace, name).await?;
        info!(%namespace, %name, "Deleted deployment");
        Ok(())
    }

    /// Replaces a Deployment with the JSON object in `content`.
    pub async fn update(&self, namespace: &str, content: &str) -> Result<Deployment> {
        let deployment = serde_json::from_str::<Deployment>(content)?;
        let name = deployment.metadata.name.clone().ok_or(Error::MissingName)?;
        let updated = self.client.replace(namespace, &name, &deployment).await?;
        info!(%namespace, %name, "Updated deployment");
        Ok(updated)
    }

    /// Triggers a rollout by stamping the current time into the environment
    /// of the container named after the Deployment.
    pub async fn restart(&self, name: &str, namespace: &str) -> Result<Deployment> {
        let patch = restart_patch(name, chrono::Utc::now().timestamp());
        let patched = self.client.patch(namespace, name, &patch).await?;
        info!(%namespace, %name, "Restarted deployment");
        Ok(patched)
    }
}

impl<C> Deployments<C>
where
    C: ResourceApi<Deployment> + ScaleApi,
{
    /// Sets the replica count and returns the count the cluster accepted.
    pub async fn scale(&self, name: &str, namespace: &str, replicas: i32) -> Result<i32> {
        let mut scale = self.client.get_scale(namespace, name).await?;
        scale.spec.get_or_insert_with(Default::default).replicas = Some(replicas);

        let scale = self.client.replace_scale(namespace, name, &scale).await?;
        let accepted = scale.spec.and_then(|s| s.replicas).unwrap_or_default();
        info!(%namespace, %name, requested = replicas, accepted, "Scaled deployment");
        Ok(accepted)
    }
}

impl<C> Deployments<C>
where
    C: ResourceApi<Deployment> + NamespaceApi,
{
    pub async fn counts(&self) -> Result<Vec<NamespaceCount>> {
        cluster::count_per_namespace::<Deployment, _>(&self.client).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{fake::FakeCluster, ErrorCode};
    use maplit::btreemap;

    fn request() -> DeploymentRequest {
        DeploymentRequest {
            name: "web".to_string(),
            namespace: "default".to_string(),
            replicas: 3,
            image: "nginx:1.25".to_string(),
            labels: btreemap! { "app".to_string() => "web".to_string() },
            cpu: "500m".to_string(),
            memory: "256Mi".to_string(),
            container_port: 8080,
            health_check: false,
            health_path: String::new(),
        }
    }

    fn container(deployment: &Deployment) -> &Container {
        let containers = &deployment
            .spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers;
        assert_eq!(containers.len(), 1);
        &containers[0]
    }

    #[test]
    fn builds_single_container_deployment() {
        let deployment = request().build().unwrap();

        assert_eq!(deployment.metadata.name.as_deref(), Some("web"));
        assert_eq!(deployment.metadata.namespace.as_deref(), Some("default"));

        let spec = deployment.spec.as_ref().unwrap();
        assert_eq!(spec.replicas, Some(3));
        let labels = btreemap! { "app".to_string() => "web".to_string() };
        assert_eq!(spec.selector.match_labels.as_ref(), Some(&labels));
        assert_eq!(
            spec.template.metadata.as_ref().unwrap().labels.as_ref(),
            Some(&labels)
        );

        let container = container(&deployment);
        assert_eq!(container.name, "web");
        assert_eq!(container.image.as_deref(), Some("nginx:1.25"));
        assert_eq!(
            container.ports,
            Some(vec![ContainerPort {
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                container_port: 8080,
                ..Default::default()
            }])
        );

        let resources = container.resources.as_ref().unwrap();
        let expected = btreemap! {
            "cpu".to_string() => Quantity("500m".to_string()),
            "memory".to_string() => Quantity("256Mi".to_string()),
        };
        assert_eq!(resources.requests.as_ref(), Some(&expected));
        assert_eq!(resources.limits.as_ref(), Some(&expected));
    }

    #[test]
    fn no_health_checks_when_disabled() {
        let deployment = request().build().unwrap();
        let container = container(&deployment);
        assert!(container.readiness_probe.is_none());
        assert!(container.liveness_probe.is_none());
    }

    #[test]
    fn health_check_adds_readiness_and_liveness() {
        let deployment = DeploymentRequest {
            health_check: true,
            health_path: "/healthz".to_string(),
            ..request()
        }
        .build()
        .unwrap();
        let container = container(&deployment);

        let readiness = container.readiness_probe.as_ref().expect("readiness probe");
        let liveness = container.liveness_probe.as_ref().expect("liveness probe");
        for check in [readiness, liveness] {
            let get = check.http_get.as_ref().unwrap();
            assert_eq!(get.path.as_deref(), Some("/healthz"));
            assert_eq!(get.port, IntOrString::Int(8080));
            assert_eq!(check.timeout_seconds, Some(5));
            assert_eq!(check.period_seconds, Some(5));
        }
        assert_eq!(readiness.initial_delay_seconds, Some(5));
        assert_eq!(liveness.initial_delay_seconds, Some(15));
    }

    #[test]
    fn rejects_invalid_quantities() {
        let err = DeploymentRequest {
            cpu: "bad-value".to_string(),
            ..request()
        }
        .build()
        .unwrap_err();
        assert!(
            matches!(err, Error::InvalidQuantity { field: "cpu", .. }),
            "{err:?}"
        );

        let err = DeploymentRequest {
            memory: "1 GB".to_string(),
            ..request()
        }
        .build()
        .unwrap_err();
        assert!(
            matches!(err, Error::InvalidQuantity { field: "memory", .. }),
            "{err:?}"
        );
    }

    #[test]
    fn request_accepts_legacy_field_names() {
        let req: DeploymentRequest = serde_json::from_value(serde_json::json!({
            "name": "web",
            "namespace": "default",
            "replicas": 3,
            "imag": "nginx:1.25",
            "label": { "app": "web" },
            "cpu": "500m",
            "memory": "256Mi",
            "container_port": 8080,
        }))
        .unwrap();
        assert_eq!(req, request());
    }

    #[test]
    fn request_missing_fields_read_as_zero() {
        let req: DeploymentRequest = serde_json::from_value(serde_json::json!({
            "name": "web",
            "namespace": "default",
            "image": "nginx:1.25",
        }))
        .unwrap();
        assert_eq!(req.replicas, 0);
        assert_eq!(req.container_port, 0);
        assert!(req.cpu.is_empty());
        assert!(req.memory.is_empty());
        assert!(req.labels.is_empty());
        assert!(!req.health_check);

        // Empty quantities are still rejected when the Deployment is built.
        let error = req.build().unwrap_err();
        assert_eq!(error.code(), ErrorCode::InvalidInput);
    }

    #[test]
    fn restart_patch_targets_named_container() {
        let patch = restart_patch("web", 1_700_000_000);
        assert_eq!(
            patch,
            serde_json::json!({
                "spec": { "template": { "spec": { "containers": [{
                    "name": "web",
                    "env": [{ "name": "RESTART_", "value": "1700000000" }],
                }]}}}
            })
        );
    }

    #[tokio::test]
    async fn create_writes_built_deployment() {
        let cluster = FakeCluster::default();
        let deployments = Deployments::new(cluster.clone());

        deployments.create(&request()).await.unwrap();

        let stored = deployments.detail("web", "default").await.unwrap();
        assert_eq!(container(&stored).image.as_deref(), Some("nginx:1.25"));
        assert_eq!(cluster.writes().len(), 1);
    }

    #[tokio::test]
    async fn create_with_invalid_cpu_does_not_write() {
        let cluster = FakeCluster::default();
        let deployments = Deployments::new(cluster.clone());

        let err = deployments
            .create(&DeploymentRequest {
                cpu: "bad-value".to_string(),
                ..request()
            })
            .await
            .unwrap_err();

        assert_eq!(err.code(), ErrorCode::InvalidInput);
        assert!(cluster.writes().is_empty());
    }

    #[tokio::test]
    async fn restart_sets_env_on_deployment_container() {
        let cluster = FakeCluster::default();
        cluster.insert(request().build().unwrap());
        let deployments = Deployments::new(cluster.clone());

        let patched = deployments.restart("web", "default").await.unwrap();

        let env = container(&patched).env.clone().unwrap_or_default();
        assert_eq!(env.len(), 1);
        assert_eq!(env[0].name, RESTART_ENV);
        let stamp = env[0].value.as_deref().unwrap().parse::<i64>().unwrap();
        assert!(stamp > 0);
        // The rest of the container is untouched.
        assert_eq!(container(&patched).image.as_deref(), Some("nginx:1.25"));
    }

    #[tokio::test]
    async fn restart_missing_deployment_is_not_found() {
        let cluster = FakeCluster::default();
        let deployments = Deployments::new(cluster.clone());

        let err = deployments.restart("nope", "default").await.unwrap_err();

        assert_eq!(err.code(), ErrorCode::NotFound);
        assert!(cluster.writes().is_empty());
    }

    #[tokio::test]
    async fn scale_reports_accepted_replicas() {
        let cluster = FakeCluster::default().with_max_replicas(5);
        cluster.insert(request().build().unwrap());
        let deployments = Deployments::new(cluster.clone());

        assert_eq!(deployments.scale("web", "default", 4).await.unwrap(), 4);
        assert_eq!(deployments.scale("web", "default", 50).await.unwrap(), 5);

        let stored = deployments.detail("web", "default").await.unwrap();
        assert_eq!(stored.spec.unwrap().replicas, Some(5));
    }

    #[tokio::test]
    async fn scale_missing_deployment_is_not_found() {
        let deployments = Deployments::new(FakeCluster::default());
        let err = deployments.scale("nope", "default", 1).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn update_replaces_deployment() {
        let cluster = FakeCluster::default();
        cluster.insert(request().build().unwrap());
        let deployments = Deployments::new(cluster.clone());

        let mut deployment = deployments.detail("web", "default").await.unwrap();
        deployment.spec.as_mut().unwrap().replicas = Some(7);
        let content = serde_json::to_string(&deployment).unwrap();

        let updated = deployments.update("default", &content).await.unwrap();
        assert_eq!(updated.spec.unwrap().replicas, Some(7));
    }

    #[tokio::test]
    async fn update_rejects_malformed_content() {
        let cluster = FakeCluster::default();
        let deployments = Deployments::new(cluster.clone());

        let err = deployments.update("default", "{not json").await.unwrap_err();
        assert!(matches!(err, Error::InvalidObject(_)), "{err:?}");

        let err = deployments
            .update("default", r#"{"metadata": {}}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingName), "{err:?}");

        assert!(cluster.writes().is_empty());
    }

    #[tokio::test]
    async fn update_with_stale_version_conflicts() {
        let cluster = FakeCluster::default();
        cluster.insert(request().build().unwrap());
        let deployments = Deployments::new(cluster.clone());

        let stale = deployments.detail("web", "default").await.unwrap();
        let content = serde_json::to_string(&stale).unwrap();
        deployments.update("default", &content).await.unwrap();

        let err = deployments.update("default", &content).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::WriteConflict);
    }

    #[tokio::test]
    async fn list_selects_deployments() {
        let cluster = FakeCluster::default();
        for (name, created) in [("web-a", 1), ("api", 2), ("web-b", 3)] {
            cluster.insert(crate::fake::deployment("default", name, created));
        }
        cluster.insert(crate::fake::deployment("other", "web-c", 4));
        let deployments = Deployments::new(cluster);

        let selection = deployments
            .list("default", &SelectQuery::new("web", 0, 0))
            .await
            .unwrap();
        assert_eq!(selection.total, 2);
        let names = selection
            .items
            .iter()
            .map(|d| d.metadata.name.as_deref().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(names, ["web-b", "web-a"]);

        let all = deployments.list("", &SelectQuery::default()).await.unwrap();
        assert_eq!(all.total, 4);
    }

    #[tokio::test]
    async fn counts_per_namespace() {
        let cluster = FakeCluster::default();
        cluster.add_namespace("empty");
        cluster.insert(crate::fake::deployment("default", "a", 1));
        cluster.insert(crate::fake::deployment("default", "b", 2));
        cluster.insert(crate::fake::deployment("kube-system", "c", 3));
        let deployments = Deployments::new(cluster);

        let counts = deployments.counts().await.unwrap();
        assert_eq!(
            counts,
            [
                NamespaceCount {
                    namespace: "default".to_string(),
                    count: 2
                },
                NamespaceCount {
                    namespace: "empty".to_string(),
                    count: 0
                },
                NamespaceCount {
                    namespace: "kube-system".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn cell_is_a_view_of_the_deployment() {
        let mut cell = DeploymentCell::from(crate::fake::deployment("default", "web", 1));
        assert_eq!(cell.name(), "web");
        cell.metadata.name = Some("api".to_string());
        assert_eq!(cell.name(), "api");
        assert_eq!(Deployment::from(cell).metadata.name.as_deref(), Some("api"));
    }
}

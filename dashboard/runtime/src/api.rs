use crate::k8s::{Deployment, Pod};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kubedash_core::{
    BoxError, DeploymentRequest, Deployments, ErrorCode, LogApi, NamespaceApi, Pods, ResourceApi,
    ScaleApi, SelectQuery, Selection,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

pub type Body = http_body_util::Full<bytes::Bytes>;

/// Serves the Pod and Deployment HTTP API.
#[derive(Clone, Debug)]
pub struct Api<C> {
    pods: Pods<C>,
    deployments: Deployments<C>,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[source] BoxError),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a request could not be served.
#[derive(Debug, Error)]
enum Rejection {
    #[error(transparent)]
    Cluster(#[from] kubedash_core::Error),

    #[error("invalid query parameter {name}={value:?}")]
    Query { name: &'static str, value: String },

    #[error("invalid request body: {0}")]
    Body(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct Envelope<T> {
    msg: String,
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<ErrorCode>,
}

struct Query(HashMap<String, String>);

#[derive(Deserialize)]
struct PodTarget {
    pod_name: String,
    namespace: String,
}

#[derive(Deserialize)]
struct DeploymentTarget {
    deployment_name: String,
    namespace: String,
}

#[derive(Deserialize)]
struct Update {
    namespace: String,
    content: String,
}

#[derive(Deserialize)]
struct ScaleTarget {
    deployment_name: String,
    namespace: String,
    scale_num: i32,
}

// === impl Api ===

impl<C: Clone> Api<C> {
    pub fn new(cluster: C, tail_lines: Option<i64>) -> Self {
        Self {
            pods: Pods::new(cluster.clone(), tail_lines),
            deployments: Deployments::new(cluster),
        }
    }
}

impl<C, B> tower::Service<Request<B>> for Api<C>
where
    C: ResourceApi<Pod> + ResourceApi<Deployment> + ScaleApi + LogApi + NamespaceApi,
    C: Clone + 'static,
    B: hyper::body::Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        trace!(method = %req.method(), uri = %req.uri());
        let api = self.clone();
        Box::pin(async move { api.serve(req).await })
    }
}

impl<C> Api<C>
where
    C: ResourceApi<Pod> + ResourceApi<Deployment> + ScaleApi + LogApi + NamespaceApi,
{
    async fn serve<B>(self, req: Request<B>) -> Result<Response<Body>, Error>
    where
        B: hyper::body::Body,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = req.into_parts();
        let query = Query::parse(parts.uri.query());
        let body = body
            .collect()
            .await
            .map_err(|e| Error::Request(e.into()))?
            .to_bytes();

        use http::Method;
        let path = parts.uri.path();
        match (&parts.method, path) {
            (&Method::GET, "/api/k8s/pod") => {
                respond(path, "listed pods", self.list_pods(&query).await)
            }
            (&Method::GET, "/api/k8s/pod/detail") => {
                respond(path, "fetched pod", self.pod_detail(&query).await)
            }
            (&Method::DELETE, "/api/k8s/pod/del") => {
                respond(path, "deleted pod", self.delete_pod(&body).await)
            }
            (&Method::PUT, "/api/k8s/pod/update") => {
                respond(path, "updated pod", self.update_pod(&body).await)
            }
            (&Method::GET, "/api/k8s/pod/container") => {
                respond(path, "listed containers", self.pod_containers(&query).await)
            }
            (&Method::GET, "/api/k8s/pod/log") => {
                respond(path, "fetched container logs", self.pod_logs(&query).await)
            }
            (&Method::GET, "/api/k8s/pod/num" | "/api/k8s/pod/numnp") => respond(
                path,
                "counted pods per namespace",
                self.pods.counts().await.map_err(Into::into),
            ),
            (&Method::GET, "/api/k8s/deployment") => {
                respond(path, "listed deployments", self.list_deployments(&query).await)
            }
            (&Method::GET, "/api/k8s/deployment/detail") => respond(
                path,
                "fetched deployment",
                self.deployment_detail(&query).await,
            ),
            (&Method::POST, "/api/k8s/deployment/create") => respond(
                path,
                "created deployment",
                self.create_deployment(&body).await,
            ),
            (&Method::DELETE, "/api/k8s/deployment/del") => respond(
                path,
                "deleted deployment",
                self.delete_deployment(&body).await,
            ),
            (&Method::PUT, "/api/k8s/deployment/update") => respond(
                path,
                "updated deployment",
                self.update_deployment(&body).await,
            ),
            (&Method::PUT, "/api/k8s/deployment/restart") => respond(
                path,
                "restarted deployment",
                self.restart_deployment(&body).await,
            ),
            (&Method::PUT, "/api/k8s/deployment/scale") => respond(
                path,
                "scaled deployment",
                self.scale_deployment(&body).await,
            ),
            (&Method::GET, "/api/k8s/deployment/num" | "/api/k8s/deployment/numnp") => respond(
                path,
                "counted deployments per namespace",
                self.deployments.counts().await.map_err(Into::into),
            ),
            (method, path) => {
                debug!(%method, %path, "No route");
                Ok(Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"))
            }
        }
    }

    // === pods ===

    async fn list_pods(&self, query: &Query) -> Result<Selection<Pod>, Rejection> {
        let select = query.select()?;
        let pods = self.pods.list(query.get("namespace"), &select).await?;
        Ok(pods)
    }

    async fn pod_detail(&self, query: &Query) -> Result<Pod, Rejection> {
        let pod = self
            .pods
            .detail(query.get("pod_name"), query.get("namespace"))
            .await?;
        Ok(pod)
    }

    async fn delete_pod(&self, body: &[u8]) -> Result<(), Rejection> {
        let PodTarget {
            pod_name,
            namespace,
        } = parse(body)?;
        self.pods.delete(&pod_name, &namespace).await?;
        Ok(())
    }

    async fn update_pod(&self, body: &[u8]) -> Result<Pod, Rejection> {
        let Update { namespace, content } = parse(body)?;
        Ok(self.pods.update(&namespace, &content).await?)
    }

    async fn pod_containers(&self, query: &Query) -> Result<Vec<String>, Rejection> {
        let containers = self
            .pods
            .containers(query.get("pod_name"), query.get("namespace"))
            .await?;
        Ok(containers.into_iter().map(|c| c.name).collect())
    }

    async fn pod_logs(&self, query: &Query) -> Result<String, Rejection> {
        let logs = self
            .pods
            .logs(
                query.get("container_name"),
                query.get("pod_name"),
                query.get("namespace"),
            )
            .await?;
        Ok(logs)
    }

    // === deployments ===

    async fn list_deployments(&self, query: &Query) -> Result<Selection<Deployment>, Rejection> {
        let select = query.select()?;
        let deployments = self
            .deployments
            .list(query.get("namespace"), &select)
            .await?;
        Ok(deployments)
    }

    async fn deployment_detail(&self, query: &Query) -> Result<Deployment, Rejection> {
        let deployment = self
            .deployments
            .detail(query.get("deployment_name"), query.get("namespace"))
            .await?;
        Ok(deployment)
    }

    async fn create_deployment(&self, body: &[u8]) -> Result<Deployment, Rejection> {
        let request = parse::<DeploymentRequest>(body)?;
        Ok(self.deployments.create(&request).await?)
    }

    async fn delete_deployment(&self, body: &[u8]) -> Result<(), Rejection> {
        let DeploymentTarget {
            deployment_name,
            namespace,
        } = parse(body)?;
        self.deployments.delete(&deployment_name, &namespace).await?;
        Ok(())
    }

    async fn update_deployment(&self, body: &[u8]) -> Result<Deployment, Rejection> {
        let Update { namespace, content } = parse(body)?;
        Ok(self.deployments.update(&namespace, &content).await?)
    }

    async fn restart_deployment(&self, body: &[u8]) -> Result<Deployment, Rejection> {
        let DeploymentTarget {
            deployment_name,
            namespace,
        } = parse(body)?;
        let deployment = self
            .deployments
            .restart(&deployment_name, &namespace)
            .await?;
        Ok(deployment)
    }

    async fn scale_deployment(&self, body: &[u8]) -> Result<i32, Rejection> {
        let ScaleTarget {
            deployment_name,
            namespace,
            scale_num,
        } = parse(body)?;
        let replicas = self
            .deployments
            .scale(&deployment_name, &namespace, scale_num)
            .await?;
        Ok(replicas)
    }
}

/// Wraps a handler's result in the response envelope.
///
/// Rejections are rendered for the caller; failing to encode a successful
/// result is a service error.
fn respond<T: Serialize>(
    path: &str,
    msg: &'static str,
    result: Result<T, Rejection>,
) -> Result<Response<Body>, Error> {
    match result {
        Ok(data) => json_response(
            http::StatusCode::OK,
            &Envelope {
                msg: msg.to_string(),
                data: Some(data),
                code: None,
            },
        ),
        Err(rejection) => {
            let code = rejection.code();
            if code == ErrorCode::Unavailable {
                warn!(error = %rejection, %path, "Request failed");
            } else {
                info!(error = %rejection, %path, "Request rejected");
            }
            json_response(
                status(code),
                &Envelope::<()> {
                    msg: rejection.to_string(),
                    data: None,
                    code: Some(code),
                },
            )
        }
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, Rejection> {
    serde_json::from_slice(body).map_err(Into::into)
}

fn status(code: ErrorCode) -> http::StatusCode {
    match code {
        ErrorCode::NotFound => http::StatusCode::NOT_FOUND,
        ErrorCode::Unavailable => http::StatusCode::BAD_GATEWAY,
        ErrorCode::InvalidInput => http::StatusCode::BAD_REQUEST,
        ErrorCode::WriteConflict => http::StatusCode::CONFLICT,
    }
}

fn json_response<T: Serialize>(
    status: http::StatusCode,
    envelope: &Envelope<T>,
) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(envelope)?;
    Ok(Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("json response must be valid"))
}

// === impl Rejection ===

impl Rejection {
    fn code(&self) -> ErrorCode {
        match self {
            Self::Cluster(error) => error.code(),
            Self::Query { .. } | Self::Body(_) => ErrorCode::InvalidInput,
        }
    }
}

// === impl Query ===

impl Query {
    fn parse(query: Option<&str>) -> Self {
        let params = url::form_urlencoded::parse(query.unwrap_or_default().as_bytes())
            .into_owned()
            .collect();
        Self(params)
    }

    /// Missing parameters read as empty.
    fn get(&self, name: &str) -> &str {
        self.0.get(name).map(String::as_str).unwrap_or_default()
    }

    /// Missing parameters read as zero.
    fn int(&self, name: &'static str) -> Result<i64, Rejection> {
        match self.0.get(name).map(|v| v.trim()) {
            None | Some("") => Ok(0),
            Some(value) => value.parse().map_err(|_| Rejection::Query {
                name,
                value: value.to_string(),
            }),
        }
    }

    fn select(&self) -> Result<SelectQuery, Rejection> {
        Ok(SelectQuery::new(
            self.get("filter_name"),
            self.int("limit")?,
            self.int("page")?,
        ))
    }
}

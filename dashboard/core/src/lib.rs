#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cluster;
pub mod deployment;
mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod fake;
pub mod pod;
pub mod select;

pub use self::{
    cluster::{LogApi, NamespaceApi, ResourceApi, ScaleApi},
    deployment::{DeploymentCell, DeploymentRequest, Deployments},
    error::{BoxError, Error, ErrorCode, ResourceRef, Result},
    pod::{PodCell, Pods},
    select::{Listable, SelectQuery, Selection},
};
pub use kubedash_k8s_api as k8s;

use serde::Serialize;

/// The number of resources of one kind in a namespace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NamespaceCount {
    pub namespace: String,
    pub count: usize,
}

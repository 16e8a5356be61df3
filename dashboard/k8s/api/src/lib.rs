#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod quantity;

pub use self::quantity::K8sQuantity;
pub use k8s_openapi::{
    api::{
        self,
        apps::v1::{Deployment, DeploymentSpec},
        autoscaling::v1::{Scale, ScaleSpec},
        core::v1::{
            Container, ContainerPort, EnvVar, HTTPGetAction, Namespace, Pod, PodSpec,
            PodTemplateSpec, Probe, ResourceRequirements,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, ObjectMeta, Time},
        util::intstr::IntOrString,
    },
};
pub use kube::{Resource, ResourceExt};

/// Resource name keys used in container `requests`/`limits` maps.
pub mod resource_names {
    pub const CPU: &str = "cpu";
    pub const MEMORY: &str = "memory";
}

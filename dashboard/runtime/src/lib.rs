pub use kubedash_core as core;
pub use kubedash_k8s_api as k8s;

pub mod api;
mod args;
mod cluster;
pub mod server;

pub use self::{api::Api, args::Args, cluster::KubeCluster};

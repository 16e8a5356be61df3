use crate::{api::Api, cluster::KubeCluster, server};
use anyhow::{bail, Result};
use clap::Parser;
use std::net::SocketAddr;
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "kubedash", about = "An HTTP API over a cluster's Pods and Deployments")]
pub struct Args {
    #[clap(long, default_value = "kubedash=info,warn", env = "KUBEDASH_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    #[clap(long, default_value = "0.0.0.0:9090", env = "KUBEDASH_API_ADDR")]
    api_addr: SocketAddr,

    /// The maximum number of lines returned from a container's log.
    ///
    /// Zero returns the whole log.
    #[clap(long, default_value = "2000")]
    pod_log_tail_lines: u32,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            api_addr,
            pod_log_tail_lines,
        } = self;

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder())
            .with_client(client)
            .build()
            .await?;

        let tail_lines = (pod_log_tail_lines > 0).then(|| i64::from(pod_log_tail_lines));
        let api = Api::new(KubeCluster::new(runtime.client()), tail_lines);
        tokio::spawn(
            server::serve(api_addr, api, runtime.shutdown_handle()).instrument(info_span!("api")),
        );
        info!(?tail_lines, "Started");

        // Block the main thread on the shutdown signal. Once it fires, wait for in-flight requests
        // to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

use crate::api::Body;
use anyhow::Result;
use hyper::{body::Incoming, server::conn::http1, Request, Response};
use hyper_util::{
    rt::{TokioIo, TokioTimer},
    service::TowerToHyperService,
};
use kubedash_core::BoxError;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{debug, debug_span, info, instrument, warn, Instrument};

/// Serves `svc` over HTTP/1 on `addr` until `drain` is signaled.
///
/// In-flight connections are shut down gracefully and hold the drain open
/// until they complete.
#[instrument(skip_all, fields(port = %addr.port()))]
pub async fn serve<S>(addr: SocketAddr, svc: S, drain: drain::Watch) -> Result<()>
where
    S: tower::Service<Request<Incoming>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
{
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP API server listening");

    let shutdown = drain.clone().signaled();
    tokio::pin!(shutdown);
    loop {
        let (io, client) = tokio::select! {
            _release = &mut shutdown => {
                debug!("Shutting down");
                return Ok(());
            }
            res = listener.accept() => match res {
                Ok(conn) => conn,
                Err(error) => {
                    warn!(%error, "Failed to accept connection");
                    continue;
                }
            },
        };

        let svc = TowerToHyperService::new(svc.clone());
        let drain = drain.clone();
        tokio::spawn(
            async move {
                let conn = http1::Builder::new()
                    .timer(TokioTimer::new())
                    .serve_connection(TokioIo::new(io), svc);
                tokio::pin!(conn);
                tokio::select! {
                    res = &mut conn => {
                        if let Err(error) = res {
                            debug!(%error, "Connection failed");
                        }
                    }
                    release = drain.signaled() => {
                        conn.as_mut().graceful_shutdown();
                        if let Err(error) = release.release_after(conn).await {
                            debug!(%error, "Connection failed during shutdown");
                        }
                    }
                }
            }
            .instrument(debug_span!("conn", %client)),
        );
    }
}

//! Listener lifecycle: bind, accept one task per connection, and on
//! interrupt stop accepting and drain in-flight work within a bounded
//! grace period.

use std::time::Duration;

use axum::body::Body;
use axum::Router;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use tracing::{debug, info, warn};

use crate::{Config, StartupError};

pub async fn serve(
    config: &Config,
    app: Router,
    acceptor: Option<TlsAcceptor>,
) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| StartupError::Bind {
            addr: addr.clone(),
            source,
        })?;
    info!(addr = %addr, tls = acceptor.is_some(), "fmtd listening");

    let mut connections = JoinSet::new();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupt received, draining connections");
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, remote_addr)) => {
                        let app = app.clone();
                        let acceptor = acceptor.clone();
                        connections.spawn(async move {
                            let service = service_fn(move |request: Request<Incoming>| {
                                app.clone().oneshot(request.map(Body::new))
                            });
                            let builder = ConnBuilder::new(TokioExecutor::new());
                            let served = match acceptor {
                                Some(tls) => match tls.accept(stream).await {
                                    Ok(tls_stream) => {
                                        builder
                                            .serve_connection(TokioIo::new(tls_stream), service)
                                            .await
                                    }
                                    Err(e) => {
                                        debug!(remote_addr = %remote_addr, error = %e, "tls handshake failed");
                                        return;
                                    }
                                },
                                None => {
                                    builder
                                        .serve_connection(TokioIo::new(stream), service)
                                        .await
                                }
                            };
                            if let Err(e) = served {
                                debug!(remote_addr = %remote_addr, error = %e, "connection error");
                            }
                        });
                    }
                    Err(e) => warn!(error = %e, "accept failed"),
                }
            }
        }
    }

    // Stop accepting, then give in-flight connections the grace window.
    drop(listener);
    let grace = Duration::from_millis(config.shutdown_grace_ms);
    let drained = timeout(grace, async {
        while connections.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            grace_ms = config.shutdown_grace_ms,
            "grace period elapsed with connections still open"
        );
        connections.shutdown().await;
    }

    info!("shutdown complete");
    Ok(())
}

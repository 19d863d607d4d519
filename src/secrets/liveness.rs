//! Liveness endpoint.

use crate::infra::shutdown_signal::ShutdownSignal;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub const NOT_READY_BODY: &str = "Service is not ready yet";

/// Set once by the scheduler, read by the HTTP handler.
#[derive(Debug, Clone, Default)]
pub struct Readiness {
    ready: Arc<AtomicBool>,
}

impl Readiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flip to ready. Returns `true` only for the call that flipped it.
    pub fn mark_ready(&self) -> bool {
        let flipped = !self.ready.swap(true, Ordering::AcqRel);
        if flipped {
            info!("Keep-alive scheduled, reporting ready");
        }
        flipped
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }
}

pub fn build_routes(readiness: Readiness) -> Router {
    Router::new()
        .route("/liveness", get(liveness_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(readiness)
}

async fn liveness_handler(State(readiness): State<Readiness>) -> (StatusCode, &'static str) {
    debug!("Received liveness request");
    if readiness.is_ready() {
        (StatusCode::OK, "OK")
    } else {
        debug!("Returning a 500 status code for the liveness request");
        (StatusCode::INTERNAL_SERVER_ERROR, NOT_READY_BODY)
    }
}

/// A running liveness server.
pub struct LivenessServer {
    addr: SocketAddr,
    handle: JoinHandle<std::io::Result<()>>,
}

impl LivenessServer {
    /// Bind and serve until `shutdown` fires.
    pub async fn start(
        addr: SocketAddr,
        readiness: Readiness,
        shutdown: ShutdownSignal,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        info!("Liveness server listening on {}", addr);

        let app = build_routes(readiness);
        let handle = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.wait().await })
                .await
        });

        Ok(Self { addr, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Wait for the server task after shutdown was signalled.
    pub async fn join(self) {
        match self.handle.await {
            Ok(Ok(())) => debug!("Liveness server stopped"),
            Ok(Err(e)) => tracing::warn!("Liveness server failed: {}", e),
            Err(e) => tracing::warn!("Liveness server task panicked: {}", e),
        }
    }
}

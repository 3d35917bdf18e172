//! Stats endpoint: serves a finished profile as JSON
//!
//! The profile is serialized once at start. Serving runs on a private tokio
//! runtime so callers stay synchronous; `shutdown` is idempotent and returns
//! only after the listener is gone.

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::runtime::Runtime;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Result, TraceError};
use crate::profile::ProfileAggregate;

pub const PROFILE_ROUTE: &str = "/profile";

/// Resolved endpoint options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    /// 0 picks a free port
    pub port: u16,
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            shutdown_timeout: Duration::from_secs(2),
        }
    }
}

struct ProfileState {
    body: Bytes,
    served: mpsc::UnboundedSender<()>,
}

pub struct StatsServer {
    local_addr: SocketAddr,
    runtime: Option<Runtime>,
    task: Option<JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    served_rx: mpsc::UnboundedReceiver<()>,
    shutdown_timeout: Duration,
}

impl StatsServer {
    /// Bind the listener and start serving `profile` in the background
    pub fn start(config: &ServerConfig, profile: ProfileAggregate) -> Result<Self> {
        let body = Bytes::from(serde_json::to_vec(&profile)?);

        let addr = format!("{}:{}", config.host, config.port);
        let std_listener = StdTcpListener::bind(&addr).map_err(|source| TraceError::Bind {
            addr: addr.clone(),
            source,
        })?;
        std_listener.set_nonblocking(true)?;
        let local_addr = std_listener.local_addr()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("memtrace-stats")
            .enable_all()
            .build()?;
        let listener = {
            let _guard = runtime.enter();
            tokio::net::TcpListener::from_std(std_listener)?
        };

        let (served_tx, served_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(Arc::new(ProfileState {
            body,
            served: served_tx,
        }));

        let task = runtime.spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "stats endpoint stopped with an error");
            }
        });

        info!(addr = %local_addr, events = profile.total_events(), "stats endpoint listening");
        Ok(Self {
            local_addr,
            runtime: Some(runtime),
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            served_rx,
            shutdown_timeout: config.shutdown_timeout,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn url(&self) -> String {
        format!("http://{}{}", self.local_addr, PROFILE_ROUTE)
    }

    pub fn is_running(&self) -> bool {
        self.runtime.is_some()
    }

    /// Block until Ctrl-C, or until the profile was served when `once` is set,
    /// then shut down
    pub fn wait(&mut self, once: bool) -> Result<()> {
        let Some(runtime) = self.runtime.as_ref() else {
            return Ok(());
        };
        let served = &mut self.served_rx;

        runtime.block_on(async {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    res?;
                    info!("interrupted, stopping stats endpoint");
                }
                _ = async {
                    if once {
                        served.recv().await
                    } else {
                        std::future::pending().await
                    }
                } => {
                    debug!("profile served");
                }
            }
            Ok::<(), TraceError>(())
        })?;

        self.shutdown();
        Ok(())
    }

    /// Stop serving and release the port; calling it again is a no-op
    pub fn shutdown(&mut self) {
        let Some(runtime) = self.runtime.take() else {
            return;
        };
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        let timeout = self.shutdown_timeout;
        if let Some(mut task) = self.task.take() {
            let finished =
                runtime.block_on(async { tokio::time::timeout(timeout, &mut task).await.is_ok() });
            if !finished {
                warn!(?timeout, "graceful shutdown timed out, aborting");
                task.abort();
            }
        }

        runtime.shutdown_timeout(timeout);
        debug!(addr = %self.local_addr, "stats endpoint stopped");
    }
}

impl Drop for StatsServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn router(state: Arc<ProfileState>) -> Router {
    Router::new()
        .route(PROFILE_ROUTE, get(serve_profile))
        .fallback(not_found)
        .with_state(state)
}

async fn serve_profile(State(state): State<Arc<ProfileState>>) -> Response {
    let _ = state.served.send(());
    (
        [(header::CONTENT_TYPE, "application/json")],
        state.body.clone(),
    )
        .into_response()
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

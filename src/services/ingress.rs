/// Hook Ingress
/// Loopback HTTP listener for hook scripts. Each POST carries one report;
/// the reply says whether it was forwarded to the notification bus or
/// suppressed as a duplicate. Runs axum on its own thread and tokio runtime
/// so the session manager never waits on the network.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;

use crate::config::{hook_url_for, IngressConfig};
use crate::error::IngressError;
use crate::models::{HookEvent, HookReport, Routing, SlotId};
use crate::services::dedup::{DedupCache, DedupDecision, DedupKey};
use crate::services::notification_bus::NotificationBus;

/// Answers whether a slot currently hosts a live session
pub trait SlotDirectory: Send + Sync + 'static {
    fn is_live(&self, slot: SlotId) -> bool;
}

/// Treats every real slot as live; for an ingress running in a process
/// that hosts no sessions
#[derive(Debug, Default, Clone, Copy)]
pub struct AnySlot;

impl SlotDirectory for AnySlot {
    fn is_live(&self, slot: SlotId) -> bool {
        !slot.is_sentinel()
    }
}

/// Reply body for an accepted request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookAck {
    pub forwarded: bool,
    pub duplicate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default)]
    pub unroutable: bool,
}

impl HookAck {
    fn forwarded(id: u64, routing: Routing) -> Self {
        Self {
            forwarded: true,
            duplicate: false,
            id: Some(id),
            unroutable: routing == Routing::Unroutable,
        }
    }

    fn duplicate() -> Self {
        Self {
            forwarded: false,
            duplicate: true,
            id: None,
            unroutable: false,
        }
    }
}

struct IngressState {
    dedup: Mutex<DedupCache>,
    bus: Arc<NotificationBus>,
    directory: Arc<dyn SlotDirectory>,
}

pub struct IngressServer {
    addr: SocketAddr,
    path: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl IngressServer {
    /// Bind the listener and start serving.
    ///
    /// The port is bound before this returns, so a taken port is reported
    /// here rather than lost on the server thread. Port 0 picks a free one;
    /// see `local_addr`. Only loopback hosts are accepted; reports are not
    /// authenticated.
    pub fn start(
        config: &IngressConfig,
        dedup: DedupCache,
        bus: Arc<NotificationBus>,
        directory: Arc<dyn SlotDirectory>,
    ) -> Result<Self, IngressError> {
        let requested = config.socket_addr();
        if !requested.ip().is_loopback() {
            return Err(IngressError::NotLoopback(requested));
        }
        let bind_err = |source| IngressError::Bind {
            addr: requested,
            source,
        };
        let listener = std::net::TcpListener::bind(requested).map_err(bind_err)?;
        listener.set_nonblocking(true).map_err(bind_err)?;
        let addr = listener.local_addr().map_err(bind_err)?;

        let path = if config.path.starts_with('/') {
            config.path.clone()
        } else {
            format!("/{}", config.path)
        };

        let state = Arc::new(IngressState {
            dedup: Mutex::new(dedup),
            bus,
            directory,
        });
        let app = router(&path, state);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("hook-ingress-worker")
            .enable_all()
            .build()
            .map_err(bind_err)?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = thread::Builder::new()
            .name("hook-ingress".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(e) => {
                            log::error!("Hook ingress could not adopt listener: {}", e);
                            return;
                        }
                    };
                    let served = axum::serve(listener, app)
                        .with_graceful_shutdown(async move {
                            let _ = shutdown_rx.await;
                        })
                        .await;
                    if let Err(e) = served {
                        log::error!("Hook ingress stopped: {}", e);
                    }
                });
            })
            .map_err(bind_err)?;

        log::info!("Hook ingress listening on {}", hook_url_for(addr, &path));
        Ok(Self {
            addr,
            path,
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// URL hook scripts should POST to
    pub fn url(&self) -> String {
        hook_url_for(self.addr, &self.path)
    }

    /// Stop accepting and wait for in-flight requests
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            log::info!("Hook ingress on {} stopped", self.addr);
        }
    }
}

impl Drop for IngressServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn router(path: &str, state: Arc<IngressState>) -> Router {
    Router::new()
        .route(path, post(handle_report))
        .with_state(state)
}

fn reject(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn handle_report(
    State(state): State<Arc<IngressState>>,
    body: Result<Json<HookReport>, JsonRejection>,
) -> Response {
    let report = match body {
        Ok(Json(report)) => report,
        Err(rejection) => {
            log::warn!("Rejected hook report: {}", rejection.body_text());
            return reject(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let event = match HookEvent::try_from(report) {
        Ok(event) => event,
        Err(e) => {
            log::warn!("Rejected hook report: {}", e);
            return reject(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    let key = DedupKey::for_event(&event);
    if state.dedup.lock().check(key.clone()) == DedupDecision::Suppress {
        log::debug!(
            "Suppressed duplicate {} for terminal {}",
            event.kind.name(),
            event.terminal_id
        );
        return (StatusCode::OK, Json(HookAck::duplicate())).into_response();
    }

    let routing = if !event.slot.is_sentinel() && state.directory.is_live(event.slot) {
        Routing::Routable
    } else {
        Routing::Unroutable
    };

    let bus = state.bus.clone();
    let appended = tokio::task::spawn_blocking(move || bus.append(&event, routing)).await;
    match appended {
        Ok(Ok(record)) => {
            log::info!(
                "Forwarded {} for terminal {} as #{}",
                record.kind.name(),
                record.terminal_id,
                record.id
            );
            (StatusCode::OK, Json(HookAck::forwarded(record.id, routing))).into_response()
        }
        Ok(Err(e)) => {
            state.dedup.lock().forget(&key);
            log::error!("Could not store hook report: {}", e);
            reject(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e) => {
            state.dedup.lock().forget(&key);
            log::error!("Hook report store task failed: {}", e);
            reject(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

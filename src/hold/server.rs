use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

use crate::hold::HoldMap;

/// First candidate port for the control plane; incremented until a bind
/// succeeds.
pub const HOLD_PORT_START: u16 = 11132;

const HOLD_PORT_ATTEMPTS: u16 = 100;

/// The running HTTP control plane for a [`HoldMap`].
pub struct HoldServer {
    port: u16,
    handle: JoinHandle<()>,
}

impl HoldServer {
    /// Bind and start serving. The returned server reports the actually
    /// bound port, which is only known after the bind.
    pub async fn start(holds: HoldMap) -> std::io::Result<Self> {
        let listener = bind_first_free().await?;
        let port = listener.local_addr()?.port();
        let app = router(holds);

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!(error = %e, "hold coordinator server failed");
            }
        });

        tracing::info!(port, "hold coordinator listening");
        Ok(Self { port, handle })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for HoldServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The control-plane routes, exposed separately so tests can drive the
/// handlers without a listener.
pub fn router(holds: HoldMap) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/release/:service", get(release_handler))
        .route("/release-all", get(release_all_handler))
        .route("/list", get(list_handler))
        .layer(cors)
        .with_state(holds)
}

async fn bind_first_free() -> std::io::Result<TcpListener> {
    let mut last_err = None;
    for port in HOLD_PORT_START..HOLD_PORT_START + HOLD_PORT_ATTEMPTS {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => {
                tracing::debug!(port, error = %e, "hold coordinator port taken");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrInUse, "no free control-plane port")
    }))
}

async fn release_handler(
    State(holds): State<HoldMap>,
    Path(service): Path<String>,
) -> Json<Option<String>> {
    Json(holds.release(&service))
}

async fn release_all_handler(State(holds): State<HoldMap>) -> Json<Vec<String>> {
    Json(holds.release_all())
}

async fn list_handler(State(holds): State<HoldMap>) -> Json<Vec<String>> {
    Json(holds.list())
}

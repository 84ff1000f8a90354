//! Test page server
//!
//! Serves test pages from the run's working directory and the page client
//! script, and routes page socket messages to browser runners. The server is
//! bound once per run and shut down at wrap-up.

mod socket;

pub use socket::{BrowserEvent, BrowserRegistry, PageMessage};

use axum::extract::{Path, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use std::path::{Component, PathBuf};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{debug, error, info};

use crate::error::OrchestratorError;

const CLIENT_JS: &str = include_str!("client.js");

/// Open page sockets keep graceful shutdown waiting; this bounds it
const STOP_GRACE: Duration = Duration::from_secs(2);

/// Shared state of the router
#[derive(Clone)]
pub struct ServerState {
    pub cwd: PathBuf,
    pub registry: BrowserRegistry,
    /// Page `GET /{id}` redirects to
    pub default_page: String,
}

/// Build the application router
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/testfleet/client.js", get(client_js))
        .route("/testfleet/socket/{id}", get(socket::socket_handler))
        .route("/{id}", get(page_root))
        .route("/{id}/{*path}", get(serve_page))
        .fallback(fallback)
        .with_state(state)
}

async fn client_js() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/javascript")], CLIENT_JS)
}

async fn page_root(Path(id): Path<usize>, State(state): State<ServerState>) -> Redirect {
    Redirect::temporary(&format!("/{id}/{}", state.default_page.trim_start_matches('/')))
}

async fn serve_page(
    Path((_id, path)): Path<(usize, String)>,
    State(state): State<ServerState>,
    request: Request,
) -> Response {
    let Some(file) = safe_join(&state.cwd, &path) else {
        debug!(%path, "rejected page path");
        return (StatusCode::BAD_REQUEST, "invalid path").into_response();
    };

    match ServeFile::new(file).oneshot(request).await {
        Ok(response) => response.into_response(),
        Err(never) => match never {},
    }
}

async fn fallback() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "not found")
}

/// Join a request path onto `root`; `None` if it would leave `root`
pub fn safe_join(root: &std::path::Path, path: &str) -> Option<PathBuf> {
    let mut joined = root.to_path_buf();
    for component in std::path::Path::new(path).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(joined)
}

/// A bound, running test page server
pub struct TestServer {
    port: u16,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl TestServer {
    /// Bind `127.0.0.1:port` and start serving.
    ///
    /// A bind failure is returned directly. Errors after startup are sent
    /// on `fatal_tx`.
    pub async fn bind(
        port: u16,
        state: ServerState,
        fatal_tx: mpsc::UnboundedSender<OrchestratorError>,
    ) -> Result<Self, OrchestratorError> {
        let bind_error = |e: std::io::Error| OrchestratorError::ServerBind {
            port,
            message: e.to_string(),
        };
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(bind_error)?;
        let port = listener.local_addr().map_err(bind_error)?.port();
        info!(port, "test server listening");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let app = router(state);
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = served {
                error!(error = %e, "test server failed");
                let _ = fatal_tx.send(OrchestratorError::Server(e.to_string()));
            }
        });

        Ok(Self {
            port,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    /// Actual bound port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Shut down, waiting at most a short grace period
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(STOP_GRACE, &mut self.task).await.is_err() {
            debug!("test server did not drain, aborting");
            self.task.abort();
        }
        info!(port = self.port, "test server stopped");
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

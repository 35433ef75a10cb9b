use std::path::Path;

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use slide_proto::config::StaticFolder;
use slide_proto::protocol::Command;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::core::{DaemonEvent, ShowSummary};
use crate::ws;

const INDEX_HTML: &str = include_str!("../assets/index.html");

#[derive(Clone)]
pub struct HttpState {
    pub event_tx: mpsc::Sender<DaemonEvent>,
    pub summary: watch::Receiver<ShowSummary>,
}

/// Viewer page, WebSocket, control API and static mounts. The slide folder
/// (folder mode) is served at the root.
pub fn router(
    state: HttpState,
    static_folders: &[StaticFolder],
    slide_folder: Option<&Path>,
) -> Router {
    let mut app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws::ws_handler))
        .route("/api/state", get(get_state))
        .route("/api/next", post(next))
        .route("/api/previous", post(previous))
        .route("/api/pause", post(pause))
        .route("/api/play", post(play))
        .route("/api/speed/:value", post(speed));

    for mount in static_folders {
        let route = mount.route.trim_end_matches('/');
        if route.is_empty() {
            app = app.fallback_service(ServeDir::new(&mount.path));
        } else {
            app = app.nest_service(route, ServeDir::new(&mount.path));
        }
    }
    if let Some(folder) = slide_folder {
        app = app.fallback_service(ServeDir::new(folder));
    }

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `app` until `shutdown` is cancelled.
pub fn start_server(
    bind_address: String,
    port: u16,
    app: Router,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match tokio::net::TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server {}: {}", addr, e);
                shutdown.cancel();
                return;
            }
        };

        info!("HTTP server listening at {}", addr);

        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
        {
            error!("HTTP server error: {}", e);
        }
    })
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn get_state(State(state): State<HttpState>) -> Json<ShowSummary> {
    Json(state.summary.borrow().clone())
}

async fn next(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Next).await
}

async fn previous(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Previous).await
}

async fn pause(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Pause).await
}

async fn play(State(state): State<HttpState>) -> StatusCode {
    send_command(&state, Command::Play).await
}

async fn speed(State(state): State<HttpState>, UrlPath(value): UrlPath<f64>) -> StatusCode {
    if !value.is_finite() {
        return StatusCode::BAD_REQUEST;
    }
    send_command(&state, Command::Speed { value }).await
}

async fn send_command(state: &HttpState, cmd: Command) -> StatusCode {
    match state.event_tx.send(DaemonEvent::ViewerCommand(cmd)).await {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => {
            warn!("Core is gone, dropping {:?}", cmd);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

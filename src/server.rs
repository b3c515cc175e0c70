//! HTTP server for deployment progress and triggers.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/projects/{project}/log` | WebSocket stream of deployment progress |
//! | `POST` | `/projects/{project}/deploy` | Start a deployment in the background |
//!
//! A log socket receives one text frame per progress line, ending with
//! `<<success` or `<<error` when the deployment completes. Lines emitted
//! before anyone connected are replayed on connect.
//!
//! Error responses share one shape:
//!
//! ```json
//! { "error": { "code": "conflict", "message": "techmod is already deploying" } }
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::db::{self, SqliteDatabase};
use crate::deploy::{DeployRequest, Deployer};
use crate::realtime::ConnectionManager;
use crate::schema::JsonSchemaValidator;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    connections: Arc<ConnectionManager>,
    /// `None` serves only the log relay; deploy requests are refused.
    deployer: Option<Arc<Deployer>>,
    /// Projects with a deployment in flight.
    running: Arc<Mutex<HashSet<String>>>,
}

impl AppState {
    pub fn new(deployer: Arc<Deployer>) -> Self {
        Self {
            connections: deployer.connections().clone(),
            deployer: Some(deployer),
            running: Arc::default(),
        }
    }

    pub fn relay_only(connections: Arc<ConnectionManager>) -> Self {
        Self {
            connections,
            deployer: None,
            running: Arc::default(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/projects/{project}/log", get(handle_log_socket))
        .route("/projects/{project}/deploy", post(handle_deploy))
        .layer(cors)
        .with_state(state)
}

/// Opens the database, builds the deployer and serves until the process is
/// terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    crate::migrate::create_schema(&pool).await?;

    let deployer = Deployer::new(
        config,
        Arc::new(SqliteDatabase::new(pool)),
        Arc::new(ConnectionManager::new()),
        Arc::new(JsonSchemaValidator::new()?),
    );
    let app = router(AppState::new(Arc::new(deployer)));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn handle_log_socket(
    ws: WebSocketUpgrade,
    Path(project): Path<String>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay_to_socket(socket, state.connections, project))
}

/// Pumps observer messages into the socket until either side is done.
async fn relay_to_socket(socket: WebSocket, connections: Arc<ConnectionManager>, project: String) {
    let mut observer = connections.connect(&project).await;
    let id = observer.id();
    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            message = observer.recv() => match message {
                Some(text) => {
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    connections.disconnect(id).await;
    tracing::debug!(project = %project, "log socket closed");
}

#[derive(Debug, Deserialize)]
struct DeployBody {
    url: String,
    #[serde(default)]
    branch: Option<String>,
    #[serde(default)]
    root: Option<String>,
    #[serde(default)]
    version_name: Option<String>,
}

#[derive(Serialize)]
struct DeployAccepted {
    deployment_id: String,
    project: String,
}

async fn handle_deploy(
    Path(project): Path<String>,
    State(state): State<AppState>,
    Json(body): Json<DeployBody>,
) -> Result<(StatusCode, Json<DeployAccepted>), AppError> {
    let Some(deployer) = state.deployer.clone() else {
        return Err(AppError {
            status: StatusCode::SERVICE_UNAVAILABLE,
            code: "unavailable",
            message: "deployments are not enabled on this server".into(),
        });
    };
    if body.url.trim().is_empty() {
        return Err(bad_request("url must not be empty"));
    }

    if !state.running.lock().await.insert(project.clone()) {
        return Err(AppError {
            status: StatusCode::CONFLICT,
            code: "conflict",
            message: format!("{project} is already deploying"),
        });
    }

    let deployment_id = uuid::Uuid::new_v4().to_string();
    let request = DeployRequest {
        project: project.clone(),
        url: body.url,
        branch: body.branch,
        root: body.root,
        version_name: body.version_name,
    };

    let running = state.running.clone();
    let id = deployment_id.clone();
    tokio::spawn(async move {
        let project = request.project.clone();
        match deployer.deploy_with_id(id, request).await {
            Ok(outcome) => tracing::info!(project = %project, success = outcome.success, "background deployment done"),
            Err(e) => tracing::error!(project = %project, "deployment rejected: {e:#}"),
        }
        running.lock().await.remove(&project);
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(DeployAccepted {
            deployment_id,
            project,
        }),
    ))
}

use crate::core::DaemonEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use radio_proto::form::{favicon_url, FormError, StationForm};
use radio_proto::links::{sections, Section};
use radio_proto::protocol::{Command, DaemonState};
use radio_proto::state::StateManager;
use radio_proto::station::StationRecord;
use radio_proto::store::StoreError;
use serde::Serialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("no station with id '{0}'")]
    NotFound(String),
    #[error(transparent)]
    Invalid(#[from] FormError),
    #[error(transparent)]
    Conflict(#[from] StoreError),
    #[error("daemon event loop is gone")]
    Unavailable,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Invalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        };
        let body = Json(ErrorBody {
            error: self.to_string(),
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Serialize)]
struct StationView {
    #[serde(flatten)]
    station: StationRecord,
    favicon: String,
}

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_manager: Arc<StateManager>,
    event_tx: mpsc::Sender<DaemonEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let app = router(HttpState {
            state_manager,
            event_tx,
        });

        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, app).await {
            error!("HTTP server error: {}", e);
        }
    })
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/stations", get(list_stations).post(add_station))
        .route("/api/stations/:id", put(update_station).delete(remove_station))
        .route("/api/toggle/:id", post(toggle))
        .route("/api/stop", post(stop))
        .route("/api/volume/:pct", get(set_volume).post(set_volume))
        .route("/api/volume", get(get_volume))
        .route("/api/links", get(links))
        // The homepage is served from elsewhere and calls in from the browser.
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
        .with_state(state)
}

impl HttpState {
    async fn send(&self, cmd: Command) -> Result<(), ApiError> {
        self.event_tx
            .send(DaemonEvent::ClientCommand(cmd))
            .await
            .map_err(|_| {
                error!("HTTP API: event loop closed");
                ApiError::Unavailable
            })
    }

    async fn require(&self, id: &str) -> Result<StationRecord, ApiError> {
        let state = self.state_manager.get_state().await;
        state
            .stations
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }
}

async fn get_state(State(state): State<HttpState>) -> Json<DaemonState> {
    Json(state.state_manager.get_state().await)
}

async fn list_stations(State(state): State<HttpState>) -> Json<Vec<StationView>> {
    let stations = state.state_manager.get_state().await.stations;
    Json(
        stations
            .into_iter()
            .map(|station| StationView {
                favicon: favicon_url(&station.domain),
                station,
            })
            .collect(),
    )
}

async fn add_station(
    State(state): State<HttpState>,
    Json(form): Json<StationForm>,
) -> Result<(StatusCode, Json<StationRecord>), ApiError> {
    // The event loop mints the id against the live list.
    let station = form.into_record(String::new())?;
    info!("HTTP API: add station '{}'", station.name);
    let (reply, answer) = oneshot::channel();
    state
        .event_tx
        .send(DaemonEvent::AddStation { station, reply })
        .await
        .map_err(|_| ApiError::Unavailable)?;
    let record = answer.await.map_err(|_| ApiError::Unavailable)??;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn update_station(
    State(state): State<HttpState>,
    Path(id): Path<String>,
    Json(form): Json<StationForm>,
) -> Result<Json<StationRecord>, ApiError> {
    state.require(&id).await?;
    let record = form.into_record(id)?;
    info!("HTTP API: update station {}", record.id);
    state
        .send(Command::UpdateStation {
            station: record.clone(),
        })
        .await?;
    Ok(Json(record))
}

async fn remove_station(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.require(&id).await?;
    info!("HTTP API: remove station {}", id);
    state.send(Command::RemoveStation { id }).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle(
    State(state): State<HttpState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.require(&id).await?;
    info!("HTTP API: toggle {}", id);
    state.send(Command::TogglePlay { id }).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn stop(State(state): State<HttpState>) -> Result<StatusCode, ApiError> {
    info!("HTTP API: Stop");
    state.send(Command::Stop).await?;
    Ok(StatusCode::OK)
}

async fn set_volume(
    State(state): State<HttpState>,
    Path(pct): Path<u8>,
) -> Result<StatusCode, ApiError> {
    let value = (pct as f32 / 100.0).clamp(0.0, 1.0);
    info!("HTTP API: Set volume to {}%", pct);
    state.send(Command::Volume { value }).await?;
    Ok(StatusCode::OK)
}

async fn get_volume(State(state): State<HttpState>) -> Json<VolumeStatus> {
    let daemon_state = state.state_manager.get_state().await;
    let volume = (daemon_state.volume * 100.0).round() as u8;
    Json(VolumeStatus { volume })
}

async fn links() -> Json<Vec<Section>> {
    Json(sections())
}

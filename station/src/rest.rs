use crate::clock::StationClock;
use crate::cloud::SharedRegistry;
use crate::property::{Permission, Property, Value, ValueKind};
use crate::summary::DailySummary;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::warn;

#[derive(Clone)]
struct AppState {
    registry: SharedRegistry,
    clock: StationClock,
}

/// One property as the API exposes it
#[derive(Debug, Serialize)]
pub struct PropertyView {
    pub name: String,
    pub kind: ValueKind,
    pub permission: Permission,
    pub update_policy: String,
    pub has_callback: bool,
    pub last_value: Value,
}

impl From<&Property> for PropertyView {
    fn from(p: &Property) -> Self {
        Self {
            name: p.name().to_string(),
            kind: p.kind(),
            permission: p.permission(),
            update_policy: p.policy().to_string(),
            has_callback: p.has_callback(),
            last_value: p.value().clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PropertiesResponse {
    pub data: Vec<PropertyView>,
    pub total: usize,
    pub clock_synced: bool,
}

pub fn create_router(registry: SharedRegistry, clock: StationClock) -> Router {
    let state = AppState { registry, clock };

    Router::new()
        .route("/api/v1/properties", get(list_properties))
        .route("/api/v1/properties/:name", get(get_property))
        .route("/api/v1/summary", get(get_summary))
        .with_state(state)
}

async fn list_properties(State(state): State<AppState>) -> Json<PropertiesResponse> {
    let registry = state.registry.lock().await;
    let data: Vec<PropertyView> = registry.iter().map(PropertyView::from).collect();

    Json(PropertiesResponse {
        total: data.len(),
        data,
        clock_synced: state.clock.is_synced(),
    })
}

async fn get_property(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<PropertyView>, AppError> {
    let registry = state.registry.lock().await;
    let view = registry.get(&name).map(PropertyView::from);
    view.map(Json).ok_or(AppError::NotFound(name))
}

async fn get_summary(State(state): State<AppState>) -> Json<DailySummary> {
    let registry = state.registry.lock().await;
    Json(DailySummary::from_registry(&registry, state.clock.today()))
}

enum AppError {
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::NotFound(name) => {
                warn!("API request for unknown property {}", name);
                (StatusCode::NOT_FOUND, format!("Unknown property: {}", name)).into_response()
            }
        }
    }
}

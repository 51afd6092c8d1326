use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_derive::{Deserialize, Serialize};
use tracing::{info, warn};

use proxy_drain::registry::{ProxyEntry, ProxyHealth, ProxyState};

use super::AppState;

#[derive(Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

/// The body of a manual state override. `max_players`, when given, is written together
/// with the state.
#[derive(Serialize, Deserialize, Debug)]
pub struct StateRequestBody {
    pub state: String,
    #[serde(default)]
    pub max_players: Option<u32>,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

pub async fn list_proxies(State(state): State<AppState>) -> Json<Vec<ProxyEntry>> {
    Json(state.registry.snapshot())
}

pub async fn get_proxy(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ProxyEntry>, ApiError> {
    state
        .registry
        .entry(&name)
        .map(Json)
        .ok_or_else(|| not_found(&name))
}

/// Force a proxy into a state, regardless of the drain protocol. An unknown proxy is
/// registered by the override.
pub async fn put_proxy_state(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(payload): Json<StateRequestBody>,
) -> Result<Json<ProxyEntry>, ApiError> {
    let new_state: ProxyState = payload.state.parse().map_err(|err| {
        warn!(proxy = name.as_str(), "rejected manual override: {}", err);
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("{}", err),
            }),
        )
    })?;

    match payload.max_players {
        Some(max_players) => {
            let health = ProxyHealth {
                state: new_state,
                max_players,
            };
            let previous = state.registry.set_health(&name, health);
            info!(
                proxy = name.as_str(),
                ?previous,
                state = %new_state,
                max_players,
                "manual proxy override"
            );
        }
        None => {
            let previous = state.registry.set_state(&name, new_state);
            info!(
                proxy = name.as_str(),
                ?previous,
                state = %new_state,
                "manual proxy state override"
            );
        }
    }
    metrics::counter!("proxy_drain_manual_overrides_total", "state" => new_state.as_str())
        .increment(1);

    state
        .registry
        .entry(&name)
        .map(Json)
        .ok_or_else(|| not_found(&name))
}

fn not_found(name: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: format!("unknown proxy {}", name),
        }),
    )
}

use axum::{extract::State, http::StatusCode, Json};
use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use proxy_drain::lifecycle::{LifecycleEvent, ServiceUpdate};

use super::AppState;

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct LifecycleResponse {
    pub veto: bool,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct UpdateResponse {
    pub drain: String,
}

/// The body of a request reporting a service removed from the cluster.
#[derive(Serialize, Deserialize, Debug)]
pub struct DeletedRequestBody {
    pub service: String,
}

pub async fn post_lifecycle(
    State(state): State<AppState>,
    Json(event): Json<LifecycleEvent>,
) -> Json<LifecycleResponse> {
    debug!("received lifecycle event: {:?}", event);

    let verdict = state.interceptor.handle(&event);

    Json(LifecycleResponse {
        veto: verdict.vetoed(),
    })
}

pub async fn post_update(
    State(state): State<AppState>,
    Json(update): Json<ServiceUpdate>,
) -> Json<UpdateResponse> {
    debug!("received service update: {:?}", update);

    state.watcher.record_capacity(&update);
    let progress = state.watcher.handle(&update).await;

    Json(UpdateResponse {
        drain: progress.as_str().to_owned(),
    })
}

pub async fn post_deleted(
    State(state): State<AppState>,
    Json(payload): Json<DeletedRequestBody>,
) -> StatusCode {
    state.watcher.on_service_deleted(&payload.service);
    StatusCode::NO_CONTENT
}

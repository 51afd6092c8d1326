use std::time::Instant;

use axum::{
    body::Body, extract::MatchedPath, http::Request, middleware::Next, response::IntoResponse,
    routing::get, Router,
};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};

/// Lifecycle transitions seen for proxies, labelled by `decision` (allow, veto, ignore).
pub const LIFECYCLE_DECISIONS: &str = "proxy_drain_lifecycle_decisions_total";
/// Agent-check requests served, labelled by the reported `state` (or `unknown`).
pub const AGENT_CHECKS: &str = "proxy_drain_agent_checks_total";
/// Agent-check connections that failed before a response was written.
pub const AGENT_CHECK_ERRORS: &str = "proxy_drain_agent_check_errors_total";
/// Deferred stop requests sent to the orchestrator, labelled by `outcome`.
pub const STOP_REQUESTS: &str = "proxy_drain_stop_requests_total";
/// Event and admin API requests, labelled by `method`, `route` and `status`.
pub const API_REQUESTS: &str = "proxy_drain_api_requests_total";
/// Event and admin API latency. Lifecycle events are answered inline with the
/// orchestrator's dispatch, so this is the latency the orchestrator waits on.
pub const API_REQUEST_DURATION: &str = "proxy_drain_api_request_duration_seconds";

const API_LATENCY_SECONDS: &[f64] = &[0.0005, 0.001, 0.0025, 0.005, 0.01, 0.05, 0.25, 1.0];

/// Add a `/metrics` route exporting everything recorded through the `metrics` facade,
/// and record request metrics for every route of `router`.
pub fn setup_metrics_routes(router: Router) -> Result<Router, BuildError> {
    let recorder_handle = setup_metrics_recorder()?;

    Ok(router
        .route(
            "/metrics",
            get(move || std::future::ready(recorder_handle.render())),
        )
        .layer(axum::middleware::from_fn(track_api_requests)))
}

pub fn setup_metrics_recorder() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(API_REQUEST_DURATION.to_owned()),
            API_LATENCY_SECONDS,
        )?
        .install_recorder()
}

/// Middleware recording count and latency of API requests, keyed by the matched route so
/// proxy names in paths do not become labels.
pub async fn track_api_requests(req: Request<Body>, next: Next) -> impl IntoResponse {
    let start = Instant::now();

    let route = match req.extensions().get::<MatchedPath>() {
        Some(matched_path) => matched_path.as_str().to_owned(),
        None => "unmatched".to_owned(),
    };
    let method = req.method().to_string();

    let response = next.run(req).await;

    let labels = [
        ("method", method),
        ("route", route),
        ("status", response.status().as_u16().to_string()),
    ];
    metrics::counter!(API_REQUESTS, &labels).increment(1);
    metrics::histogram!(API_REQUEST_DURATION, &labels).record(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::http::StatusCode;
    use tower::ServiceExt; // for `oneshot`

    #[tokio::test]
    async fn test_tracked_routes_still_respond() {
        let app = Router::new()
            .route("/proxies/:name", get(|| async { "lobby" }))
            .layer(axum::middleware::from_fn(track_api_requests));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/proxies/lobby-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::builder().uri("/nowhere").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

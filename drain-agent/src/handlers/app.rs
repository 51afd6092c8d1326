use axum::{routing, Router};

use proxy_drain::interceptor::LifecycleInterceptor;
use proxy_drain::registry::ProxyRegistry;
use proxy_drain::watcher::CapacityWatcher;

use super::{events, proxies};

/// Everything the handlers share. All fields are cheap handles to the same registry.
#[derive(Clone)]
pub struct AppState {
    pub registry: ProxyRegistry,
    pub interceptor: LifecycleInterceptor,
    pub watcher: CapacityWatcher,
}

pub fn add_routes(router: Router, state: AppState) -> Router {
    let api = Router::new()
        .route("/events/lifecycle", routing::post(events::post_lifecycle))
        .route("/events/update", routing::post(events::post_update))
        .route("/events/deleted", routing::post(events::post_deleted))
        .route("/proxies", routing::get(proxies::list_proxies))
        .route("/proxies/:name", routing::get(proxies::get_proxy))
        .route("/proxies/:name/state", routing::put(proxies::put_proxy_state))
        .with_state(state);

    router
        .route("/", routing::get(index))
        .route("/_readiness", routing::get(index))
        .route("/_liveness", routing::get(index)) // No async loop to report on, just check axum health
        .merge(api)
}

pub async fn index() -> &'static str {
    "proxy drain agent"
}

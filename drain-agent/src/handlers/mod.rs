mod app;
mod events;
mod proxies;

pub use app::{add_routes, index, AppState};

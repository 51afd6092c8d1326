pub mod agent_check;
pub mod error;
pub mod interceptor;
pub mod lifecycle;
pub mod metrics;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod test_utils;
pub mod watcher;

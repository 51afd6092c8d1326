use std::sync::Arc;

use tracing::{debug, error, info};

use crate::lifecycle::ServiceUpdate;
use crate::metrics::STOP_REQUESTS;
use crate::orchestrator::Orchestrator;
use crate::registry::{ProxyHealth, ProxyRegistry, ProxyState};

/// What a service update did to a drain in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainProgress {
    /// The service is not waiting for a deferred stop.
    NotDraining,
    /// Players are still connected.
    Occupied(u32),
    /// Another update already issued the stop for this drain cycle.
    AlreadyClaimed,
    /// The orchestrator accepted the stop; the proxy is now down.
    Stopped,
    /// The stop could not be delivered; the drain stays pending.
    StopFailed,
}

impl DrainProgress {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainProgress::NotDraining => "not_draining",
            DrainProgress::Occupied(_) => "occupied",
            DrainProgress::AlreadyClaimed => "already_claimed",
            DrainProgress::Stopped => "stopped",
            DrainProgress::StopFailed => "stop_failed",
        }
    }
}

/// Completes drains: once a draining proxy reports zero players, it is marked down and the
/// orchestrator is asked to stop it for real.
#[derive(Clone)]
pub struct CapacityWatcher {
    registry: ProxyRegistry,
    orchestrator: Arc<dyn Orchestrator>,
}

impl CapacityWatcher {
    pub fn new(registry: ProxyRegistry, orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            registry,
            orchestrator,
        }
    }

    /// Record the capacity a known proxy reports. Unknown services are ignored.
    pub fn record_capacity(&self, update: &ServiceUpdate) {
        if let Some(max_players) = update.max_players {
            if self.registry.set_max_players(&update.service, max_players) {
                debug!(
                    proxy = update.service.as_str(),
                    max_players,
                    "updated proxy capacity"
                );
            }
        }
    }

    pub async fn handle(&self, update: &ServiceUpdate) -> DrainProgress {
        let proxy = update.service.as_str();

        if !self.registry.is_awaiting_stop(proxy) {
            return DrainProgress::NotDraining;
        }

        if update.occupancy > 0 {
            debug!(proxy, occupancy = update.occupancy, "proxy is still draining");
            return DrainProgress::Occupied(update.occupancy);
        }

        if !self.registry.claim_stop(proxy) {
            return DrainProgress::AlreadyClaimed;
        }

        info!(proxy, "proxy is drained, requesting stop");
        match self.orchestrator.request_stop(proxy).await {
            Ok(()) => {
                match self.registry.mark_stopped(proxy) {
                    Some(previous) => info!(
                        proxy,
                        ?previous,
                        state = %ProxyState::Down,
                        "stop requested for drained proxy"
                    ),
                    None => info!(proxy, "stop requested for proxy deleted meanwhile"),
                }
                metrics::counter!(STOP_REQUESTS, "outcome" => "delivered").increment(1);
                DrainProgress::Stopped
            }
            Err(err) => {
                // Leave the proxy draining so the next update retries the stop, unless it
                // was evicted or stopped some other way in the meantime.
                let pending = self.registry.release_claim(proxy);
                error!(
                    proxy,
                    pending,
                    error = %err,
                    "failed to request stop for drained proxy"
                );
                metrics::counter!(STOP_REQUESTS, "outcome" => "failed").increment(1);
                DrainProgress::StopFailed
            }
        }
    }

    /// Eviction hook for services deleted from the cluster.
    pub fn on_service_deleted(&self, service: &str) -> Option<ProxyHealth> {
        let evicted = self.registry.evict(service);
        if let Some(health) = evicted {
            info!(proxy = service, state = %health.state, "forgot deleted proxy");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StopError;
    use crate::test_utils::RecordingOrchestrator;
    use async_trait::async_trait;
    use reqwest::StatusCode;

    fn watcher() -> (ProxyRegistry, RecordingOrchestrator, CapacityWatcher) {
        let registry = ProxyRegistry::default();
        let orchestrator = RecordingOrchestrator::new();
        let watcher = CapacityWatcher::new(registry.clone(), Arc::new(orchestrator.clone()));
        (registry, orchestrator, watcher)
    }

    #[tokio::test]
    async fn test_ignores_proxies_not_draining() {
        let (registry, orchestrator, watcher) = watcher();
        registry.get_or_create("lobby-1");

        let progress = watcher.handle(&ServiceUpdate::new("lobby-1", 0)).await;

        assert_eq!(progress, DrainProgress::NotDraining);
        assert_eq!(registry.get("lobby-1").unwrap().state, ProxyState::Up);
        assert!(orchestrator.requests().is_empty());
    }

    #[tokio::test]
    async fn test_waits_for_players_to_leave() {
        let (registry, orchestrator, watcher) = watcher();
        registry.begin_drain("lobby-1");

        let progress = watcher.handle(&ServiceUpdate::new("lobby-1", 2)).await;

        assert_eq!(progress, DrainProgress::Occupied(2));
        assert_eq!(registry.get("lobby-1").unwrap().state, ProxyState::Draining);
        assert!(registry.is_awaiting_stop("lobby-1"));
        assert!(orchestrator.requests().is_empty());
    }

    #[tokio::test]
    async fn test_requests_stop_exactly_once() {
        let (registry, orchestrator, watcher) = watcher();
        registry.begin_drain("lobby-1");

        let progress = watcher.handle(&ServiceUpdate::new("lobby-1", 0)).await;
        assert_eq!(progress, DrainProgress::Stopped);
        assert_eq!(registry.get("lobby-1").unwrap().state, ProxyState::Down);
        assert!(!registry.is_awaiting_stop("lobby-1"));

        let progress = watcher.handle(&ServiceUpdate::new("lobby-1", 0)).await;
        assert_eq!(progress, DrainProgress::NotDraining);
        assert_eq!(orchestrator.requests(), vec!["lobby-1".to_owned()]);
    }

    #[tokio::test]
    async fn test_failed_stop_keeps_draining() {
        let (registry, orchestrator, watcher) = watcher();
        registry.begin_drain("lobby-1");
        orchestrator.set_failing(true);

        let progress = watcher.handle(&ServiceUpdate::new("lobby-1", 0)).await;
        assert_eq!(progress, DrainProgress::StopFailed);
        assert_eq!(registry.get("lobby-1").unwrap().state, ProxyState::Draining);
        assert!(registry.is_awaiting_stop("lobby-1"));

        // The next update retries.
        orchestrator.set_failing(false);
        let progress = watcher.handle(&ServiceUpdate::new("lobby-1", 0)).await;
        assert_eq!(progress, DrainProgress::Stopped);
        assert_eq!(registry.get("lobby-1").unwrap().state, ProxyState::Down);
        assert_eq!(orchestrator.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_updates_issue_one_stop() {
        let (registry, orchestrator, watcher) = watcher();
        registry.begin_drain("lobby-1");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let watcher = watcher.clone();
                tokio::spawn(async move {
                    watcher.handle(&ServiceUpdate::new("lobby-1", 0)).await
                })
            })
            .collect();

        let mut stopped = 0;
        for handle in handles {
            if handle.await.unwrap() == DrainProgress::Stopped {
                stopped += 1;
            }
        }

        assert_eq!(stopped, 1);
        assert_eq!(orchestrator.requests().len(), 1);
    }

    /// Runs `during_stop` against the registry while the stop request is in flight.
    struct InterleavingOrchestrator {
        registry: ProxyRegistry,
        during_stop: fn(&ProxyRegistry, &str),
        fail: bool,
    }

    #[async_trait]
    impl Orchestrator for InterleavingOrchestrator {
        async fn request_stop(&self, service: &str) -> Result<(), StopError> {
            (self.during_stop)(&self.registry, service);
            if self.fail {
                return Err(StopError::Rejected(StatusCode::CONFLICT));
            }
            Ok(())
        }
    }

    fn interleaving_watcher(
        during_stop: fn(&ProxyRegistry, &str),
        fail: bool,
    ) -> (ProxyRegistry, CapacityWatcher) {
        let registry = ProxyRegistry::default();
        let orchestrator = InterleavingOrchestrator {
            registry: registry.clone(),
            during_stop,
            fail,
        };
        let watcher = CapacityWatcher::new(registry.clone(), Arc::new(orchestrator));
        (registry, watcher)
    }

    #[tokio::test]
    async fn test_eviction_during_stop_is_not_undone() {
        let (registry, watcher) = interleaving_watcher(
            |registry, service| {
                registry.evict(service);
            },
            false,
        );
        registry.begin_drain("lobby-1");

        let progress = watcher.handle(&ServiceUpdate::new("lobby-1", 0)).await;

        assert_eq!(progress, DrainProgress::Stopped);
        assert_eq!(registry.get("lobby-1"), None);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_failed_stop_after_immediate_stop_is_not_requeued() {
        let (registry, watcher) = interleaving_watcher(
            |registry, service| {
                registry.mark_down(service);
            },
            true,
        );
        registry.begin_drain("lobby-1");

        let progress = watcher.handle(&ServiceUpdate::new("lobby-1", 0)).await;

        assert_eq!(progress, DrainProgress::StopFailed);
        assert_eq!(registry.get("lobby-1").unwrap().state, ProxyState::Down);
        assert!(!registry.is_awaiting_stop("lobby-1"));
    }

    #[test]
    fn test_record_capacity() {
        let (registry, _, watcher) = watcher();
        let mut update = ServiceUpdate::new("lobby-1", 4);
        update.max_players = Some(100);

        watcher.record_capacity(&update);
        assert_eq!(registry.get("lobby-1"), None);

        registry.get_or_create("lobby-1");
        watcher.record_capacity(&update);
        assert_eq!(registry.get("lobby-1").unwrap().max_players, 100);
    }

    #[test]
    fn test_on_service_deleted() {
        let (registry, _, watcher) = watcher();
        registry.begin_drain("lobby-1");

        assert_eq!(
            watcher.on_service_deleted("lobby-1").unwrap().state,
            ProxyState::Draining
        );
        assert!(registry.is_empty());
        assert!(!registry.is_awaiting_stop("lobby-1"));
        assert_eq!(watcher.on_service_deleted("lobby-1"), None);
    }
}

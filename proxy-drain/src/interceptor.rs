use tracing::{debug, info, warn};

use crate::lifecycle::LifecycleEvent;
use crate::metrics::LIFECYCLE_DECISIONS;
use crate::registry::{ProxyRegistry, ProxyState};

/// Service group whose members are load-balanced proxies.
pub const DEFAULT_PROXY_GROUP: &str = "Proxy";

/// Outcome of intercepting a lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Not a proxy, or a transition the drain protocol does not care about.
    Ignore,
    /// The transition may proceed.
    Allow,
    /// The transition must be cancelled; the proxy is draining instead.
    Veto,
}

impl Verdict {
    /// The flag written back to the orchestrator's event.
    pub fn vetoed(&self) -> bool {
        matches!(self, Verdict::Veto)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Ignore => "ignore",
            Verdict::Allow => "allow",
            Verdict::Veto => "veto",
        }
    }
}

/// Runs inline with the orchestrator's event dispatch, before a lifecycle transition is
/// committed. It never blocks on anything but the registry lock.
///
/// A running proxy asked to stop while players are still connected is not stopped: the
/// transition is vetoed and the proxy starts draining. The stop is requested again by the
/// [`CapacityWatcher`](crate::watcher::CapacityWatcher) once the proxy is empty.
#[derive(Clone)]
pub struct LifecycleInterceptor {
    registry: ProxyRegistry,
    proxy_group: String,
}

impl LifecycleInterceptor {
    pub fn new(registry: ProxyRegistry, proxy_group: &str) -> Self {
        Self {
            registry,
            proxy_group: proxy_group.to_owned(),
        }
    }

    pub fn handle(&self, event: &LifecycleEvent) -> Verdict {
        if !event.in_group(&self.proxy_group) {
            return Verdict::Ignore;
        }

        let verdict = self.decide(event);
        debug!(
            proxy = event.service.as_str(),
            current = ?event.current,
            target = ?event.target,
            occupancy = event.occupancy,
            verdict = verdict.as_str(),
            "intercepted lifecycle transition"
        );
        metrics::counter!(LIFECYCLE_DECISIONS, "decision" => verdict.as_str()).increment(1);
        verdict
    }

    // The order of the stop guards matters: an empty proxy always takes the immediate stop,
    // the awaiting-stop fallback only applies to proxies that still report players.
    fn decide(&self, event: &LifecycleEvent) -> Verdict {
        let proxy = event.service.as_str();

        if event.is_start() {
            let previous = self.registry.set_state(proxy, ProxyState::Up);
            info!(
                proxy,
                ?previous,
                state = %ProxyState::Up,
                "proxy registered for load balancing"
            );
            return Verdict::Allow;
        }

        if !event.is_stop_request() {
            return Verdict::Ignore;
        }

        if event.occupancy == 0 {
            let previous = self.registry.mark_down(proxy);
            info!(
                proxy,
                ?previous,
                state = %ProxyState::Down,
                target = ?event.target,
                "proxy is empty, stopping immediately"
            );
            return Verdict::Allow;
        }

        if self.registry.finish_drain(proxy) {
            info!(
                proxy,
                occupancy = event.occupancy,
                target = ?event.target,
                "proxy already drained, allowing deferred stop"
            );
            return Verdict::Allow;
        }

        self.registry.begin_drain(proxy);
        warn!(
            proxy,
            occupancy = event.occupancy,
            target = ?event.target,
            state = %ProxyState::Draining,
            "vetoed lifecycle transition, draining proxy"
        );
        Verdict::Veto
    }
}

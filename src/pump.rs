use crate::config::BrokerConfig;
use crate::registry::PluginRegistry;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// One pending primary UI message. The broker treats the payload as
/// opaque; dispatching runs whatever handler the platform glue attached
/// when it translated the native message.
pub struct UiMessage(Box<dyn FnOnce() + Send>);

impl UiMessage {
    pub fn new(handler: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(handler))
    }

    pub fn dispatch(self) {
        (self.0)()
    }
}

/// Seam to the process-wide primary message queue.
///
/// There is exactly one such queue per process, shared by every hosted
/// plugin; the pump drains it in bounded batches rather than per plugin.
pub trait PrimaryMessagePump: Send + Sync {
    /// Remove one pending message, if any.
    fn poll_message(&self) -> Option<UiMessage>;
}

/// Queue-backed [`PrimaryMessagePump`] the platform glue posts translated
/// messages into.
#[derive(Default)]
pub struct QueuedMessagePump {
    pending: Mutex<VecDeque<UiMessage>>,
}

impl QueuedMessagePump {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn post(&self, message: UiMessage) {
        self.pending.lock().unwrap().push_back(message);
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

impl PrimaryMessagePump for QueuedMessagePump {
    fn poll_message(&self) -> Option<UiMessage> {
        self.pending.lock().unwrap().pop_front()
    }
}

/// What one pump activation did; returned so a tick is observable as a
/// single unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Plugins whose secondary event source was serviced.
    pub serviced: usize,
    /// Whether draining the primary queue was vetoed this activation.
    pub vetoed: bool,
    /// Primary messages dispatched this activation.
    pub drained: usize,
}

/// The merged event pump: a fixed-cadence driver for both event sources.
///
/// Every activation services the secondary event source of every active
/// plugin unconditionally, then drains a bounded batch of primary messages
/// for the whole process unless any plugin vetoes it. The cap keeps
/// one pathological plugin from flooding the queue and starving everything
/// else scheduled on the event-processing thread; its own excess messages
/// simply wait for a later activation.
pub struct EventPump {
    interval: Duration,
    min_slack: Duration,
    max_messages_per_tick: usize,
    primary: Arc<dyn PrimaryMessagePump>,
}

impl EventPump {
    pub fn new(config: &BrokerConfig, primary: Arc<dyn PrimaryMessagePump>) -> Self {
        Self {
            interval: config.pump_interval,
            min_slack: config.pump_min_slack,
            max_messages_per_tick: config.max_messages_per_tick,
            primary,
        }
    }

    /// When the activation after one due at `prev` should run.
    ///
    /// Keeps a steady cadence, but adds in a delay when the tick itself ran
    /// long so a slow activation never causes runaway catch-up scheduling:
    /// the result never regresses and is always at least `min_slack` away.
    pub fn next_deadline(&self, prev: Instant, now: Instant) -> Instant {
        std::cmp::max(prev + self.interval, now + self.min_slack)
    }

    /// One pump activation over the currently registered plugins.
    pub fn tick(&self, registry: &PluginRegistry) -> TickOutcome {
        let mut serviced = 0;
        registry.for_each(|_, slot| {
            slot.bridge.service_secondary_events();
            serviced += 1;
        });

        // One veto suspends primary draining for the whole group. The
        // dispatcher calls and this scan both run on the event-processing
        // thread, so the answer cannot change mid-activation.
        let mut vetoed = false;
        registry.for_each(|_, slot| {
            if slot.bridge.should_suspend_primary_pump() {
                vetoed = true;
            }
        });

        let mut drained = 0;
        if !vetoed {
            while drained < self.max_messages_per_tick {
                match self.primary.poll_message() {
                    Some(message) => {
                        message.dispatch();
                        drained += 1;
                    }
                    None => break,
                }
            }
        }

        TickOutcome {
            serviced,
            vetoed,
            drained,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::PluginSlot;
    use plugin_bridge::{GroupRequest, PluginBridge};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct ProbeBridge {
        serviced: AtomicUsize,
        veto: AtomicBool,
    }

    impl ProbeBridge {
        fn new(veto: bool) -> Arc<Self> {
            Arc::new(Self {
                serviced: AtomicUsize::new(0),
                veto: AtomicBool::new(veto),
            })
        }
    }

    impl PluginBridge for ProbeBridge {
        fn run_dispatch_loop(&self) {}
        fn service_secondary_events(&self) {
            self.serviced.fetch_add(1, Ordering::SeqCst);
        }
        fn should_suspend_primary_pump(&self) -> bool {
            self.veto.load(Ordering::SeqCst)
        }
    }

    fn register(registry: &PluginRegistry, n: u32, bridge: Arc<ProbeBridge>) {
        registry.insert(
            GroupRequest {
                plugin_path: "/opt/plugins/synth.module".into(),
                endpoint_base_dir: format!("/tmp/grouphost-pump-{n}"),
            },
            PluginSlot {
                dispatch: std::thread::spawn(|| {}),
                bridge,
            },
        );
    }

    fn pump_with(cap: usize) -> (EventPump, Arc<QueuedMessagePump>) {
        let queue = Arc::new(QueuedMessagePump::new());
        let config = BrokerConfig {
            max_messages_per_tick: cap,
            ..BrokerConfig::default()
        };
        (EventPump::new(&config, queue.clone()), queue)
    }

    #[test]
    fn drains_at_most_the_configured_cap() {
        let (pump, queue) = pump_with(20);
        let registry = PluginRegistry::new();
        let dispatched = Arc::new(AtomicUsize::new(0));
        for _ in 0..30 {
            let dispatched = dispatched.clone();
            queue.post(UiMessage::new(move || {
                dispatched.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let outcome = pump.tick(&registry);
        assert_eq!(outcome.drained, 20);
        assert_eq!(dispatched.load(Ordering::SeqCst), 20);
        assert_eq!(queue.pending(), 10);

        // the rest is picked up on a later activation
        let outcome = pump.tick(&registry);
        assert_eq!(outcome.drained, 10);
        assert_eq!(queue.pending(), 0);
    }

    #[test]
    fn a_single_veto_suspends_draining_but_not_servicing() {
        let (pump, queue) = pump_with(20);
        let registry = PluginRegistry::new();
        let quiet = ProbeBridge::new(false);
        let modal = ProbeBridge::new(true);
        register(&registry, 1, quiet.clone());
        register(&registry, 2, modal.clone());

        queue.post(UiMessage::new(|| {}));

        let outcome = pump.tick(&registry);
        assert!(outcome.vetoed);
        assert_eq!(outcome.drained, 0);
        assert_eq!(outcome.serviced, 2);
        assert_eq!(queue.pending(), 1);
        assert_eq!(quiet.serviced.load(Ordering::SeqCst), 1);
        assert_eq!(modal.serviced.load(Ordering::SeqCst), 1);

        // the veto lifting resumes draining
        modal.veto.store(false, Ordering::SeqCst);
        let outcome = pump.tick(&registry);
        assert!(!outcome.vetoed);
        assert_eq!(outcome.drained, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn deadlines_keep_cadence_without_catching_up() {
        let (pump, _queue) = pump_with(20);
        let interval = Duration::from_millis(1000) / 30;
        let slack = Duration::from_millis(5);

        // an on-time tick advances by exactly one interval
        let prev = Instant::now();
        let next = pump.next_deadline(prev, prev);
        assert_eq!(next, prev + interval);

        // a tick that overran its whole interval backs off by the slack
        // instead of scheduling a burst of make-up activations
        let late_now = prev + interval * 4;
        let next = pump.next_deadline(prev, late_now);
        assert_eq!(next, late_now + slack);

        // and the deadline never regresses
        assert!(next >= prev + interval);
    }
}

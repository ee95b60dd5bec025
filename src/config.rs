use std::env;
use std::time::Duration;
use tracing::warn;

/// Broker tunables, overridable through the environment.
///
/// `main` loads a `.env` file first (via `dotenvy`), so these can be set
/// either per-process or per-deployment.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Nominal delay between event pump activations.
    pub pump_interval: Duration,
    /// Minimum breathing room before the next activation when a tick ran
    /// long; keeps a slow tick from triggering catch-up bursts.
    pub pump_min_slack: Duration,
    /// Upper bound on primary messages drained per activation.
    pub max_messages_per_tick: usize,
    /// How long the group lingers after the last plugin exits before the
    /// process shuts itself down.
    pub shutdown_delay: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            // a more than cinematic 30 activations per second
            pump_interval: Duration::from_millis(1000) / 30,
            pump_min_slack: Duration::from_millis(5),
            max_messages_per_tick: 20,
            shutdown_delay: Duration::from_secs(2),
        }
    }
}

impl BrokerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(interval) = env_ms("GROUPHOST_PUMP_INTERVAL_MS") {
            config.pump_interval = interval;
        }
        if let Some(slack) = env_ms("GROUPHOST_PUMP_MIN_SLACK_MS") {
            config.pump_min_slack = slack;
        }
        if let Some(delay) = env_ms("GROUPHOST_SHUTDOWN_DELAY_MS") {
            config.shutdown_delay = delay;
        }
        if let Ok(raw) = env::var("GROUPHOST_MAX_MESSAGES_PER_TICK") {
            match raw.parse() {
                Ok(cap) => config.max_messages_per_tick = cap,
                Err(_) => warn!(
                    key = "GROUPHOST_MAX_MESSAGES_PER_TICK",
                    value = %raw,
                    "ignoring unparsable override"
                ),
            }
        }
        config
    }
}

fn env_ms(key: &str) -> Option<Duration> {
    let raw = env::var(key).ok()?;
    match raw.parse::<u64>() {
        Ok(ms) => Some(Duration::from_millis(ms)),
        Err(_) => {
            warn!(%key, value = %raw, "ignoring unparsable duration override");
            None
        }
    }
}

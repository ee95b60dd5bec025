use std::sync::Arc;
use thiserror::Error;

/// The in-process bridge for one hosted plugin instance.
///
/// The broker drives every bridge through this narrow surface and nothing
/// else: one dedicated thread blocks in [`run_dispatch_loop`] for the
/// plugin's whole lifetime, while the broker's event-processing thread
/// periodically calls [`service_secondary_events`] and consults
/// [`should_suspend_primary_pump`] from its pump tick. Implementations are
/// therefore shared across exactly those two threads and must synchronize
/// internally.
///
/// [`run_dispatch_loop`]: PluginBridge::run_dispatch_loop
/// [`service_secondary_events`]: PluginBridge::service_secondary_events
/// [`should_suspend_primary_pump`]: PluginBridge::should_suspend_primary_pump
pub trait PluginBridge: Send + Sync {
    /// Serve the plugin's dispatcher until the plugin exits, for any
    /// reason. Blocks the calling thread for the plugin's lifetime.
    fn run_dispatch_loop(&self);

    /// Flush this plugin's secondary event source. Called on every pump
    /// tick, unconditionally.
    fn service_secondary_events(&self);

    /// Whether draining the process-wide primary message queue must be
    /// suspended right now (e.g. the plugin is opening a modal editor).
    /// One veto suspends draining for the whole group for that tick.
    fn should_suspend_primary_pump(&self) -> bool {
        false
    }
}

/// Constructs bridges for accepted group requests.
///
/// Injected into the broker so hosting environments (and tests) decide how
/// a plugin module actually gets loaded.
pub trait BridgeFactory: Send + Sync {
    fn construct(
        &self,
        plugin_path: &str,
        endpoint_base_dir: &str,
    ) -> Result<Arc<dyn PluginBridge>, BridgeError>;
}

/// Reported, recoverable reasons a bridge could not be brought up.
///
/// These never take the broker down; the offending request is logged and
/// dropped while the acceptor keeps serving other clients.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("could not load plugin module '{path}': {reason}")]
    PluginLoad { path: String, reason: String },
    #[error("could not set up plugin sockets under '{dir}'")]
    SocketSetup {
        dir: String,
        #[source]
        source: std::io::Error,
    },
    #[error("plugin '{path}' failed to initialize: {reason}")]
    PluginInit { path: String, reason: String },
}

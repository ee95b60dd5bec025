use plugin_bridge::{BridgeError, BridgeFactory, PluginBridge};
use std::io::Read;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Default bridge wiring for clients that rendezvous over a per-instance
/// socket directory.
///
/// This is the seam where a full plugin runtime plugs into the broker: a
/// real deployment swaps in a factory whose bridges load the plugin module
/// and translate dispatcher calls. The socket bridge here implements the
/// lifecycle half of that contract: the plugin client listens on
/// `<endpoint_base_dir>/dispatch.sock`, the bridge connects during
/// construction, and the dispatch loop serves the connection until the
/// client hangs up, which is how a plugin exit (or crash) is observed.
pub struct SocketBridgeFactory;

impl SocketBridgeFactory {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SocketBridgeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BridgeFactory for SocketBridgeFactory {
    fn construct(
        &self,
        plugin_path: &str,
        endpoint_base_dir: &str,
    ) -> Result<Arc<dyn PluginBridge>, BridgeError> {
        if !Path::new(plugin_path).exists() {
            return Err(BridgeError::PluginLoad {
                path: plugin_path.to_string(),
                reason: "no such plugin module".to_string(),
            });
        }

        let socket = Path::new(endpoint_base_dir).join("dispatch.sock");
        let dispatch = UnixStream::connect(&socket).map_err(|err| BridgeError::SocketSetup {
            dir: endpoint_base_dir.to_string(),
            source: err,
        })?;

        Ok(Arc::new(SocketBridge { dispatch }))
    }
}

struct SocketBridge {
    dispatch: UnixStream,
}

impl PluginBridge for SocketBridge {
    fn run_dispatch_loop(&self) {
        // Serve until the client closes its end; a read error counts as a
        // hang-up too since there is nobody left to serve.
        let mut buffer = [0u8; 4096];
        loop {
            match (&self.dispatch).read(&mut buffer) {
                Ok(0) | Err(_) => return,
                Ok(n) => debug!(bytes = n, "dispatch payload received"),
            }
        }
    }

    fn service_secondary_events(&self) {}
}

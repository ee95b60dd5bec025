use crate::config::BrokerConfig;
use crate::pump::{EventPump, PrimaryMessagePump, QueuedMessagePump};
use crate::registry::{PluginRegistry, PluginSlot};
use crate::shutdown::Debounce;
use anyhow::Result;
use plugin_bridge::handshake::{self, GroupRequest, GroupResponse};
use plugin_bridge::{BridgeFactory, PluginBridge};
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Work marshaled onto the event-processing thread by dispatch threads.
#[derive(Debug)]
enum BrokerEvent {
    /// A plugin's dispatch loop returned; its slot must be torn down.
    PluginExited(GroupRequest),
}

/// The group host broker: accepts hosting requests on the group endpoint,
/// runs one dispatch thread per hosted plugin, and multiplexes everything
/// else (the accept loop, the merged event pump, slot teardown and the
/// idle-shutdown countdown) cooperatively on the one thread that drives
/// [`run`].
///
/// [`run`]: GroupBroker::run
pub struct GroupBroker {
    listener: UnixListener,
    registry: Arc<PluginRegistry>,
    factory: Arc<dyn BridgeFactory>,
    config: BrokerConfig,
    pump: EventPump,
    shutdown: Debounce,
    events_tx: UnboundedSender<BrokerEvent>,
    events_rx: UnboundedReceiver<BrokerEvent>,
}

impl GroupBroker {
    pub fn new(
        listener: UnixListener,
        factory: Arc<dyn BridgeFactory>,
        config: BrokerConfig,
    ) -> Self {
        Self::with_message_pump(listener, factory, config, Arc::new(QueuedMessagePump::new()))
    }

    pub fn with_message_pump(
        listener: UnixListener,
        factory: Arc<dyn BridgeFactory>,
        config: BrokerConfig,
        primary: Arc<dyn PrimaryMessagePump>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pump = EventPump::new(&config, primary);
        Self {
            listener,
            registry: Arc::new(PluginRegistry::new()),
            factory,
            config,
            pump,
            shutdown: Debounce::new(),
            events_tx,
            events_rx,
        }
    }

    /// The broker's view of what is currently hosted.
    pub fn registry(&self) -> Arc<PluginRegistry> {
        self.registry.clone()
    }

    /// Serve the group until it goes idle or its listener breaks.
    ///
    /// The task driving this future is the event-processing thread: every
    /// registry mutation and every pump activation happens here, each
    /// running to completion before the next is taken up. Dispatch threads
    /// never touch the registry; they announce a plugin's exit over the
    /// event channel and this loop retires the slot, so bridge teardown
    /// keeps the thread affinity the hosted native libraries expect.
    pub async fn run(self) -> Result<()> {
        let Self {
            listener,
            registry,
            factory,
            config,
            pump,
            shutdown,
            events_tx,
            mut events_rx,
        } = self;

        info!("group host is up and running, now accepting incoming connections");

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);
        let mut pump_deadline = Instant::now() + config.pump_interval;

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => {
                        handle_connection(stream, &registry, &factory, &events_tx, &shutdown).await;
                    }
                    Err(err) => {
                        // the group cannot keep operating without its listener
                        error!(error = %err, "error while listening for incoming connections");
                        break;
                    }
                },
                Some(event) = events_rx.recv() => match event {
                    BrokerEvent::PluginExited(key) => {
                        retire_plugin(&registry, &key);
                        // defer the actual shutdown so a plugin scan can
                        // keep reusing this process
                        shutdown.arm(config.shutdown_delay);
                    }
                },
                _ = tokio::time::sleep_until(pump_deadline) => {
                    pump.tick(&registry);
                    pump_deadline = pump.next_deadline(pump_deadline, Instant::now());
                },
                _ = shutdown.fired() => {
                    if registry.is_empty() {
                        info!("all plugins have exited, shutting down the group process");
                        break;
                    }
                },
                _ = &mut ctrl_c => {
                    info!("interrupt received, shutting down the group process");
                    break;
                },
            }
        }

        // Normally nothing is left by now: the idle shutdown only fires on
        // an empty registry. A plugin still around after an interrupt, or an
        // exit racing the shutdown decision, is torn down here, on this
        // thread, before the process unwinds.
        while let Ok(BrokerEvent::PluginExited(key)) = events_rx.try_recv() {
            retire_plugin(&registry, &key);
        }
        for (key, slot) in registry.drain() {
            warn!(plugin = %key.plugin_path, "waiting for a plugin still running at shutdown");
            let PluginSlot { dispatch, bridge } = slot;
            let _ = dispatch.join();
            drop(bridge);
        }

        Ok(())
    }
}

/// Perform the handshake for one inbound connection and, when the plugin
/// comes up, hand it over to its own dispatch thread.
async fn handle_connection(
    stream: UnixStream,
    registry: &Arc<PluginRegistry>,
    factory: &Arc<dyn BridgeFactory>,
    events_tx: &UnboundedSender<BrokerEvent>,
    shutdown: &Debounce,
) {
    let mut stream = BufReader::new(stream);
    let request: GroupRequest = match handshake::read_message(&mut stream).await {
        Ok(request) => request,
        Err(err) => {
            warn!(error = %err, "dropping a connection with a broken handshake");
            return;
        }
    };

    // Reply with our process id before constructing anything: if the plugin
    // takes the whole process down during initialization, the requester can
    // tell by watching this pid instead of waiting on its sockets forever.
    let response = GroupResponse {
        pid: std::process::id(),
    };
    if let Err(err) = handshake::write_message(stream.get_mut(), &response).await {
        warn!(error = %err, "dropping a connection that vanished mid-handshake");
        return;
    }

    info!(
        plugin = %request.plugin_path,
        endpoint_base_dir = %request.endpoint_base_dir,
        "received request to host plugin"
    );

    match factory.construct(&request.plugin_path, &request.endpoint_base_dir) {
        Ok(bridge) => {
            info!(plugin = %request.plugin_path, "finished initializing plugin");
            // a pending idle shutdown no longer applies
            shutdown.cancel();
            let dispatch = spawn_dispatch(request.clone(), bridge.clone(), events_tx.clone());
            registry.insert(request, PluginSlot { dispatch, bridge });
        }
        Err(err) => {
            // Reported failure: drop the request and keep serving. The
            // requester already has our pid and will time out on its side.
            warn!(plugin = %request.plugin_path, error = %err, "error while initializing plugin");
        }
    }
}

/// Run one plugin's blocking dispatch loop on its own thread so it can
/// stall for arbitrarily long without holding up the event pump or any
/// other plugin.
fn spawn_dispatch(
    key: GroupRequest,
    bridge: Arc<dyn PluginBridge>,
    events_tx: UnboundedSender<BrokerEvent>,
) -> JoinHandle<()> {
    let span = tracing::Span::current();
    std::thread::spawn(move || {
        let _entered = span.enter();
        bridge.run_dispatch_loop();
        info!(plugin = %key.plugin_path, "plugin has exited");

        // The registry's slot owns the other handle; dropping ours first
        // keeps the final bridge teardown on the event-processing thread.
        drop(bridge);
        let _ = events_tx.send(BrokerEvent::PluginExited(key));
    })
}

/// Tear down an exited plugin's slot on the event-processing thread. The
/// bridge may wrap native-library state that must be destroyed on the
/// thread that services its events, so the last handle is dropped here and
/// never on the dispatch thread.
fn retire_plugin(registry: &PluginRegistry, key: &GroupRequest) {
    let Some(slot) = registry.remove(key) else {
        return;
    };
    let PluginSlot { dispatch, bridge } = slot;
    if dispatch.join().is_err() {
        warn!(plugin = %key.plugin_path, "dispatch thread panicked before exiting");
    }
    drop(bridge);
}

use anyhow::{Context, Result};
use clap::Parser;
use grouphost::broker::GroupBroker;
use grouphost::capture::StdioCapture;
use grouphost::config::BrokerConfig;
use grouphost::endpoint::bind_group_endpoint;
use grouphost::glue::SocketBridgeFactory;
use grouphost::logger;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "grouphost",
    about = "Group host broker for sandboxed plugin instances",
    version = "0.2.0"
)]
struct Cli {
    /// The group's rendezvous socket, named
    /// `grouphost-<group>-<prefix-id>-<arch>.sock`
    socket_path: PathBuf,

    /// Optional log level override (e.g. error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Append logs to this file instead of the inherited stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let group_name = logger::derive_group_name(&cli.socket_path);

    // The log sink has to be resolved before the captures rewire the
    // inherited descriptors, or the logger would feed its own relay.
    let sink = logger::log_sink(cli.log_file.as_deref())?;
    logger::init_tracing(&cli.log_level, sink)?;

    let span = tracing::info_span!("group", name = %group_name);
    let _entered = span.enter();

    // From here on, everything plugins print to stdout or stderr comes
    // back through the logger instead of disappearing into the void.
    let _stdout_capture = StdioCapture::stdout().context("could not capture stdout")?;
    let _stderr_capture = StdioCapture::stderr().context("could not capture stderr")?;

    let listener = bind_group_endpoint(&cli.socket_path)?;
    info!(endpoint = %cli.socket_path.display(), "bound group endpoint");

    let config = BrokerConfig::from_env();
    let broker = GroupBroker::new(listener, Arc::new(SocketBridgeFactory::new()), config);

    // The current-thread runtime makes this one thread the designated
    // event-processing thread for the whole group.
    broker.run().await
}

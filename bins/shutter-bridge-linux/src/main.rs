use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use shutter_adapter::{
    parse_assignment, provision_buttons, EventAdapter, HostPlatform, MemoryHost, Subscription,
};
use shutter_core::{
    validate_settings, BridgeSettings, ConfigStorage, DestinationId, JsonFileStorage,
    LinkConfig, StatePattern,
};
use shutter_dispatch::{Connector, DispatchOptions, Dispatcher, MemoryConnector, SerialConnector, SerialLink};
use shutter_protocol::{decode_shutter_command, Action, ShutterCommand};

const DEFAULT_CONFIG: &str = "config/shutters.json";

#[derive(Parser)]
#[command(name = "shutter-bridge", version, about = "Roller shutter serial bridge")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the bridge (default)
    Run(RunArgs),
    /// Open one link, send a single shutter command and exit
    Send {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Global shutter id
        destination: DestinationId,
        /// open or close
        action: Action,
    },
    /// Write an example configuration file
    Init {
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        config: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    #[arg(short, long, default_value = DEFAULT_CONFIG)]
    config: PathBuf,
    /// Use in-memory links that log what they receive instead of serial ports
    #[arg(long)]
    dry_run: bool,
    /// Log every state change whose id matches GLOB, e.g. `javascript.0.Rollershutters.Shutter_6.*`
    #[arg(long = "watch", value_name = "GLOB")]
    watch: Vec<String>,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            config: PathBuf::from(DEFAULT_CONFIG),
            dry_run: false,
            watch: Vec::new(),
        }
    }
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,shutter_dispatch=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    // Single cooperative event loop
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build runtime")?;

    let result = runtime.block_on(async move {
        match cli.command.unwrap_or_else(|| Command::Run(RunArgs::default())) {
            Command::Run(args) => run(args).await,
            Command::Send {
                config,
                destination,
                action,
            } => send(&config, destination, action).await,
            Command::Init { config, force } => init(&config, force),
        }
    });

    // The blocking stdin reader never finishes on its own
    runtime.shutdown_background();
    result
}

fn load_settings(path: &Path) -> anyhow::Result<BridgeSettings> {
    JsonFileStorage::new(path)
        .load_settings()
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

/// Long-running bridge: host triggers in, serial commands out.
async fn run(args: RunArgs) -> anyhow::Result<()> {
    tracing::info!("Shutter bridge starting...");

    let settings = load_settings(&args.config)?;
    let watches = args
        .watch
        .iter()
        .map(|glob| StatePattern::new(glob).with_context(|| format!("Invalid watch pattern {glob:?}")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let routes = Arc::new(validate_settings(&settings).context("Invalid configuration")?);
    for link in routes.links() {
        tracing::info!(
            link = %link.id,
            path = %link.path,
            destinations = ?link.destinations,
            "Link configured"
        );
    }

    let connector: Arc<dyn Connector> = if args.dry_run {
        tracing::warn!("Dry run: commands go to in-memory links");
        let (connector, devices) = MemoryConnector::new(routes.links().iter().map(|l| l.id.clone()));
        spawn_device_loggers(devices);
        Arc::new(connector)
    } else {
        Arc::new(SerialConnector)
    };

    let dispatcher = Arc::new(Dispatcher::start(
        routes,
        connector,
        DispatchOptions::from(&settings),
    ));

    let host = Arc::new(MemoryHost::with_shutdown_budget(settings.shutdown_timeout()));
    for pattern in watches {
        spawn_state_watcher(host.as_ref(), pattern);
    }
    if settings.provision_buttons > 0 {
        provision_buttons(host.as_ref(), &settings.base_id, settings.provision_buttons)
            .await
            .context("Failed to provision button states")?;
    }

    let adapter = EventAdapter::new(host.clone(), dispatcher.clone(), &settings)
        .context("Invalid base id")?;
    let adapter_handle = tokio::spawn(adapter.run());
    let input_handle = tokio::spawn(drive_from_stdin(host.clone(), settings.base_id.clone()));
    tokio::spawn(stop_on_signal(host.clone(), input_handle));

    tracing::info!("Shutter bridge ready, listening for button presses");
    tracing::info!("   Write states on stdin as <id>=<json value>, e.g.");
    tracing::info!("   Shutter_6.OpenButton=true");
    tracing::info!("   Links.OG.Command=O6:1");

    // The adapter leaves its loop on the same hook, before the links go away
    host.stopped().await;
    if let Err(e) = adapter_handle.await {
        tracing::error!("Event adapter task failed: {}", e);
    }

    let report = dispatcher.shutdown(host.shutdown_budget()).await;
    if !report.is_clean() {
        tracing::warn!("Links not closed in time: {}", report.timed_out.join(", "));
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Request a host stop on Ctrl+C or when stdin closes.
async fn stop_on_signal(host: Arc<MemoryHost>, mut input: JoinHandle<anyhow::Result<()>>) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        result = &mut input => {
            match result {
                Ok(Ok(())) => tracing::info!("Input closed, shutting down..."),
                Ok(Err(e)) => tracing::error!("Input error: {:#}", e),
                Err(e) => tracing::error!("Input task failed: {}", e),
            }
        }
    }
    input.abort();
    host.request_stop();
}

/// Log state changes matching a `--watch` pattern.
fn spawn_state_watcher(host: &MemoryHost, pattern: StatePattern) {
    tracing::info!("Watching states matching {}", pattern);
    let mut events = host.subscribe(Subscription::Glob(pattern));
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::info!(
                state_id = %event.id,
                val = %event.val,
                ack = event.ack,
                changed = event.is_value_change(),
                "State changed"
            );
        }
    });
}

/// Feed `<id>=<value>` lines from stdin into the host as user writes.
///
/// Ids not starting with the base id are taken relative to it.
async fn drive_from_stdin(host: Arc<MemoryHost>, base_id: String) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (id, val) = match parse_assignment(line) {
            Ok(assignment) => assignment,
            Err(e) => {
                tracing::warn!("{}", e);
                continue;
            }
        };
        let id = if id.starts_with(&base_id) {
            id
        } else {
            format!("{base_id}{id}")
        };

        if let Err(e) = host.set_state(&id, val, false).await {
            tracing::warn!(state_id = %id, "Rejected state write: {}", e);
        }
    }
    Ok(())
}

/// Log every line written to the in-memory links.
fn spawn_device_loggers(devices: HashMap<String, DuplexStream>) {
    for (link, device) in devices {
        tokio::spawn(async move {
            let mut lines = BufReader::new(device).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                match decode_shutter_command(&line) {
                    Ok(command) => tracing::info!(
                        link = %link,
                        local_address = command.local_address,
                        action = %command.action,
                        "Device received shutter command {}",
                        line
                    ),
                    Err(_) => tracing::info!(link = %link, "Device received: {}", line),
                }
            }
        });
    }
}

/// One-shot command: open the link, wait the settle delay, write, close.
async fn send(config: &Path, destination: DestinationId, action: Action) -> anyhow::Result<()> {
    let settings = load_settings(config)?;
    let routes = validate_settings(&settings).context("Invalid configuration")?;
    let route = routes.resolve(destination)?;

    let command = ShutterCommand::new(route.local_address, action);
    tracing::info!(
        destination,
        link = %route.link_id(),
        local_address = route.local_address,
        "Sending {}",
        action
    );

    let mut link = SerialLink::new(route.link.clone());
    link.open(&SerialConnector).await?;

    tracing::info!("Waiting {} ms before sending", route.link.settle_delay_ms);
    tokio::time::sleep(route.link.settle_delay()).await;

    let result = link.write(command.encode().as_bytes()).await;
    if result.is_ok() {
        tracing::info!("Message \"{}\" written to {}", command, route.link.path);
    }
    link.close().await?;
    Ok(result?)
}

/// Write the two-link example configuration.
fn init(config: &Path, force: bool) -> anyhow::Result<()> {
    if config.exists() && !force {
        anyhow::bail!("{} already exists, use --force to overwrite", config.display());
    }
    if let Some(dir) = config.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    let settings = BridgeSettings {
        links: vec![
            LinkConfig::new("OG", "/dev/ttyACM0", (0..8).collect()),
            LinkConfig::new("EG", "/dev/ttyACM1", (8..15).collect()),
        ],
        provision_buttons: 17,
        ..BridgeSettings::default()
    };
    JsonFileStorage::new(config).save_settings(&settings)?;

    tracing::info!("Wrote example configuration to {}", config.display());
    Ok(())
}

//! `fermentd` – fermentation monitor daemon and operator console
//!
//! This binary is the single composition root of the workspace.  It:
//!
//! 1. Installs logging, then loads `~/.ferment/config.toml`, running a
//!    **First-Run Wizard** when the file is absent.
//! 2. Connects to the MQTT broker exactly once.  An unreachable broker is
//!    reported and the process exits with status 1.
//! 3. Subscribes to the device telemetry topic and starts the ingestion
//!    task, the broker-link monitor and the cockpit server.
//! 4. Drops the operator into an **interactive console** with slash-commands
//!    (`/status`, `/history`, `/mode`, `/stop`, `/help`, `/quit`).
//! 5. Intercepts **Ctrl-C** to shut down cleanly.

mod config;
mod console;

use colored::Colorize;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use ferment_cockpit::CockpitServer;
use ferment_kernel::{ModeTracker, StateStore};
use ferment_middleware::{EventBus, MqttTransport};
use ferment_runtime::{CommandDispatcher, Dashboard, Ingestor, spawn_ingestion};
use ferment_types::{EventPayload, FermentError};

use crate::config::Config;
use crate::console::Console;

/// How often the broker link is checked for state changes.
const LINK_POLL: Duration = Duration::from_secs(1);

/// Why the main thread stopped waiting.
enum Exit {
    Quit,
    Interrupted,
}

/// Everything started by [`bootstrap`].
struct App {
    transport: Arc<MqttTransport>,
    ingestor: Arc<Ingestor>,
    dashboard: Arc<Dashboard>,
    cockpit_addr: Option<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
}

// ────────────────────────────────────────────────────────────────────────────
// Entry point
// ────────────────────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let _tracing = ferment_runtime::init_tracing("fermentd");

    print_banner();

    let mut cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);
    if let Err(e) = cfg.validate() {
        println!("{}: {}", "Invalid configuration".red(), e);
        return ExitCode::FAILURE;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("fermentd-worker")
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            println!("{}: {}", "Failed to start async runtime".red(), e);
            return ExitCode::FAILURE;
        }
    };

    print!(
        "\n  Connecting to {} … ",
        format!("{}:{}", cfg.broker_host, cfg.broker_port).dimmed()
    );
    std::io::Write::flush(&mut std::io::stdout()).ok();

    let app = match runtime.block_on(bootstrap(&cfg)) {
        Ok(app) => {
            println!("{}", "online".green());
            app
        }
        Err(e) => {
            println!("{}", "failed".red());
            println!("  {} {}", "✗".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    let mqtt = cfg.mqtt_config();
    println!("  Telemetry : {}", mqtt.telemetry_topic().bold());
    println!("  Commands  : {}", mqtt.command_topic().bold());
    match app.cockpit_addr {
        Some(addr) => println!(
            "  Cockpit   : {}",
            format!("http://localhost:{}", addr.port()).bold()
        ),
        None => println!("  Cockpit   : {}", "unavailable".yellow()),
    }
    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    let exit = wait_for_exit(&runtime, &app);
    shutdown(&runtime, app, exit);
    ExitCode::SUCCESS
}

// ────────────────────────────────────────────────────────────────────────────
// Startup
// ────────────────────────────────────────────────────────────────────────────

/// Connect, subscribe and start every background task.
///
/// The MQTT session is created here and nowhere else; every other component
/// receives it (or the dispatcher wrapping it) by handle.
async fn bootstrap(cfg: &Config) -> Result<App, FermentError> {
    let mqtt = cfg.mqtt_config();
    let (transport, inbound) = MqttTransport::connect(&mqtt).await?;
    transport.subscribe(&mqtt.telemetry_topic()).await?;
    let transport = Arc::new(transport);

    let bus = EventBus::default();
    let store = Arc::new(StateStore::new());
    let modes = Arc::new(ModeTracker::new());
    let hazards = Arc::new(cfg.hazard_monitor());

    let ingestor = Arc::new(Ingestor::new(
        Arc::clone(&store),
        Arc::clone(&modes),
        Arc::clone(&hazards),
        bus.clone(),
        mqtt.telemetry_topic(),
    ));
    let dispatcher = Arc::new(CommandDispatcher::new(
        transport.clone(),
        mqtt.command_topic(),
        Arc::clone(&modes),
        bus.clone(),
    ));
    let dashboard = Arc::new(Dashboard::new(
        store,
        modes,
        hazards,
        Arc::clone(&dispatcher),
        cfg.stale_after(),
    ));

    let mut tasks = vec![
        spawn_event_printer(&bus),
        spawn_ingestion(inbound, Arc::clone(&ingestor)),
        dispatcher.spawn_link_monitor(LINK_POLL),
    ];

    let cockpit = CockpitServer::new(Arc::clone(&dashboard))
        .with_port(cfg.cockpit_port)
        .with_refresh(cfg.refresh())
        .with_events(bus)
        .bind()
        .await;
    let cockpit_addr = match cockpit {
        Ok(bound) => {
            let addr = bound.local_addr();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = bound.serve().await {
                    warn!(error = %e, "cockpit server stopped");
                }
            }));
            Some(addr)
        }
        Err(e) => {
            warn!(error = %e, "cockpit disabled");
            None
        }
    };

    info!(subscriptions = ?transport.subscriptions(), "fermentd running");
    Ok(App {
        transport,
        ingestor,
        dashboard,
        cockpit_addr,
        tasks,
    })
}

/// Echo hazards, broker-link changes and dropped telemetry onto the console.
/// Dispatched commands are already confirmed by the console itself.
fn spawn_event_printer(bus: &EventBus) -> JoinHandle<()> {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match events.recv().await {
                Ok(event) => match event.payload {
                    EventPayload::Hazard(hazard) => {
                        println!("\n  {} {}", "⚠ HAZARD".red().bold(), hazard.message.red());
                    }
                    EventPayload::TransportStatus { connected: false } => {
                        println!("\n  {}", "⚠ Broker link lost – reconnecting …".yellow());
                    }
                    EventPayload::TransportStatus { connected: true } => {
                        println!("\n  {}", "✓ Broker link restored.".green());
                    }
                    EventPayload::ReadingRejected { reason } => {
                        println!("\n  {} {}", "⚠ Telemetry dropped:".yellow(), reason.dimmed());
                    }
                    EventPayload::CommandDispatched(_) => {}
                },
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Shutdown
// ────────────────────────────────────────────────────────────────────────────

/// Run the console on its own thread and block until it quits or Ctrl-C
/// arrives, whichever comes first.
fn wait_for_exit(runtime: &Runtime, app: &App) -> Exit {
    let (exit_tx, exit_rx) = mpsc::channel();

    let interrupt_tx = exit_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let _ = interrupt_tx.send(Exit::Interrupted);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; use /quit to exit");
    }

    let console = Console::new(
        runtime.handle().clone(),
        Arc::clone(&app.dashboard),
        Arc::clone(&app.ingestor),
    );
    let spawned = std::thread::Builder::new()
        .name("fermentd-console".to_string())
        .spawn(move || {
            console.run();
            let _ = exit_tx.send(Exit::Quit);
        });
    if let Err(e) = spawned {
        println!("{}: {}", "Console unavailable".red(), e);
    }

    exit_rx.recv().unwrap_or(Exit::Quit)
}

fn shutdown(runtime: &Runtime, app: App, exit: Exit) {
    for task in &app.tasks {
        task.abort();
    }
    if let Err(e) = runtime.block_on(app.transport.disconnect()) {
        warn!(error = %e, "broker disconnect failed");
    }
    let stats = app.ingestor.stats();
    info!(
        accepted = stats.accepted(),
        rejected = stats.rejected(),
        ignored = stats.ignored(),
        "fermentd stopped"
    );
    if matches!(exit, Exit::Interrupted) {
        println!("{}", "  ✓ Exiting fermentd.".green());
    }
}

// ────────────────────────────────────────────────────────────────────────────
// First-run wizard
// ────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      fermentd First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Press Enter to accept a default.\n");

    let mut cfg = Config::default();

    cfg.broker_host = prompt_line(
        &format!("  MQTT broker host [{}]: ", cfg.broker_host),
        &cfg.broker_host,
    );
    if let Ok(p) = prompt_line(
        &format!("  MQTT broker port [{}]: ", cfg.broker_port),
        &cfg.broker_port.to_string(),
    )
    .parse::<u16>()
    {
        cfg.broker_port = p;
    }
    cfg.namespace = prompt_line(
        &format!("  Device topic namespace [{}]: ", cfg.namespace),
        &cfg.namespace,
    );
    if let Ok(p) = prompt_line(
        &format!("  Cockpit HTTP port [{}]: ", cfg.cockpit_port),
        &cfg.cockpit_port.to_string(),
    )
    .parse::<u16>()
    {
        cfg.cockpit_port = p;
    }
    if let Ok(t) = prompt_line(
        &format!("  Over-temperature alarm in °C [{}]: ", cfg.max_temperature),
        &cfg.max_temperature.to_string(),
    )
    .parse::<f64>()
        && t.is_finite()
    {
        cfg.max_temperature = t;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

fn print_banner() {
    println!();
    println!("{}", r#"   ___                          __     __"#.bold().cyan());
    println!("{}", r#"  / _/__ ______ _  ___ ___  ___/ /__ _/ /"#.bold().cyan());
    println!("{}", r#" / _/ -_) __/  ' \/ -_) _ \/ __/ _  / / "#.bold().cyan());
    println!("{}", r#"/_/ \__/_/ /_/_/_/\__/_//_/\__/\_,_/_/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "fermentd".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Fermentation chamber monitor");
    println!();
}

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}

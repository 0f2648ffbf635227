//! Operator console – line-based shell on top of the dashboard.
//!
//! Supported slash-commands:
//!   /status          – current reading, freshness, hazards and mode
//!   /history         – the rolling chart history, oldest first
//!   /mode <PROGRAM>  – start ROTI, BIR, TEMPE or YOGHURT
//!   /stop            – halt the running program
//!   /help            – show this list
//!   /quit | /exit    – leave fermentd

use colored::Colorize;
use std::fmt::Write as _;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use ferment_kernel::Freshness;
use ferment_runtime::{Dashboard, Frame, IngestStats, Ingestor};
use ferment_types::ModeCommand;
use tokio::runtime::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Status,
    History,
    Send(ModeCommand),
    Help,
    Quit,
}

/// Parse one input line.  `Ok(None)` for a blank line.
pub fn parse_command(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();

    let command = match (head, arg) {
        ("/status", _) => ConsoleCommand::Status,
        ("/history", _) => ConsoleCommand::History,
        ("/stop", _) => ConsoleCommand::Send(ModeCommand::Stop),
        ("/mode", Some(name)) => ConsoleCommand::Send(
            name.parse::<ModeCommand>()
                .map_err(|_| format!("unknown program '{name}' (ROTI, BIR, TEMPE, YOGHURT)"))?,
        ),
        ("/mode", None) => return Err("usage: /mode <ROTI|BIR|TEMPE|YOGHURT>".to_string()),
        ("/help", _) => ConsoleCommand::Help,
        ("/quit" | "/exit", _) => ConsoleCommand::Quit,
        (other, _) => return Err(format!("unknown command '{other}'")),
    };
    Ok(Some(command))
}

/// The interactive shell.  Blocks the calling thread on stdin and uses
/// `handle` to run commands on the Tokio runtime.
pub struct Console {
    handle: Handle,
    dashboard: Arc<Dashboard>,
    ingestor: Arc<Ingestor>,
}

impl Console {
    pub fn new(handle: Handle, dashboard: Arc<Dashboard>, ingestor: Arc<Ingestor>) -> Self {
        Self {
            handle,
            dashboard,
            ingestor,
        }
    }

    /// Read commands until `/quit` or end of input.
    pub fn run(&self) {
        let stdin = io::stdin();
        let mut stdout = io::stdout();

        loop {
            print!("{} ", "ferment>".bold().cyan());
            stdout.flush().ok();

            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    eprintln!("{}: {}", "Read error".red(), e);
                    break;
                }
            }

            match parse_command(&line) {
                Ok(None) => {}
                Ok(Some(ConsoleCommand::Quit)) => {
                    println!("{}", "Goodbye.".green());
                    break;
                }
                Ok(Some(command)) => self.execute(command),
                Err(message) => println!(
                    "{} {}. Type {} for available commands.",
                    "✗".red(),
                    message.yellow(),
                    "/help".bold()
                ),
            }
        }
    }

    fn execute(&self, command: ConsoleCommand) {
        match command {
            ConsoleCommand::Status => {
                print!("{}", render_status(&self.dashboard.frame(), self.ingestor.stats()))
            }
            ConsoleCommand::History => print!("{}", render_history(&self.dashboard.frame())),
            ConsoleCommand::Send(cmd) => {
                match self.handle.block_on(self.dashboard.on_command(cmd)) {
                    Ok(()) => println!(
                        "{} {} sent to {}",
                        "✓".green().bold(),
                        cmd.as_str().bold(),
                        self.dashboard.command_topic().dimmed()
                    ),
                    Err(e) => println!("{} {}", "✗ Command not sent:".red(), e),
                }
            }
            ConsoleCommand::Help => print!("{}", render_help()),
            ConsoleCommand::Quit => {}
        }
    }
}

pub fn render_help() -> String {
    let mut out = String::new();
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "fermentd Commands".bold().underline());
    let _ = writeln!(out, "  {}          – current reading and alarms", "/status".bold().cyan());
    let _ = writeln!(out, "  {}         – last readings, oldest first", "/history".bold().cyan());
    let _ = writeln!(out, "  {}  – start a fermentation program", "/mode <PROGRAM>".bold().cyan());
    let _ = writeln!(out, "  {}            – halt the running program", "/stop".bold().cyan());
    let _ = writeln!(out, "  {}    – exit", "/quit  /exit".bold().cyan());
    let _ = writeln!(out, "  Programs: ROTI, BIR, TEMPE, YOGHURT");
    let _ = writeln!(out);
    out
}

pub fn render_status(frame: &Frame, stats: &IngestStats) -> String {
    let mut out = String::new();
    let status = frame.status();

    let freshness = match frame.freshness {
        Freshness::NoData => "waiting for first reading".yellow(),
        Freshness::Live => "live".green(),
        Freshness::Stale { silent_secs } => format!("stale ({silent_secs}s without data)").red(),
    };
    let link = if frame.transport_connected {
        "connected".green()
    } else {
        "disconnected".red()
    };

    let _ = writeln!(out);
    let _ = writeln!(out, "{}", "Chamber Status".bold().underline());
    let _ = writeln!(out, "  Temperature : {} °C", status.temp.to_string().bold());
    let _ = writeln!(out, "  Humidity    : {} %", status.hum.to_string().bold());
    let _ = writeln!(out, "  Mode        : {}", status.mode.bold());
    let _ = writeln!(out, "  Target      : {}", status.range);
    if let Some(pending) = frame.mode.pending {
        let _ = writeln!(out, "  Requested   : {} (awaiting device)", pending.as_str().yellow());
    }
    let _ = writeln!(out, "  Data        : {freshness}");
    let _ = writeln!(out, "  Broker      : {link}");
    let _ = writeln!(
        out,
        "  Readings    : {} accepted, {} rejected",
        stats.accepted(),
        stats.rejected()
    );
    for hazard in &frame.hazards {
        let _ = writeln!(out, "  {} {}", "⚠".red().bold(), hazard.message.red());
    }
    let _ = writeln!(out);
    out
}

pub fn render_history(frame: &Frame) -> String {
    let mut out = String::new();
    let history = frame.history();

    let _ = writeln!(out);
    if history.is_empty() {
        let _ = writeln!(out, "  {}", "No readings yet.".dimmed());
        let _ = writeln!(out);
        return out;
    }
    let _ = writeln!(out, "  {:<10} {:>8} {:>8}", "time".bold(), "°C".bold(), "%RH".bold());
    for entry in history {
        let _ = writeln!(out, "  {:<10} {:>8.1} {:>8.1}", entry.time, entry.temp, entry.hum);
    }
    let _ = writeln!(out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferment_kernel::{HazardMonitor, ModeTracker, StateStore};
    use ferment_middleware::{EventBus, InboundMessage, LoopbackTransport};
    use ferment_runtime::CommandDispatcher;
    use std::time::Duration;

    const TOPIC: &str = "farm/pub/dht";

    fn rig() -> (Arc<Dashboard>, Ingestor) {
        let (transport, _inbound) = LoopbackTransport::new(4);
        let store = Arc::new(StateStore::new());
        let modes = Arc::new(ModeTracker::new());
        let hazards = Arc::new(HazardMonitor::with_max_temperature(40.0));
        let bus = EventBus::default();
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::new(transport),
            "farm/sub/led",
            Arc::clone(&modes),
            bus.clone(),
        ));
        let ingestor = Ingestor::new(
            Arc::clone(&store),
            Arc::clone(&modes),
            Arc::clone(&hazards),
            bus,
            TOPIC,
        );
        let dashboard = Arc::new(Dashboard::new(
            store,
            modes,
            hazards,
            dispatcher,
            Duration::from_secs(30),
        ));
        (dashboard, ingestor)
    }

    #[test]
    fn slash_commands_are_parsed() {
        assert_eq!(parse_command("/status\n"), Ok(Some(ConsoleCommand::Status)));
        assert_eq!(parse_command("  /history "), Ok(Some(ConsoleCommand::History)));
        assert_eq!(
            parse_command("/mode roti"),
            Ok(Some(ConsoleCommand::Send(ModeCommand::Roti)))
        );
        assert_eq!(
            parse_command("/stop"),
            Ok(Some(ConsoleCommand::Send(ModeCommand::Stop)))
        );
        assert_eq!(parse_command("/exit"), Ok(Some(ConsoleCommand::Quit)));
        assert_eq!(parse_command("   \n"), Ok(None));
    }

    #[test]
    fn bad_input_yields_a_message() {
        assert!(parse_command("/mode").unwrap_err().contains("usage"));
        assert!(parse_command("/mode KOMBUCHA").unwrap_err().contains("KOMBUCHA"));
        assert!(parse_command("status").unwrap_err().contains("unknown command"));
    }

    #[test]
    fn status_before_first_reading_says_waiting() {
        let (dashboard, ingestor) = rig();
        let text = render_status(&dashboard.frame(), ingestor.stats());
        assert!(text.contains("waiting for first reading"));
        assert!(text.contains("0-0 °C"));
        assert!(text.contains("NONE"));
    }

    #[test]
    fn status_shows_reading_and_over_temperature_hazard() {
        let (dashboard, ingestor) = rig();
        ingestor
            .ingest(&InboundMessage::new(TOPIC, br#"{"temperature":45,"humidity":50}"#.to_vec()))
            .unwrap();

        let text = render_status(&dashboard.frame(), ingestor.stats());
        assert!(text.contains("45"));
        assert!(text.contains("exceeds limit"));
        assert!(text.contains("1 accepted"));
    }

    #[test]
    fn history_lists_entries_oldest_first() {
        let (dashboard, ingestor) = rig();
        assert!(render_history(&dashboard.frame()).contains("No readings yet"));

        for temp in [21.0, 22.5] {
            let payload = format!(r#"{{"temperature":{temp},"humidity":55}}"#);
            ingestor
                .ingest(&InboundMessage::new(TOPIC, payload.into_bytes()))
                .unwrap();
        }
        let text = render_history(&dashboard.frame());
        let first = text.find("21.0").unwrap();
        let second = text.find("22.5").unwrap();
        assert!(first < second);
    }

    #[test]
    fn help_lists_every_command() {
        let text = render_help();
        for command in ["/status", "/history", "/mode", "/stop", "/quit"] {
            assert!(text.contains(command), "help is missing {command}");
        }
    }
}

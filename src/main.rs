//! Bucklebench - command-line host for the Euler buckling test bench
//!
//! Runs headless tests (connect, tare, stream, export), probes for the bench,
//! and offers an interactive console mirroring the bench's front panel.

use anyhow::Context;
use bucklebench_core::cli::console::HELP;
use bucklebench_core::cli::{
    format_identity, format_view, parse_command, print_exit_codes, CliResult, ConsoleCommand, ExitCodes,
    OutputFormat,
};
use bucklebench_core::config::{self, AppConfig};
use bucklebench_core::core::bench::STATUS_CONNECTION_LOST;
use bucklebench_core::core::buffer::SampleSnapshot;
use bucklebench_core::core::discovery::DeviceIdentity;
use bucklebench_core::core::simulator::SIMULATED_PORT;
use bucklebench_core::core::transport::list_ports;
use bucklebench_core::utils::logging;
use bucklebench_core::{
    Bench, BenchCommand, BenchView, CommandOutcome, DiscoveryConfig, DiscoveryTask, Driver, DriverHandle,
    Exporter, SerialPortFactory, Session, SessionState, SimulatedFactory, TransportFactory,
};
use clap::{ArgAction, Parser, Subcommand};
use serialport::SerialPortType;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Bucklebench CLI
#[derive(Parser, Debug)]
#[command(name = "bucklebench", version, about = "Host driver for the Euler buckling test bench", long_about = None)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "BUCKLEBENCH_CONFIG")]
    config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    format: OutputFormat,

    /// Use the built-in bench simulator instead of serial ports
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show USB details
        #[arg(short, long)]
        detailed: bool,
    },

    /// Search for the bench and print its identity
    Probe,

    /// Run one test and export the samples
    Run {
        /// Stop after this many seconds
        #[arg(short, long)]
        duration: Option<f64>,

        /// Stop after this many samples
        #[arg(short = 'n', long)]
        samples: Option<usize>,

        /// Zero the load cell before starting
        #[arg(long)]
        tare: bool,

        /// Dataset name (file becomes <prefix><name>.<ext>)
        #[arg(long)]
        name: Option<String>,

        /// Write to this exact path instead
        #[arg(short, long, conflicts_with = "name")]
        output: Option<PathBuf>,
    },

    /// Interactive console
    Console,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Print the exit code table
    ExitCodes,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match execute(&cli).await {
        Ok(result) => result,
        Err(e) => CliResult::from(e),
    };

    match (&result, result.message()) {
        (CliResult::Success(_), Some(msg)) if !cli.quiet => println!("{msg}"),
        (CliResult::Error(..), Some(msg)) => eprintln!("error: {msg}"),
        _ => {}
    }
    result.to_exit_code()
}

async fn execute(cli: &Cli) -> anyhow::Result<CliResult> {
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
    .context("loading configuration")?;

    let _log_guard = logging::init(&config.logging, cli.verbose, cli.quiet)?;
    tracing::debug!("{} v{}", bucklebench_core::NAME, bucklebench_core::VERSION);

    match &cli.command {
        Commands::ListPorts { detailed } => list(cli, *detailed),
        Commands::Probe => probe(cli, &config).await,
        Commands::Run {
            duration,
            samples,
            tare,
            name,
            output,
        } => {
            let duration = match run_duration(*duration) {
                Ok(duration) => duration,
                Err(result) => return Ok(result),
            };
            let plan = RunPlan {
                duration,
                samples: *samples,
                tare: *tare,
                name: name.clone(),
                output: output.clone(),
            };
            run_test(cli, &config, plan).await
        }
        Commands::Console => console(cli, &config).await,
        Commands::Config { action } => handle_config(cli, &config, action),
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(CliResult::success())
        }
    }
}

/// `--duration` in seconds; negative, NaN or out-of-range values are argument errors
fn run_duration(secs: Option<f64>) -> Result<Option<Duration>, CliResult> {
    secs.map(Duration::try_from_secs_f64)
        .transpose()
        .map_err(|e| CliResult::error(ExitCodes::INVALID_ARGS, format!("invalid --duration: {e}")))
}

fn factory(cli: &Cli, config: &AppConfig) -> Box<dyn TransportFactory> {
    if cli.simulate {
        Box::new(SimulatedFactory::new(config.simulator_config()))
    } else {
        Box::new(SerialPortFactory::new(config.serial_config()))
    }
}

fn discovery_config(cli: &Cli, config: &AppConfig) -> DiscoveryConfig {
    let mut discovery = config.discovery_config();
    if cli.simulate {
        // nothing to reset on a simulated board
        discovery.settle_delay = Duration::ZERO;
    }
    discovery
}

fn start_driver(cli: &Cli, config: &AppConfig) -> anyhow::Result<(DriverHandle, JoinHandle<BenchView>)> {
    let bench = Bench::new(
        factory(cli, config),
        discovery_config(cli, config),
        config.pipeline_config(),
        config.exporter(),
    );
    let (driver, handle) = Driver::new(bench, config.tick());
    let task = tokio::spawn(driver.run());

    let interrupt = handle.clone();
    ctrlc::set_handler(move || {
        INTERRUPTED.store(true, Ordering::SeqCst);
        tracing::warn!("Interrupted, stopping the bench");
        if !interrupt.notify(BenchCommand::Shutdown) {
            tracing::error!("Could not queue shutdown");
        }
    })
    .context("installing Ctrl-C handler")?;

    Ok((handle, task))
}

async fn stop_driver(handle: &DriverHandle, task: JoinHandle<BenchView>) -> anyhow::Result<BenchView> {
    // an already stopped driver is fine here
    let _ = handle.send_command(BenchCommand::Shutdown).await;
    task.await.context("driver task panicked")
}

fn list(cli: &Cli, detailed: bool) -> anyhow::Result<CliResult> {
    if cli.simulate {
        println!("{SIMULATED_PORT}");
        return Ok(CliResult::success());
    }

    let ports = list_ports()?;
    if ports.is_empty() {
        return Ok(CliResult::success_with_message("No serial ports found."));
    }

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| match &p.port_type {
                    SerialPortType::UsbPort(usb) => serde_json::json!({
                        "name": p.port_name,
                        "type": "usb",
                        "vid": format!("{:04x}", usb.vid),
                        "pid": format!("{:04x}", usb.pid),
                        "manufacturer": usb.manufacturer,
                        "product": usb.product,
                        "serial_number": usb.serial_number,
                    }),
                    other => serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{other:?}"),
                    }),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            for port in &ports {
                match (&port.port_type, detailed) {
                    (SerialPortType::UsbPort(usb), true) => println!(
                        "{:<20} USB {:04x}:{:04x} {} {}",
                        port.port_name,
                        usb.vid,
                        usb.pid,
                        usb.manufacturer.as_deref().unwrap_or("-"),
                        usb.product.as_deref().unwrap_or("-"),
                    ),
                    (other, true) => println!("{:<20} {:?}", port.port_name, other),
                    (_, false) => println!("{}", port.port_name),
                }
            }
        }
    }
    Ok(CliResult::success())
}

async fn probe(cli: &Cli, config: &AppConfig) -> anyhow::Result<CliResult> {
    let search = DiscoveryTask::new(Arc::from(factory(cli, config)), discovery_config(cli, config));
    let (transport, identity) = search.run().await?;
    let report = format_identity(&identity, cli.format);
    Session::new(transport, identity).close();
    Ok(CliResult::success_with_message(report))
}

struct RunPlan {
    duration: Option<Duration>,
    samples: Option<usize>,
    tare: bool,
    name: Option<String>,
    output: Option<PathBuf>,
}

async fn run_test(cli: &Cli, config: &AppConfig, plan: RunPlan) -> anyhow::Result<CliResult> {
    let (handle, task) = start_driver(cli, config)?;

    handle
        .send_command(BenchCommand::Connect)
        .await
        .context("connecting to the bench")?;
    if let Some(identity) = handle.view().identity {
        if !cli.quiet {
            eprintln!("Connected: {}", format_identity(&identity, OutputFormat::Text));
        }
    }
    if plan.tare {
        handle.send_command(BenchCommand::Tare).await.context("taring")?;
    }
    handle.send_command(BenchCommand::Start).await.context("starting")?;

    let deadline = plan.duration.map(|d| tokio::time::Instant::now() + d);
    let mut views = handle.view_receiver();
    loop {
        let timer = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = views.borrow_and_update().clone();
                if view.state != SessionState::Running {
                    break;
                }
                if plan.samples.is_some_and(|n| view.sample_count >= n) {
                    break;
                }
            }
            () = timer => break,
        }
    }

    if handle.view().state == SessionState::Running {
        handle.send_command(BenchCommand::Stop).await.context("stopping")?;
    }
    let view = stop_driver(&handle, task).await?;
    let interrupted = run_interruption(&view);

    let samples = view.samples.clone().unwrap_or_default();
    if samples.is_empty() {
        return Ok(match interrupted {
            Some(result) => result,
            None => CliResult::success_with_message("No samples recorded."),
        });
    }

    let path = save_run(config, &samples, view.identity.as_ref(), &plan)?;
    let summary = format!("Saved {} samples to {}", samples.len(), path.display());
    Ok(match interrupted {
        Some(CliResult::Error(code, msg)) => CliResult::error(code, format!("{msg}; {summary}")),
        _ => CliResult::success_with_message(summary),
    })
}

/// Non-`None` when the run did not end on its own terms
fn run_interruption(view: &BenchView) -> Option<CliResult> {
    if view.status == STATUS_CONNECTION_LOST {
        return Some(CliResult::error(ExitCodes::CONNECTION_LOST, "connection lost during the run"));
    }
    INTERRUPTED
        .load(Ordering::SeqCst)
        .then(|| CliResult::error(ExitCodes::CANCELLED, "run interrupted"))
}

fn save_run(
    config: &AppConfig,
    samples: &SampleSnapshot,
    identity: Option<&DeviceIdentity>,
    plan: &RunPlan,
) -> anyhow::Result<PathBuf> {
    match &plan.output {
        Some(path) => {
            let format = match path.extension().and_then(|e| e.to_str()) {
                Some(ext) => ext.parse().unwrap_or(config.export.format),
                None => config.export.format,
            };
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            Exporter::new(dir, "", format)
                .export_to(path, &samples.distances(), &samples.forces(), identity)
                .with_context(|| format!("writing {}", path.display()))?;
            Ok(path.clone())
        }
        None => {
            let name = plan
                .name
                .clone()
                .unwrap_or_else(|| chrono::Local::now().format("%Y%m%d-%H%M%S").to_string());
            Ok(config
                .exporter()
                .export(&name, samples, identity)
                .context("exporting samples")?)
        }
    }
}

async fn console(cli: &Cli, config: &AppConfig) -> anyhow::Result<CliResult> {
    let (handle, task) = start_driver(cli, config)?;

    // stdin gets its own thread so a pending read never holds up shutdown
    let (line_tx, mut line_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    println!("bucklebench console; type 'help' for commands");
    prompt();
    loop {
        tokio::select! {
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                match parse_command(&line) {
                    Ok(None) => {}
                    Ok(Some(ConsoleCommand::Quit)) => break,
                    Ok(Some(ConsoleCommand::Help)) => println!("{HELP}"),
                    Ok(Some(ConsoleCommand::Status)) => println!("{}", format_view(&handle.view(), cli.format)),
                    Ok(Some(ConsoleCommand::Bench(command))) if !handle.view().controls.allows(&command) => {
                        println!("{} is not available while {}", command.name(), handle.view().state);
                    }
                    Ok(Some(ConsoleCommand::Bench(command))) => {
                        match handle.send_command(command).await {
                            Ok(CommandOutcome::Saved(path)) => println!("saved {}", path.display()),
                            Ok(CommandOutcome::Done) => println!("{}", handle.view().status),
                            Err(e) => println!("rejected: {e}"),
                        }
                    }
                    Err(msg) => println!("{msg}"),
                }
                prompt();
            }
            () = handle.closed() => {
                println!();
                break;
            }
        }
    }

    stop_driver(&handle, task).await?;
    Ok(CliResult::success())
}

fn prompt() {
    print!("> ");
    let _ = std::io::stdout().flush();
}

fn handle_config(cli: &Cli, config: &AppConfig, action: &ConfigAction) -> anyhow::Result<CliResult> {
    let path = cli
        .config
        .clone()
        .or_else(config::config_file)
        .context("could not determine config directory")?;

    match action {
        ConfigAction::Show => {
            let text = match cli.format {
                OutputFormat::Text => config.to_toml()?,
                OutputFormat::Json => serde_json::to_string_pretty(config)?,
            };
            println!("{text}");
            Ok(CliResult::success())
        }
        ConfigAction::Path => Ok(CliResult::success_with_message(path.display().to_string())),
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                return Ok(CliResult::error(
                    ExitCodes::CONFIG_ERROR,
                    format!("{} already exists (use --force to overwrite)", path.display()),
                ));
            }
            AppConfig::default().save_to(&path)?;
            Ok(CliResult::success_with_message(format!("Wrote {}", path.display())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_duration() {
        assert_eq!(run_duration(None).unwrap(), None);
        assert_eq!(run_duration(Some(1.5)).unwrap(), Some(Duration::from_millis(1500)));
        for bad in [-1.0, f64::NAN, f64::INFINITY, 1e300] {
            assert_eq!(run_duration(Some(bad)).unwrap_err().code(), ExitCodes::INVALID_ARGS);
        }
    }
}

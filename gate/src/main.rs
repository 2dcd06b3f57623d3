use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kuka_c3_osc_gate::bot::AllowAllTransitions;
use kuka_c3_osc_gate::config::TeamConfig;
use kuka_c3_osc_gate::errors::GateError;
use kuka_c3_osc_gate::service::Service;
use kuka_c3_osc_gate::team::Team;
use osc_io::OscServer;

const EXEC_NAME: &str = "kuka-c3-osc-gate";

/// OSC to KUKA C3 protocol gateway.
#[derive(Parser, Debug)]
#[command(name = EXEC_NAME, version, about)]
struct Cli {
    /// Log to stdout instead of the log file
    #[arg(short, long)]
    verbose: bool,

    /// OSC listening UDP port
    #[arg(long, default_value_t = 8765)]
    osc: u16,

    /// App (dashboard) listening TCP port; disabled when absent
    #[arg(long)]
    app: Option<u16>,

    /// Configuration file
    #[arg(long, default_value = "kuka-c3-osc-gate.json")]
    cfg: PathBuf,

    /// Write a configuration skeleton with N empty robots and exit
    #[arg(short = 'i', long = "init", default_value_t = 0, value_name = "N")]
    init: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.init > 0 {
        return match TeamConfig::skeleton(cli.init).save(&cli.cfg) {
            Ok(()) => {
                println!(
                    "configuration skeleton with {} bots written to {}",
                    cli.init,
                    cli.cfg.display()
                );
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("configuration init error: {err}");
                ExitCode::FAILURE
            }
        };
    }

    if let Err(err) = init_logging(cli.verbose) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "fatal");
            eprintln!("fatal: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), GateError> {
    let config = TeamConfig::load(&cli.cfg)?;

    let osc_server = OscServer::new(cli.osc);
    osc_server.listen_and_serve().await?;

    let team = Team::up(config, &osc_server, Arc::new(AllowAllTransitions)).await?;

    let service = match cli.app {
        Some(port) => Some(Service::start(port, Arc::clone(&team)).await?),
        None => None,
    };

    wait_for_shutdown_signal().await?;
    info!("shutting down");

    osc_server.unsubscribe_all().await;
    osc_server.shutdown().await;
    team.shutdown().await;
    if let Some(service) = service {
        service.stop().await;
    }
    Ok(())
}

fn init_logging(verbose: bool) -> Result<(), GateError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if verbose {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(());
    }

    let path = std::env::temp_dir().join(format!("{EXEC_NAME}.log"));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|err| GateError::Startup(format!("log file {}: {err}", path.display())))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<(), GateError> {
    use tokio::signal::unix::{signal, SignalKind};

    let io_err = |err: std::io::Error| GateError::Startup(format!("signal handler: {err}"));
    let mut interrupt = signal(SignalKind::interrupt()).map_err(io_err)?;
    let mut terminate = signal(SignalKind::terminate()).map_err(io_err)?;
    let mut hangup = signal(SignalKind::hangup()).map_err(io_err)?;
    let mut quit = signal(SignalKind::quit()).map_err(io_err)?;

    tokio::select! {
        _ = interrupt.recv() => info!("received SIGINT"),
        _ = terminate.recv() => info!("received SIGTERM"),
        _ = hangup.recv() => info!("received SIGHUP"),
        _ = quit.recv() => info!("received SIGQUIT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<(), GateError> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|err| GateError::Startup(format!("signal handler: {err}")))?;
    info!("received interrupt");
    Ok(())
}

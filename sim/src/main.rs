use clap::Parser;
use tracing::info;

use c3_sim::C3Emulator;

/// Standalone C3 emulator fleet for driving the gateway without hardware.
#[derive(Parser, Debug)]
#[command(name = "c3-sim", version, about)]
struct Cli {
    /// First TCP port; each further emulator takes the next one
    #[arg(long, default_value_t = 7001)]
    port: u16,

    /// Number of emulated robots
    #[arg(long, default_value_t = 1)]
    count: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().init();
    let cli = Cli::parse();

    let mut emulators = Vec::with_capacity(cli.count as usize);
    for i in 0..cli.count {
        let emulator = C3Emulator::start(cli.port + i).await?;
        info!(address = %emulator.address(), "emulated robot up");
        emulators.push(emulator);
    }

    tokio::signal::ctrl_c().await?;

    for emulator in &emulators {
        emulator.shutdown().await;
    }
    Ok(())
}

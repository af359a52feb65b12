//! IRMix - impulse response mixer
//!
//! Command-line front end: offline export of the mixed impulse, alignment
//! reports, and live monitoring through the default audio devices.

mod cli;
mod monitor;
mod setup;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use setup::{build_engine, print_slots};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export { mix, out, rate, mono } => {
            let mut engine = build_engine(&mix)?;
            print_slots(&engine);
            engine.export_mixed_impulse(&out, rate, mono)?;
            println!("wrote {} ({} Hz, {})", out.display(), rate, if mono { "mono" } else { "stereo" });
            engine.shutdown();
        }
        Commands::Align { mut mix } => {
            mix.align = true;
            let mut engine = build_engine(&mix)?;
            print_slots(&engine);
            engine.shutdown();
        }
        Commands::Monitor { mix, max_block } => {
            let engine = build_engine(&mix)?;
            monitor::run(engine, max_block)?;
        }
    }

    Ok(())
}

//! Command-line arguments

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "irmix")]
#[command(author, version, about = "Mix up to four impulse responses", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render the mixed impulse response to a 24-bit WAV file
    Export {
        #[command(flatten)]
        mix: MixArgs,

        /// Output WAV path
        #[arg(short, long)]
        out: PathBuf,

        /// Export sample rate
        #[arg(short, long, default_value_t = 48000)]
        rate: u32,

        /// Fold the result down to mono, (L+R)/2
        #[arg(long)]
        mono: bool,
    },

    /// Estimate alignment offsets and print them
    Align {
        #[command(flatten)]
        mix: MixArgs,
    },

    /// Run the mixer live from the default input to the default output
    Monitor {
        #[command(flatten)]
        mix: MixArgs,

        /// Largest block processed in one pass
        #[arg(long, default_value_t = 1024)]
        max_block: usize,
    },
}

/// Mixer setup shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct MixArgs {
    /// Impulse response files, assigned to slots 1-4 in order
    #[arg(short, long = "ir", value_name = "PATH")]
    pub irs: Vec<PathBuf>,

    /// Parameter overrides, e.g. --set Slot2_Pan=-30
    #[arg(short, long = "set", value_name = "NAME=VALUE", value_parser = parse_assignment)]
    pub params: Vec<(String, f32)>,

    /// Restore this session file before applying other options
    #[arg(long, value_name = "PATH")]
    pub session: Option<PathBuf>,

    /// Restore the session saved in the user config directory
    #[arg(long, conflicts_with = "session")]
    pub last_session: bool,

    /// Save the resulting session to the user config directory
    #[arg(long)]
    pub save_session: bool,

    /// Run auto-alignment after loading and apply the offsets
    #[arg(long)]
    pub align: bool,
}

fn parse_assignment(s: &str) -> anyhow::Result<(String, f32)> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected NAME=VALUE, got '{}'", s))?;
    let value: f32 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {}", name))?;
    Ok((name.trim().to_string(), value))
}

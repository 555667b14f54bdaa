use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

/// Connect, flash, and stream motionlink sensor boards.
#[derive(Debug, Parser)]
#[command(name = "motionlink", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config profile to use.
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Emit machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// List boards connected over USB.
    Devices,

    /// Flash a firmware image onto the board's debug probe.
    Flash(FlashArgs),

    /// Connect to a board and stream samples, buttons, and state.
    Connect(ConnectArgs),
}

#[derive(Debug, Args)]
pub struct FlashArgs {
    /// Path to the firmware HEX image.
    pub image: PathBuf,

    /// Probe volume to flash to (auto-detected when omitted).
    #[arg(long)]
    pub volume: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Serial port to open (discovery is used when omitted).
    #[arg(long)]
    pub port: Option<String>,

    /// Baud rate override.
    #[arg(long)]
    pub baud: Option<u32>,
}

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "logship", about = "A lightweight log shipping agent", version)]
pub struct Opts {
    /// Path to the config file.
    #[arg(long)]
    pub config: PathBuf,

    /// Validate the config file and exit.
    #[arg(long)]
    pub check_config: bool,

    /// Set the log level to debug.
    #[arg(long)]
    pub debug: bool,
}

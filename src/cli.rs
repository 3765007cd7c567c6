use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tierstore")]
#[command(about = "Tiered file backup store")]
#[command(version)]
pub struct Cli {
    /// Configuration file (defaults to tierstore.toml in the platform config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the classifier until interrupted
    Serve,
    /// Store a local file in hot storage
    Upload {
        file: PathBuf,
        /// Name to store the file under (defaults to the local file name)
        #[arg(long)]
        name: Option<String>,
    },
    /// Fetch a file by URL, restoring it from the archive if needed
    Download {
        url: String,
        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// List every stored file
    List,
}

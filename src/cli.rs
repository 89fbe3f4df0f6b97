use crate::export::ExportPolicy;
use crate::protocol::Role;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "next-token-game")]
#[command(version)]
#[command(about = "Play the guess-the-next-token game from a terminal")]
pub struct Args {
    /// Which side to play: outside (ask) or inside (choose tokens)
    #[arg(long, value_enum)]
    pub loc: Option<Role>,

    /// Page-style query string to take the role from, e.g. "loc=inside"
    #[arg(long, conflicts_with = "loc")]
    pub query: Option<String>,

    /// Backend WebSocket base URL (e.g. ws://127.0.0.1:5000)
    #[arg(long)]
    pub server: Option<String>,

    /// TOML config file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Directory transcripts are saved to
    #[arg(long)]
    pub export_dir: Option<PathBuf>,

    /// Whether to save a transcript on restart: ask, always or never
    #[arg(long, value_enum)]
    pub export: Option<ExportPolicy>,

    /// Print response text at once instead of character by character
    #[arg(long)]
    pub no_animate: bool,

    /// Delay between characters when animating
    #[arg(long)]
    pub char_delay_ms: Option<u64>,

    /// Log filter directive (overridden by RUST_LOG)
    #[arg(long)]
    pub log: Option<String>,
}

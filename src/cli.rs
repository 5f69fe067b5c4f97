//! Command-line interface definitions for the harvester host.
//!
//! This module defines the CLI arguments and options using the `clap` crate.
//! Flags override values from the optional YAML config file; most of them can
//! also be set through environment variables.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the harvester host.
///
/// The host reads newline-delimited JSON requests, dispatches each one as if
/// a registered page had sent it, and writes every reply as one JSON line.
///
/// # Examples
///
/// ```sh
/// # Read requests from stdin, print replies to stdout
/// echo '{"action":"fetchItemDetails","items":[...]}' | case_tab_harvester
///
/// # Use a config file, four tabs at a time, replies to a file
/// case_tab_harvester -i requests.jsonl -c harvest.yaml -o replies.jsonl --concurrency 4
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Newline-delimited JSON requests ("-" for stdin)
    #[arg(short, long, default_value = "-")]
    pub input: String,

    /// Optional path to a YAML config file
    #[arg(short, long, env = "HARVEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Where to write replies (stdout when omitted)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of tabs scraped at the same time
    #[arg(long, env = "HARVEST_CONCURRENCY")]
    pub concurrency: Option<usize>,

    /// Directory for rendered full views
    #[arg(long, env = "HARVEST_VIEWS_DIR")]
    pub views_dir: Option<PathBuf>,
}

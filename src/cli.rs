//! Command-line surface.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "staticpub", version, about = "Static page cache generation and invalidation", long_about = None)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(long, short, global = true, env = "STATICPUB_CONFIG")]
    pub config: Option<PathBuf>,

    /// Content manifest, overriding `content_manifest` from the configuration
    #[arg(long, short, global = true)]
    pub manifest: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Queue a rebuild of every live page; anything else in the cache is purged afterwards
    EnqueueAll,
    /// Queue the pages affected by publishing a node
    Publish(MutationArgs),
    /// Queue the pages affected by unpublishing a node
    Unpublish(MutationArgs),
    /// Drain the job queue
    Process(RunArgs),
    /// Drain queue entries directly, guarded by a heartbeat lock file (single host only)
    Legacy(RunArgs),
    /// Remove cached pages that no live node produces
    PurgeOrphans {
        /// Print every purged URL
        #[arg(long, short)]
        verbose: bool,
        /// List orphans without removing them
        #[arg(long)]
        dry_run: bool,
    },
    /// Show queue counts
    Status {
        /// Print as JSON
        #[arg(long)]
        json: bool,
        /// Also list the next entries to be claimed and the most recent jobs
        #[arg(long, short = 'n', default_value_t = 0)]
        limit: usize,
    },
}

#[derive(Args, Debug)]
pub struct MutationArgs {
    /// Content node id
    pub node: u64,
    /// Manifest of the live tree as it was before the change, to detect moved URLs
    #[arg(long)]
    pub previous: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Keep polling for work until interrupted
    #[arg(long)]
    pub daemon: bool,
    /// Print one line per URL processed
    #[arg(long, short)]
    pub verbose: bool,
}

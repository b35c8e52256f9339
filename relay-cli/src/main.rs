//! Channel Relay — mirror a source channel to downstream platforms.
//!
//! # Usage
//!
//! ```text
//! channel-relay ingest [--source-dir <dir>] [--limit N]
//! channel-relay catch-up [--source-dir <dir>] [--limit N]
//! channel-relay sync <botapi|webhook>
//! channel-relay status [--json]
//! channel-relay test-connection <botapi|webhook>
//! ```
//!
//! Every option can also be given through its environment variable
//! (`RELAY_STORAGE_DIR`, `RELAY_SOURCE_DIR`, `BOTAPI_TOKEN`, ...).

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    catch_up::CatchUpArgs, ingest::IngestArgs, status::StatusArgs, sync::SyncArgs,
    test_connection::TestConnectionArgs,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "channel-relay",
    version,
    about = "Relay a source channel to downstream messaging platforms",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the ingester: catch up, then follow live events until interrupted.
    Ingest(IngestArgs),

    /// Run a single catch-up pass and exit.
    CatchUp(CatchUpArgs),

    /// Run the syncer for one platform until interrupted or a send fails.
    Sync(SyncArgs),

    /// Show the status ledger, pending records and per-platform progress.
    Status(StatusArgs),

    /// Check that a platform's credentials work.
    TestConnection(TestConnectionArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest(args) => args.run(),
        Commands::CatchUp(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::TestConnection(args) => args.run(),
    }
}

//! feed - diagnostics CLI
//!
//! `--version` prints the one-line banner; `--Version` additionally lists
//! every loaded namespace, package type, and stage with its identifier and
//! description. Exit code 0 on success.

use clap::Parser;
use feed_common::logging::{init_logging, LogConfig, LogLevel};
use tracing::debug;

/// Feed ingest pipeline diagnostics
#[derive(Parser, Debug)]
#[command(name = "feed", about, disable_version_flag = true)]
struct Args {
    /// Print the version banner
    #[arg(long = "version")]
    version: bool,

    /// Print the version banner plus all loaded plugins
    #[arg(long = "Version")]
    version_full: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let log_config = if args.verbose {
        LogConfig::console(LogLevel::Debug)
    } else {
        LogConfig::console(LogLevel::Warn)
    };
    // diagnostics must work even when logging can't initialize
    let _ = init_logging(&log_config);
    debug!(?args, "feed diagnostics invoked");

    if !args.version && !args.version_full {
        banner();
        eprintln!("\nFor more information, try '--help'.");
        return;
    }

    banner();

    if args.version_full {
        println!("\nNamespaces:");
        for ns in feed_ingest::namespace::builtins() {
            println!("  {:<12} {}", ns.identifier, ns.description);
        }

        println!("\nPackage types:");
        for pt in feed_ingest::packagetype::builtins() {
            println!("  {:<12} {}", pt.identifier, pt.description);
        }

        println!("\nStages:");
        for ctor in feed_ingest::stages::builtins() {
            let stage = ctor();
            println!("  {:<16} {}", stage.identifier(), stage.description());
        }
    }
}

fn banner() {
    println!(
        "feed {} - library repository ingest pipeline",
        feed_ingest::VERSION
    );
}

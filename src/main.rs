//! prefixdb - prefix statistics database inspector
//!
//! Entry point for the CLI application.

use anyhow::{Context as _, Result};
use clap::Parser;
use prefixdb::config::{CliArgs, Command, DatabaseOptions};
use prefixdb::lock::{lock_holder, Context};
use prefixdb::report;
use prefixdb::{Database, MetricName, ScanOptions, Scope};
use std::process::ExitCode;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    // Parse CLI arguments
    let args = CliArgs::parse();

    // Setup logging
    setup_logging(args.verbose)?;

    // Commands that never open the database
    match &args.command {
        Command::Metrics => {
            let names: Vec<&str> = MetricName::all().iter().map(|m| m.as_str()).collect();
            report::print_list(&names, args.json)?;
            return Ok(());
        }
        Command::LockInfo => {
            let holder = lock_holder(&args.dir).context("Failed to read lock info")?;
            report::print_lock_info(&args.dir, holder.as_ref(), args.json)?;
            return Ok(());
        }
        _ => {}
    }

    // Validate and create options
    let opts = DatabaseOptions::from_args(&args).context("Invalid configuration")?;

    // Interrupt cancels a pending lock wait or a running scan
    let (ctx, cancel) = Context::with_cancel();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupt received, shutting down...");
        cancel.cancel();
    })
    .context("Failed to set signal handler")?;

    let db = Database::open(&ctx, &args.dir, opts)
        .with_context(|| format!("Failed to open database at {}", args.dir.display()))?;
    debug!(dir = %db.dir().display(), "database opened read-only");

    let result = dispatch(&ctx, &db, &args);
    let closed = db.close().context("Failed to close database");
    result?;
    closed
}

fn dispatch(ctx: &Context, db: &Database, args: &CliArgs) -> Result<()> {
    match &args.command {
        Command::Total { metric, user } => {
            let metric: MetricName = metric.parse()?;
            let value = db.total(metric, &scope(user))?;
            report::print_total(metric, user.as_deref(), value, args.json)?;
        }

        Command::Top { metric, n, user } => {
            let metric: MetricName = metric.parse()?;
            let top = db.top_n(metric, *n, &scope(user))?;
            report::print_top(metric, user.as_deref(), &top, args.json)?;
        }

        Command::Get { prefix } => match db.get(prefix)? {
            Some(info) => report::print_prefix(prefix, &info, args.json)?,
            None => anyhow::bail!("no record for prefix {}", prefix),
        },

        Command::Prefixes {
            start,
            limit,
            descending,
        } => {
            let mut opts = ScanOptions::new();
            opts.descending = *descending;
            opts.limit = *limit;
            let records = db
                .scan(start.as_deref(), opts)
                .until_cancelled(ctx)
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to scan prefixes")?;
            report::print_records(&records, false, args.json)?;
        }

        Command::Errors { start, limit } => {
            let mut opts = ScanOptions::new().errors();
            opts.limit = *limit;
            let records = db
                .scan(start.as_deref(), opts)
                .until_cancelled(ctx)
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to scan errors")?;
            report::print_records(&records, true, args.json)?;
        }

        Command::Users => {
            report::print_list(&db.user_ids(), args.json)?;
        }

        Command::Metrics | Command::LockInfo => {}
    }
    Ok(())
}

fn scope(user: &Option<String>) -> Scope {
    match user {
        Some(id) => Scope::user(id.clone()),
        None => Scope::Global,
    }
}

fn setup_logging(verbose: bool) -> Result<()> {
    let filter = if verbose {
        EnvFilter::new("prefixdb=debug,warn")
    } else {
        EnvFilter::new("prefixdb=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    Ok(())
}

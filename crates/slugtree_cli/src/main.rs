//! Operator CLI for the slug store.
//!
//! # Responsibility
//! - Inspect and retry regeneration queue entries.
//! - Run the safety-net sweep and drain the queue on this process.
//! - Trigger whole-site rebuilds and list a site's slugs.

use clap::{Parser, Subcommand};
use log::info;
use slugtree_core::repo::slug_repo::SlugRepository;
use slugtree_core::{
    core_version, default_log_level, init_logging, DispatchOutcome, OperationContext,
    RebuildOutcome, RebuildRequest, RebuildTarget, SlugConfig, SlugEngine,
};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

const CHAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Slug store command line arguments.
#[derive(Parser, Debug)]
#[command(name = "slugtree")]
#[command(about = "Maintain hierarchical URL slugs", version)]
struct Cli {
    /// SQLite database file
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// Identifies this process in queue claim ownership
    #[arg(long, value_name = "ID", default_value = "slugtree-cli", global = true)]
    app_id: String,

    /// Absolute directory for rolling log files
    #[arg(long, value_name = "DIR", global = true)]
    log_dir: Option<PathBuf>,

    /// trace|debug|info|warn|error
    #[arg(long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the core version
    Version,
    /// List regeneration queue entries
    Status,
    /// Sweep stale claims and process queued entries until idle
    Dispatch,
    /// Requeue failed entries and process them
    Retry {
        #[arg(required_unless_present = "all")]
        entry_id: Option<i64>,
        /// Requeue every failed entry
        #[arg(long, conflicts_with = "entry_id")]
        all: bool,
    },
    /// List the slug assignments of one site
    Slugs {
        site_id: i64,
    },
    /// Rebuild every slug of one site
    RebuildSite {
        site_id: i64,
        /// Go through the queue instead of committing directly
        #[arg(long)]
        queued: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Some(log_dir) = &cli.log_dir {
        let level = cli.log_level.as_deref().unwrap_or(default_log_level());
        init_logging(level, log_dir)?;
    }

    if let Command::Version = cli.command {
        println!("slugtree_core version={}", core_version());
        return Ok(());
    }

    let db = cli.db.clone().ok_or("--db <PATH> is required")?;
    let config = SlugConfig::new(cli.app_id.as_str())?;
    let engine = SlugEngine::open(&db, config)?;
    info!(
        "event=cli_command module=cli status=start command={:?}",
        cli.command
    );

    match cli.command {
        Command::Version => {}
        Command::Status => print_status(&engine)?,
        Command::Dispatch => {
            let reset = engine.runner().sweep()?;
            println!("swept={reset}");
            print_outcomes(&engine.runner().drain_blocking()?);
        }
        Command::Retry { entry_id, .. } => {
            match entry_id {
                Some(entry_id) => engine.retry_entry(entry_id)?,
                None => println!("requeued={}", engine.retry_all_failed()?),
            }
            wait_for_chain(&engine);
            print_status(&engine)?;
        }
        Command::Slugs { site_id } => {
            let assignments = engine.slugs(|repo| Ok(repo.list_for_site(site_id)?))?;
            if assignments.is_empty() {
                println!("no slugs");
            }
            for assignment in assignments {
                println!(
                    "{}\t{}\t{}{}",
                    assignment.culture_code,
                    assignment.node_id,
                    assignment.slug,
                    if assignment.is_custom { "\tcustom" } else { "" }
                );
            }
        }
        Command::RebuildSite { site_id, queued } => {
            let target = RebuildTarget::Site(site_id);
            let request = if queued {
                RebuildRequest::queued(target)
            } else {
                RebuildRequest::immediate(target)
            };
            let mut ctx = OperationContext::new();
            match engine.rebuild_scope(&mut ctx, request)? {
                RebuildOutcome::Committed(report) => {
                    println!(
                        "committed written={} conflicts={} unresolved={}",
                        report.written,
                        report.conflicts.len(),
                        report.unresolved.len()
                    );
                }
                RebuildOutcome::Queued { entry_ids } => {
                    println!("queued entries={entry_ids:?}");
                    wait_for_chain(&engine);
                    print_status(&engine)?;
                }
                RebuildOutcome::NoChanges | RebuildOutcome::AlreadyHandled => {
                    println!("no changes");
                }
            }
        }
    }
    Ok(())
}

/// Keeps the process alive while the background chain runs.
fn wait_for_chain(engine: &SlugEngine) {
    while engine.runner().is_chain_active() {
        thread::sleep(CHAIN_POLL_INTERVAL);
    }
}

fn print_status(engine: &SlugEngine) -> Result<(), Box<dyn std::error::Error>> {
    let entries = engine.queue_entries()?;
    if entries.is_empty() {
        println!("queue empty");
    }
    for entry in entries {
        let state = if entry.running {
            "running"
        } else if entry.is_failed() {
            "failed"
        } else {
            "pending"
        };
        println!(
            "{}\t{state}\towner={}\terror={}",
            entry.entry_id,
            entry.owner_worker_id.as_deref().unwrap_or("-"),
            entry.error_text.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

fn print_outcomes(outcomes: &[DispatchOutcome]) {
    if outcomes.is_empty() {
        println!("nothing to dispatch");
    }
    for outcome in outcomes {
        match outcome {
            DispatchOutcome::Idle => {}
            DispatchOutcome::Completed { entry_id, report } => {
                println!("{entry_id}\tcompleted\twritten={}", report.written);
            }
            DispatchOutcome::Failed { entry_id, error } => {
                println!("{entry_id}\tfailed\t{error}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::Parser;

    #[test]
    fn parses_rebuild_site_with_global_flags() {
        let cli = Cli::try_parse_from([
            "slugtree",
            "rebuild-site",
            "3",
            "--queued",
            "--db",
            "/tmp/slugs.db",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::RebuildSite {
                site_id: 3,
                queued: true
            }
        ));
        assert_eq!(cli.app_id, "slugtree-cli");
    }

    #[test]
    fn retry_takes_an_entry_or_all() {
        let one = Cli::try_parse_from(["slugtree", "retry", "7"]).unwrap();
        assert!(matches!(
            one.command,
            Command::Retry {
                entry_id: Some(7),
                all: false
            }
        ));

        let all = Cli::try_parse_from(["slugtree", "retry", "--all"]).unwrap();
        assert!(matches!(
            all.command,
            Command::Retry {
                entry_id: None,
                all: true
            }
        ));

        assert!(Cli::try_parse_from(["slugtree", "retry"]).is_err());
        assert!(Cli::try_parse_from(["slugtree", "retry", "7", "--all"]).is_err());
    }
}

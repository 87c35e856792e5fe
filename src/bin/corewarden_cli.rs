//! `corewarden-cli` — thin command-line front end for the Plugin Auditor.
//!
//! A `clap` derive `Parser`/`Subcommand` tree that parses and dispatches to
//! one function per branch. The only external interface: `plugin audit
//! <target>`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use corewarden::plugin_audit;

/// corewarden - runtime safety core CLI
#[derive(Parser)]
#[command(name = "corewarden-cli")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plugin source-tree auditing
    Plugin {
        #[command(subcommand)]
        command: PluginCommands,
    },
}

#[derive(Subcommand)]
enum PluginCommands {
    /// Statically scan a candidate plugin directory for dangerous API
    /// patterns. Exit code is non-zero iff a critical finding is reported.
    Audit {
        /// Directory containing the candidate plugin's source.
        target: PathBuf,
    },
}

fn main() -> ExitCode {
    corewarden::telemetry::init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Plugin { command } => match command {
            PluginCommands::Audit { target } => run_plugin_audit(&target),
        },
    }
}

fn run_plugin_audit(target: &std::path::Path) -> ExitCode {
    let run_id = uuid::Uuid::new_v4();
    let _span = tracing::info_span!("plugin_audit", run_id = %run_id, target = %target.display()).entered();

    let report = match plugin_audit::audit(target) {
        Ok(report) => report,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    print!("{}", report.format_report());

    if report.has_critical() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

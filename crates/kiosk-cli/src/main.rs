use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use kiosk_ota::DEFAULT_REBOOT_DELAY_SECS;
use tracing_subscriber::EnvFilter;

mod dispatch;
mod render;
mod settings;

use dispatch::run_cli;
use render::{render_error_line, TerminalRenderer};

#[derive(Parser, Debug)]
#[command(name = "kiosk-ota")]
#[command(about = "Over-the-air updates for the kiosk working tree", long_about = None)]
struct Cli {
    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    json: bool,
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Working tree to manage; overrides `repo_root` from settings.
    #[arg(long, global = true)]
    repo: Option<PathBuf>,
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Status,
    Check,
    Update {
        /// Skip the enabled and clean-tree checks.
        #[arg(long)]
        force: bool,
    },
    BootUpdate,
    SwitchBranch {
        branch: String,
    },
    Branches,
    Backup {
        name: Option<String>,
    },
    Backups,
    Rollback {
        /// Backup to restore; the newest one when omitted.
        name: Option<String>,
    },
    Schedule {
        schedule: String,
    },
    TestConnection,
    Logs {
        #[arg(long, default_value_t = 100)]
        lines: usize,
    },
    CleanCache,
    Policy {
        #[command(subcommand)]
        command: PolicyCommands,
    },
    Restart,
    Reboot {
        #[arg(long, default_value_t = DEFAULT_REBOOT_DELAY_SECS)]
        delay: u64,
    },
    DiskUsage,
}

#[derive(Subcommand, Debug)]
enum PolicyCommands {
    Show,
    Set(PolicySetArgs),
}

#[derive(Args, Debug, Default, PartialEq, Eq)]
struct PolicySetArgs {
    #[arg(long)]
    enabled: Option<bool>,
    #[arg(long)]
    branch: Option<String>,
    #[arg(long)]
    check_on_boot: Option<bool>,
    #[arg(long)]
    auto_pull: Option<bool>,
    #[arg(long)]
    backup_before_update: Option<bool>,
    #[arg(long)]
    max_backups: Option<u32>,
    #[arg(long)]
    update_schedule: Option<String>,
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let renderer = TerminalRenderer::current();
    let json = cli.json;
    match run_cli(cli, renderer) {
        Ok(code) => code,
        Err(err) => {
            if json {
                println!("{}", dispatch::render_json_error(&err));
            } else {
                eprintln!("{}", render_error_line(renderer.style(), &err));
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests;

mod commands;
mod settings;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "stdcap")]
#[command(about = "Capture stdout and stderr of in-process work, native code included")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a block of output inside a capture and report what came back
    Probe {
        /// Number of lines to write. Defaults to the settings file value.
        #[arg(short, long)]
        lines: Option<usize>,
        /// Bytes per line, newline included. Defaults to the settings file value.
        #[arg(short, long)]
        width: Option<usize>,
        /// Rebind descriptors 1 and 2 instead of the managed handles
        #[arg(long, conflicts_with = "managed")]
        native: bool,
        /// Use the managed handles even if the settings file asks for native
        #[arg(long)]
        managed: bool,
    },
    /// Run captures under a lowered open-file limit and check for descriptor leaks
    FdCheck {
        /// Open-file limit to apply while checking (e.g. --limit 10)
        #[arg(short, long)]
        limit: Option<u64>,
        /// Number of captures to run. Defaults to one more than the limit.
        #[arg(short, long)]
        iterations: Option<usize>,
        /// Rebind descriptors 1 and 2 instead of the managed handles
        #[arg(long, conflicts_with = "managed")]
        native: bool,
        /// Use the managed handles even if the settings file asks for native
        #[arg(long)]
        managed: bool,
    },
    /// Run a command with inherited stdio and capture everything it prints.
    ///
    /// The command runs under descriptor-level capture, so anything it writes
    /// to stdout or stderr ends up in the capture.
    Exec {
        /// Write the captured bytes to this file instead of printing them
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// Command and arguments (after `--`)
        #[arg(trailing_var_arg = true, required = true, value_name = "COMMAND")]
        command: Vec<String>,
    },
    /// Show the settings in effect, or write a default settings file
    Config {
        /// Write default settings if no settings file exists yet
        #[arg(long)]
        init: bool,
        /// Settings file to use instead of the default location
        #[arg(long, value_name = "FILE")]
        path: Option<PathBuf>,
    },
}

/// Flags on the command line win over the settings file.
fn use_native(native: bool, managed: bool, configured: bool) -> bool {
    match (native, managed) {
        (true, _) => true,
        (_, true) => false,
        _ => configured,
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    let saved = settings::load_settings();

    match cli.command {
        Commands::Probe { lines, width, native, managed } => commands::cmd_probe(
            lines.unwrap_or(saved.lines),
            width.unwrap_or(saved.width),
            use_native(native, managed, saved.native),
        ),
        Commands::FdCheck { limit, iterations, native, managed } => {
            let limit = limit.unwrap_or(saved.nofile_limit);
            let iterations = iterations.unwrap_or_else(|| {
                settings::Settings {
                    nofile_limit: limit,
                    ..saved.clone()
                }
                .effective_iterations()
            });
            commands::cmd_fd_check(limit, iterations, use_native(native, managed, saved.native))
        }
        Commands::Exec { output, command } => commands::cmd_exec(&command, output.as_deref()),
        Commands::Config { init, path } => commands::cmd_config(init, path),
    }
}

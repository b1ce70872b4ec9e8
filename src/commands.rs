use anyhow::{Context, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::Instant;

use stdcap::{CapturedOutput, limits};

use crate::settings::{self, Settings};

/// Run `callback` under the managed or the descriptor-level capture.
fn run_capture<F, R>(native: bool, callback: F) -> stdcap::Result<(R, CapturedOutput)>
where
    F: FnOnce() -> R,
{
    if native {
        stdcap::capture_native_with(callback)
    } else {
        stdcap::capture_with(callback)
    }
}

fn mode_name(native: bool) -> &'static str {
    if native { "native" } else { "managed" }
}

/// Write `lines` lines of `width` bytes inside a capture and report the result.
pub fn cmd_probe(lines: usize, width: usize, native: bool) -> Result<()> {
    if width == 0 {
        anyhow::bail!("--width must be at least 1 (the newline)");
    }
    let mut line = vec![b'a'; width - 1];
    line.push(b'\n');

    let started = Instant::now();
    let (written, output) = run_capture(native, || -> std::io::Result<usize> {
        // Native mode goes through the real stdout so the descriptor swap is
        // what gets exercised.
        let mut written = 0;
        for _ in 0..lines {
            if native {
                std::io::stdout().write_all(&line)?;
            } else {
                stdcap::stdout().write_all(&line)?;
            }
            written += line.len();
        }
        Ok(written)
    })
    .context("Capture failed")?;
    let written = written.context("Writing inside the capture failed")?;

    println!(
        "{} capture: wrote {} bytes, captured {} bytes in {:.1?}",
        mode_name(native),
        written,
        output.len(),
        started.elapsed()
    );
    if output.len() != written {
        anyhow::bail!("Captured {} bytes but {} were written", output.len(), written);
    }
    Ok(())
}

/// Run no-op captures under a lowered open-file limit and check for leaks.
pub fn cmd_fd_check(limit: u64, iterations: usize, native: bool) -> Result<()> {
    let before = limits::open_descriptor_count().context("Failed to count open descriptors")?;

    let failures = limits::with_open_file_limit(limit, |limit| {
        let mut failures = Vec::new();
        for i in 0..iterations {
            match run_capture(native, || {}) {
                Ok(((), output)) if output.is_empty() => {}
                Ok(((), output)) => failures.push(format!(
                    "iteration {}: expected no output, got {:?}",
                    i, output
                )),
                Err(e) => failures.push(format!("iteration {} (limit {}): {}", i, limit, e)),
            }
        }
        failures
    })
    .context("Failed to change the open file limit")?;

    let after = limits::open_descriptor_count().context("Failed to count open descriptors")?;

    println!(
        "{} capture: {} iterations with open file limit {}",
        mode_name(native),
        iterations,
        limit
    );
    println!("  descriptors before: {}", before);
    println!("  descriptors after:  {}", after);

    for failure in &failures {
        eprintln!("  {}", failure);
    }
    if !failures.is_empty() {
        anyhow::bail!("{} of {} captures failed", failures.len(), iterations);
    }
    if after > before {
        anyhow::bail!("Leaked {} descriptor(s)", after - before);
    }
    println!("  no leaks");
    Ok(())
}

/// Run a command that inherits stdio under the descriptor-level capture.
pub fn cmd_exec(command: &[String], output_path: Option<&Path>) -> Result<()> {
    let (program, args) = command
        .split_first()
        .context("No command given")?;

    let (status, output) = stdcap::capture_native_with(|| -> std::io::Result<ExitStatus> {
        Command::new(program).args(args).status()
    })
    .context("Capture failed")?;
    let status = status.with_context(|| format!("Failed to run {}", program))?;

    match output_path {
        Some(path) => {
            std::fs::write(path, output.as_bytes())
                .with_context(|| format!("Failed to write captured output: {}", path.display()))?;
            println!("Captured {} bytes from {} into {}", output.len(), program, path.display());
        }
        None => {
            println!("Captured {} bytes from {}:", output.len(), program);
            for line in output.lines() {
                println!("  | {}", line);
            }
        }
    }

    if !status.success() {
        anyhow::bail!("{} exited with {}", program, status);
    }
    Ok(())
}

/// Show where settings live and what is in effect; optionally write defaults.
pub fn cmd_config(init: bool, path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(settings::settings_path);
    if init {
        if path.exists() {
            anyhow::bail!("Settings file already exists: {}", path.display());
        }
        settings::save_settings_to(&path, &Settings::default())?;
        println!("Wrote default settings to {}", path.display());
        return Ok(());
    }

    let current = settings::load_settings_from(&path);
    println!("# {}", path.display());
    print!(
        "{}",
        toml::to_string_pretty(&current).context("Failed to serialize settings")?
    );
    Ok(())
}

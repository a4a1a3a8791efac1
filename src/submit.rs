//! Script submission and local execution.

use crate::config::{Backend, Options};
use crate::utils::run_command;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread;

/// Check required external tools before any file is generated.
///
/// Submission backends need the scheduler's submit command on PATH, and any
/// multi-command job needs GNU parallel.
pub fn preflight(backend: Backend, chunk_size: usize) -> Result<()> {
    if let Some(cmd) = backend.submit_command() {
        which::which(cmd)
            .map_err(|_| anyhow::anyhow!("Required submission command not found on PATH: {}", cmd))?;
    }
    if chunk_size > 1 {
        which::which("parallel").map_err(|_| {
            anyhow::anyhow!(
                "GNU parallel is required for multi-command jobs but was not found on PATH"
            )
        })?;
    }
    Ok(())
}

/// Submit a script through the backend's submission command.
///
/// Returns the submission command's exit code; non-zero means the caller
/// must abort with that code. Dry-run skips the invocation entirely.
pub fn submit(script: &Path, backend: Backend, dry_run: bool, verbose: bool) -> Result<i32> {
    let cmd = backend
        .submit_command()
        .ok_or_else(|| anyhow::anyhow!("Backend has no submission command"))?;

    if dry_run {
        println!("Dry run: would submit {}", script.display());
        return Ok(0);
    }

    let script_arg = script.to_string_lossy();
    let result = run_command(&[cmd, &script_arg])
        .with_context(|| format!("Failed to submit script: {}", script.display()))?;

    if result.return_code != 0 {
        eprintln!(
            "Submission of {} failed: {}",
            script.display(),
            result.stderr.trim()
        );
    } else if verbose {
        print!("{}", result.stdout);
    }

    Ok(result.return_code)
}

/// Line tagged with its source stream, sent from a reader thread.
enum OutputLine {
    Line(String),
    Done,
}

/// Run a generated script locally, streaming combined output to the
/// console and appending it to `{logdir}/{job_name}.log`.
///
/// Returns the script's own exit status.
pub fn run_local(script: &Path, opts: &Options, dry_run: bool) -> Result<i32> {
    if dry_run {
        println!("Dry run: would execute {}", script.display());
        return Ok(0);
    }

    std::fs::create_dir_all(&opts.logdir)
        .with_context(|| format!("Failed to create log directory: {}", opts.logdir.display()))?;
    let log_path = opts.logdir.join(format!("{}.log", opts.job_name));
    let mut log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file: {}", log_path.display()))?;

    let mut child = Command::new(&opts.shell)
        .arg(script)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to execute script: {}", script.display()))?;

    let (tx, rx) = mpsc::channel();
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let mut readers = 0;
    if let Some(out) = stdout {
        spawn_reader(out, tx.clone());
        readers += 1;
    }
    if let Some(err) = stderr {
        spawn_reader(err, tx.clone());
        readers += 1;
    }
    drop(tx);

    let mut done = 0;
    while done < readers {
        match rx.recv() {
            Ok(OutputLine::Line(line)) => {
                println!("{}", line);
                writeln!(log, "{}", line)
                    .with_context(|| format!("Failed to append to {}", log_path.display()))?;
            }
            Ok(OutputLine::Done) => done += 1,
            Err(_) => break,
        }
    }

    let status = child
        .wait()
        .with_context(|| format!("Failed to wait on script: {}", script.display()))?;
    Ok(status.code().unwrap_or(-1))
}

fn spawn_reader<R: std::io::Read + Send + 'static>(reader: R, tx: Sender<OutputLine>) {
    thread::spawn(move || {
        let buf = BufReader::new(reader);
        for line in buf.lines() {
            match line {
                Ok(line) => {
                    if tx.send(OutputLine::Line(line)).is_err() {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = tx.send(OutputLine::Done);
    });
}

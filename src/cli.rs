//! CLI entry point: argument definitions, option resolution, and the
//! submission pipeline.

use crate::config::{env_parse, env_str, Backend, EnvMode, Options};
use crate::depend::{self, ResolvedDeps};
use crate::{emit, plan, render, submit};
use anyhow::{Context, Result};
use clap::Parser;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

/// qbatch - turn a list of shell commands into cluster jobs.
#[derive(Parser)]
#[command(name = "qbatch")]
#[command(version = "0.1.0")]
#[command(about = "Submit a list of commands to a PBS/SGE cluster or run them locally")]
pub struct Cli {
    /// File of commands, one per line ("-" reads standard input)
    pub command_file: String,

    /// Number of commands grouped into each job
    #[arg(short = 'c', long)]
    pub chunksize: Option<usize>,

    /// Commands run in parallel per job, absolute or percentage (e.g. 50%)
    #[arg(short = 'j', long)]
    pub cores: Option<String>,

    /// Processors requested per job from the scheduler
    #[arg(long)]
    pub ppj: Option<usize>,

    /// Job name (default: derived from the command file name)
    #[arg(short = 'N', long)]
    pub jobname: Option<String>,

    /// Maximum walltime, e.g. 3:00:00
    #[arg(short = 'w', long)]
    pub walltime: Option<String>,

    /// Memory to request, e.g. 8G ("0" requests nothing)
    #[arg(long)]
    pub mem: Option<String>,

    /// Comma-separated resource variable names the memory amount applies to
    #[arg(long)]
    pub memvars: Option<String>,

    /// Queue to submit to
    #[arg(short = 'q', long)]
    pub queue: Option<String>,

    /// Hold until jobs matching this glob pattern finish (repeatable)
    #[arg(short = 'd', long = "depend")]
    pub depend: Vec<String>,

    /// Environment propagation mode
    #[arg(long = "env", value_enum, default_value = "batch")]
    pub env_mode: EnvMode,

    /// Line inserted verbatim after the header directives (repeatable)
    #[arg(long)]
    pub header: Vec<String>,

    /// Line appended verbatim at the end of each script (repeatable)
    #[arg(long)]
    pub footer: Vec<String>,

    /// Extra scheduler option line, re-prefixed per backend (repeatable)
    #[arg(short = 'o', long, allow_hyphen_values = true)]
    pub options: Vec<String>,

    /// Nodes requested per job
    #[arg(long)]
    pub nodes: Option<usize>,

    /// SGE parallel environment name
    #[arg(long = "sge-pe")]
    pub sge_pe: Option<String>,

    /// Backend to generate scripts for (default: auto-detect)
    #[arg(short = 'b', long = "system", value_enum)]
    pub system: Option<Backend>,

    /// Directory generated scripts are written to
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Directory for execution logs (default: {workdir}/logs)
    #[arg(long)]
    pub logdir: Option<PathBuf>,

    /// Shell used for generated scripts
    #[arg(long)]
    pub shell: Option<String>,

    /// Generate scripts but do not submit or run anything
    #[arg(short = 'n', long)]
    pub dryrun: bool,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Resolve final job options from flags and `QBATCH_*` defaults.
///
/// Runs once at startup; nothing downstream reads the process environment.
pub fn resolve_options(cli: &Cli, env: &HashMap<String, String>) -> Options {
    let chunk_size = cli
        .chunksize
        .or_else(|| env_parse(env, "QBATCH_CHUNKSIZE"))
        .unwrap_or(1)
        .max(1);
    let cores = cli
        .cores
        .clone()
        .or_else(|| env_str(env, "QBATCH_CORES"))
        .unwrap_or_else(|| chunk_size.to_string());
    let workdir = cli
        .workdir
        .clone()
        .or_else(|| env_str(env, "QBATCH_SCRIPT_FOLDER").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(".qbatch"));
    let logdir = cli.logdir.clone().unwrap_or_else(|| workdir.join("logs"));

    let mut options = cli.options.clone();
    if options.is_empty() {
        if let Some(extra) = env_str(env, "QBATCH_OPTIONS") {
            options.push(extra);
        }
    }

    Options {
        job_name: job_name(cli),
        chunk_size,
        cores,
        ppj: cli.ppj.or_else(|| env_parse(env, "QBATCH_PPJ")).unwrap_or(1),
        nodes: cli
            .nodes
            .or_else(|| env_parse(env, "QBATCH_NODES"))
            .unwrap_or(1),
        sge_pe: cli
            .sge_pe
            .clone()
            .or_else(|| env_str(env, "QBATCH_SGE_PE"))
            .unwrap_or_else(|| "smp".to_string()),
        walltime: cli.walltime.clone(),
        mem: cli.mem.clone().or_else(|| env_str(env, "QBATCH_MEM")),
        memvars: cli
            .memvars
            .clone()
            .or_else(|| env_str(env, "QBATCH_MEMVARS"))
            .unwrap_or_else(|| "mem".to_string()),
        queue: cli.queue.clone().or_else(|| env_str(env, "QBATCH_QUEUE")),
        depend: cli.depend.clone(),
        env_mode: cli.env_mode,
        header: cli.header.clone(),
        footer: cli.footer.clone(),
        options,
        workdir,
        logdir,
        shell: cli
            .shell
            .clone()
            .or_else(|| env_str(env, "QBATCH_SHELL"))
            .unwrap_or_else(|| "/bin/sh".to_string()),
    }
}

fn job_name(cli: &Cli) -> String {
    if let Some(name) = &cli.jobname {
        return name.clone();
    }
    if cli.command_file == "-" {
        return "STDIN".to_string();
    }
    Path::new(&cli.command_file)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "STDIN".to_string())
}

/// Read the task list: one command per non-blank line.
pub fn read_tasks(command_file: &str) -> Result<Vec<String>> {
    let content = if command_file == "-" {
        let mut lines = Vec::new();
        for line in std::io::stdin().lock().lines() {
            lines.push(line.context("Failed to read standard input")?);
        }
        lines.join("\n")
    } else {
        std::fs::read_to_string(command_file)
            .with_context(|| format!("Failed to read command file: {}", command_file))?
    };

    Ok(content
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .map(String::from)
        .collect())
}

/// Run the whole pipeline: read, plan, render, emit, submit.
///
/// Returns the process exit code.
pub fn handle_run(cli: &Cli) -> Result<i32> {
    let env: HashMap<String, String> = std::env::vars().collect();
    let backend = cli.system.unwrap_or_else(|| Backend::detect(&env));
    let opts = resolve_options(cli, &env);

    let tasks = read_tasks(&cli.command_file)?;
    if tasks.is_empty() {
        println!("No commands found in input; nothing to do.");
        return Ok(0);
    }

    let job_plan = plan::plan(tasks.len(), opts.chunk_size, backend);
    submit::preflight(backend, job_plan.chunk_size)?;

    let deps = if backend == Backend::Pbs {
        depend::resolve(&opts.depend)?
    } else {
        ResolvedDeps::default()
    };

    let threads = plan::threads_per_command(opts.ppj, &opts.cores)?;
    let header = render::render(backend, &opts, &job_plan, &deps, threads, &env);
    let scripts = emit::emit(&header, &job_plan, &tasks, &opts)?;

    if cli.verbose {
        println!(
            "Generated {} script(s) for {} task(s) in {}",
            scripts.len(),
            job_plan.total_tasks,
            opts.workdir.display()
        );
    }

    match backend {
        Backend::Local => submit::run_local(&scripts[0], &opts, cli.dryrun),
        Backend::Pbs | Backend::Sge => {
            for script in &scripts {
                let code = submit::submit(script, backend, cli.dryrun, cli.verbose)?;
                if code != 0 {
                    return Ok(code);
                }
            }
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["qbatch"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["commands.txt"]);
        let opts = resolve_options(&cli, &HashMap::new());
        assert_eq!(opts.chunk_size, 1);
        assert_eq!(opts.cores, "1");
        assert_eq!(opts.ppj, 1);
        assert_eq!(opts.memvars, "mem");
        assert_eq!(opts.workdir, PathBuf::from(".qbatch"));
        assert_eq!(opts.logdir, PathBuf::from(".qbatch/logs"));
        assert_eq!(opts.shell, "/bin/sh");
        assert_eq!(opts.job_name, "commands.txt");
        assert_eq!(opts.env_mode, EnvMode::Batch);
    }

    #[test]
    fn test_cores_defaults_to_chunksize() {
        let cli = parse(&["-c", "8", "commands.txt"]);
        let opts = resolve_options(&cli, &HashMap::new());
        assert_eq!(opts.chunk_size, 8);
        assert_eq!(opts.cores, "8");
    }

    #[test]
    fn test_env_defaults_apply_when_flags_absent() {
        let cli = parse(&["commands.txt"]);
        let env = env_of(&[
            ("QBATCH_CHUNKSIZE", "4"),
            ("QBATCH_PPJ", "12"),
            ("QBATCH_MEM", "16G"),
            ("QBATCH_QUEUE", "long"),
            ("QBATCH_SHELL", "/bin/bash"),
        ]);
        let opts = resolve_options(&cli, &env);
        assert_eq!(opts.chunk_size, 4);
        assert_eq!(opts.ppj, 12);
        assert_eq!(opts.mem.as_deref(), Some("16G"));
        assert_eq!(opts.queue.as_deref(), Some("long"));
        assert_eq!(opts.shell, "/bin/bash");
    }

    #[test]
    fn test_flags_win_over_env_defaults() {
        let cli = parse(&["-c", "2", "--mem", "4G", "commands.txt"]);
        let env = env_of(&[("QBATCH_CHUNKSIZE", "64"), ("QBATCH_MEM", "16G")]);
        let opts = resolve_options(&cli, &env);
        assert_eq!(opts.chunk_size, 2);
        assert_eq!(opts.mem.as_deref(), Some("4G"));
    }

    #[test]
    fn test_options_flag_long_and_short() {
        let cli = parse(&[
            "-o",
            "-A account1",
            "--options",
            "-M me@site",
            "commands.txt",
        ]);
        let opts = resolve_options(&cli, &HashMap::new());
        assert_eq!(opts.options, vec!["-A account1", "-M me@site"]);
    }

    #[test]
    fn test_stdin_job_name() {
        let cli = parse(&["-"]);
        assert_eq!(resolve_options(&cli, &HashMap::new()).job_name, "STDIN");
    }

    #[test]
    fn test_jobname_flag_wins() {
        let cli = parse(&["-N", "align", "commands.txt"]);
        assert_eq!(resolve_options(&cli, &HashMap::new()).job_name, "align");
    }

    #[test]
    fn test_read_tasks_skips_blank_lines() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "echo one\n\n  \necho two").unwrap();
        let tasks = read_tasks(file.path().to_str().unwrap()).unwrap();
        assert_eq!(tasks, vec!["echo one", "echo two"]);
    }

    #[test]
    fn test_read_tasks_missing_file_is_error() {
        assert!(read_tasks("/nonexistent/commands.txt").is_err());
    }
}

//! Backend selection and resolved job options.

use clap::ValueEnum;
use std::collections::HashMap;
use std::path::PathBuf;

/// Target execution backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    Pbs,
    Sge,
    Local,
}

impl Backend {
    /// Pick a backend from ambient environment markers.
    ///
    /// `QBATCH_SYSTEM` wins if set to a recognized name; otherwise the
    /// scheduler root variables decide, falling back to local execution.
    /// This is the only place ambient state influences backend choice.
    pub fn detect(env: &HashMap<String, String>) -> Backend {
        if let Some(name) = env.get("QBATCH_SYSTEM") {
            if let Ok(backend) = Backend::from_str(name, true) {
                return backend;
            }
        }
        if env.contains_key("SGE_ROOT") {
            Backend::Sge
        } else if env.contains_key("PBS_DEFAULT") || env.contains_key("PBS_O_PATH") {
            Backend::Pbs
        } else {
            Backend::Local
        }
    }

    /// Submission command for scheduler backends.
    pub fn submit_command(&self) -> Option<&'static str> {
        match self {
            Backend::Pbs | Backend::Sge => Some("qsub"),
            Backend::Local => None,
        }
    }
}

/// Environment propagation mode for generated scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EnvMode {
    /// Use the scheduler's native export flag (`-V`)
    Batch,
    /// Snapshot the submission environment into export lines
    Copied,
    /// Propagate nothing
    None,
}

/// Fully resolved job options, immutable once built.
///
/// Command-line flags win over `QBATCH_*` environment defaults, which win
/// over the built-in defaults. Resolution happens once at startup in
/// `cli::resolve_options`; everything downstream reads this record only.
#[derive(Debug, Clone)]
pub struct Options {
    pub job_name: String,
    pub chunk_size: usize,
    /// Commands run in parallel per job; absolute count or percentage string
    pub cores: String,
    /// Processors requested per job from the scheduler
    pub ppj: usize,
    pub nodes: usize,
    /// SGE parallel environment name
    pub sge_pe: String,
    pub walltime: Option<String>,
    pub mem: Option<String>,
    /// Comma-separated resource variable names the memory amount applies to
    pub memvars: String,
    pub queue: Option<String>,
    pub depend: Vec<String>,
    pub env_mode: EnvMode,
    pub header: Vec<String>,
    pub footer: Vec<String>,
    pub options: Vec<String>,
    /// Directory generated scripts are written to
    pub workdir: PathBuf,
    pub logdir: PathBuf,
    pub shell: String,
}

/// Look up a non-empty environment value.
pub fn env_str(env: &HashMap<String, String>, key: &str) -> Option<String> {
    env.get(key).filter(|v| !v.trim().is_empty()).cloned()
}

/// Look up and parse an environment value, ignoring unparsable ones.
pub fn env_parse<T: std::str::FromStr>(env: &HashMap<String, String>, key: &str) -> Option<T> {
    env_str(env, key).and_then(|v| v.trim().parse().ok())
}

//! Header rendering for the three backends.
//!
//! Each backend has one fixed template. All conditional text is computed
//! into plain strings up front; an empty string suppresses the directive
//! line entirely, so the templates themselves contain no branching.

use crate::config::{Backend, EnvMode, Options};
use crate::depend::ResolvedDeps;
use crate::plan::JobPlan;
use glob::Pattern;
use std::collections::HashMap;

/// Environment variables never copied into a generated script: the
/// working-directory variable, the schedulers' own task-index variables
/// (a stale copy would clobber the live index), and exported shell
/// functions.
const ENV_IGNORE: &[&str] = &["PWD", "PBS_ARRAYID", "SGE_TASK_ID", "BASH_FUNC_*"];

/// Render the script header for a backend.
///
/// Pure: the submission environment is an explicit snapshot, never read
/// from the process.
pub fn render(
    backend: Backend,
    opts: &Options,
    plan: &JobPlan,
    deps: &ResolvedDeps,
    threads: usize,
    env: &HashMap<String, String>,
) -> String {
    match backend {
        Backend::Pbs => render_pbs(opts, plan, deps, threads, env),
        Backend::Sge => render_sge(opts, plan, threads, env),
        Backend::Local => render_local(opts, threads, env),
    }
}

fn render_pbs(
    opts: &Options,
    plan: &JobPlan,
    deps: &ResolvedDeps,
    threads: usize,
    env: &HashMap<String, String>,
) -> String {
    let array = if plan.use_array {
        format!("#PBS -t 1-{}\n", plan.num_jobs)
    } else {
        String::new()
    };
    let walltime = match &opts.walltime {
        Some(w) => format!("#PBS -l walltime={}\n", w),
        None => String::new(),
    };
    let memory = match memory_clause(opts) {
        Some(m) => format!("#PBS -l {}\n", m),
        None => String::new(),
    };
    let queue = match &opts.queue {
        Some(q) => format!("#PBS -q {}\n", q),
        None => String::new(),
    };
    let depend = pbs_depend_clause(deps)
        .map(|c| format!("#PBS -W depend={}\n", c))
        .unwrap_or_default();
    let env_flag = if opts.env_mode == EnvMode::Batch {
        "#PBS -V\n".to_string()
    } else {
        String::new()
    };
    let options = directive_lines("#PBS", &opts.options);
    let env_block = copied_env_block(opts, env);
    let header = verbatim_lines(&opts.header);
    let array_ind = if plan.use_array {
        "ARRAY_IND=$PBS_ARRAYID\n"
    } else {
        ""
    };

    format!(
        "#!/bin/sh\n\
         #PBS -S {shell}\n\
         #PBS -l nodes={nodes}:ppn={ppj}\n\
         #PBS -j oe\n\
         #PBS -o {logdir}\n\
         #PBS -N {name}\n\
         {array}{walltime}{memory}{queue}{depend}{env_flag}{options}\
         {env_block}{header}\
         cd \"$PBS_O_WORKDIR\"\n\
         {array_ind}\
         export QBATCH_THREADS_PER_COMMAND={threads}\n",
        shell = opts.shell,
        nodes = opts.nodes,
        ppj = opts.ppj,
        logdir = opts.logdir.display(),
        name = opts.job_name,
        array = array,
        walltime = walltime,
        memory = memory,
        queue = queue,
        depend = depend,
        env_flag = env_flag,
        options = options,
        env_block = env_block,
        header = header,
        array_ind = array_ind,
        threads = threads,
    )
}

fn render_sge(
    opts: &Options,
    plan: &JobPlan,
    threads: usize,
    env: &HashMap<String, String>,
) -> String {
    let array = if plan.use_array {
        format!("#$ -t 1-{}\n", plan.num_jobs)
    } else {
        String::new()
    };
    let walltime = match &opts.walltime {
        Some(w) => format!("#$ -l h_rt={}\n", w),
        None => String::new(),
    };
    let memory = match memory_clause(opts) {
        Some(m) => format!("#$ -l {}\n", m),
        None => String::new(),
    };
    let queue = match &opts.queue {
        Some(q) => format!("#$ -q {}\n", q),
        None => String::new(),
    };
    // SGE holds directly on the user's name/ID patterns, no resolution step
    let depend = if opts.depend.is_empty() {
        String::new()
    } else {
        format!("#$ -hold_jid {}\n", opts.depend.join(","))
    };
    let env_flag = if opts.env_mode == EnvMode::Batch {
        "#$ -V\n".to_string()
    } else {
        String::new()
    };
    let options = directive_lines("#$", &opts.options);
    let env_block = copied_env_block(opts, env);
    let header = verbatim_lines(&opts.header);
    let array_ind = if plan.use_array {
        "ARRAY_IND=$SGE_TASK_ID\n"
    } else {
        ""
    };

    format!(
        "#!{shell}\n\
         #$ -S {shell}\n\
         #$ -j y\n\
         #$ -o {logdir}\n\
         #$ -cwd\n\
         #$ -N {name}\n\
         #$ -pe {pe} {ppj}\n\
         {array}{walltime}{memory}{queue}{depend}{env_flag}{options}\
         {env_block}{header}\
         {array_ind}\
         export QBATCH_THREADS_PER_COMMAND={threads}\n",
        shell = opts.shell,
        logdir = opts.logdir.display(),
        name = opts.job_name,
        pe = opts.sge_pe,
        ppj = opts.ppj,
        array = array,
        walltime = walltime,
        memory = memory,
        queue = queue,
        depend = depend,
        env_flag = env_flag,
        options = options,
        env_block = env_block,
        header = header,
        array_ind = array_ind,
        threads = threads,
    )
}

fn render_local(opts: &Options, threads: usize, env: &HashMap<String, String>) -> String {
    format!(
        "#!{shell}\n\
         {env_block}{header}\
         export QBATCH_THREADS_PER_COMMAND={threads}\n",
        shell = opts.shell,
        env_block = copied_env_block(opts, env),
        header = verbatim_lines(&opts.header),
        threads = threads,
    )
}

/// `var=mem` for every configured memory variable name, comma-joined.
/// Absent when memory is unset or "0".
fn memory_clause(opts: &Options) -> Option<String> {
    let mem = opts.mem.as_deref()?.trim();
    if mem.is_empty() || mem == "0" {
        return None;
    }
    let clause = opts
        .memvars
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|var| format!("{}={}", var, mem))
        .collect::<Vec<_>>()
        .join(",");
    if clause.is_empty() {
        None
    } else {
        Some(clause)
    }
}

/// Joined PBS dependency clause: `afterokarray:` for array IDs,
/// `afterok:` for regular IDs, groups comma-joined.
fn pbs_depend_clause(deps: &ResolvedDeps) -> Option<String> {
    if deps.is_empty() {
        return None;
    }
    let mut groups = Vec::new();
    if !deps.array_ids.is_empty() {
        groups.push(format!("afterokarray:{}", deps.array_ids.join(":")));
    }
    if !deps.regular_ids.is_empty() {
        groups.push(format!("afterok:{}", deps.regular_ids.join(":")));
    }
    Some(groups.join(","))
}

/// One directive line per custom option, re-prefixed with the backend
/// marker.
fn directive_lines(prefix: &str, options: &[String]) -> String {
    options
        .iter()
        .map(|opt| format!("{} {}\n", prefix, opt))
        .collect()
}

fn verbatim_lines(lines: &[String]) -> String {
    lines.iter().map(|l| format!("{}\n", l)).collect()
}

/// Export lines snapshotting the submission environment (copied mode).
///
/// Values have interior double quotes backslash-escaped and literal `$`
/// doubled. Keys are sorted for deterministic output.
fn copied_env_block(opts: &Options, env: &HashMap<String, String>) -> String {
    if opts.env_mode != EnvMode::Copied {
        return String::new();
    }

    let ignore: Vec<Pattern> = ENV_IGNORE
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect();

    let mut keys: Vec<&String> = env
        .keys()
        .filter(|k| !ignore.iter().any(|p| p.matches(k)))
        .collect();
    keys.sort();

    keys.iter()
        .map(|k| {
            let value = env[*k].replace('"', "\\\"").replace('$', "$$");
            format!("export {}=\"{}\"\n", k, value)
        })
        .collect()
}

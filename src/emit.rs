//! Script emission: header + command slices into executable files.

use crate::config::Options;
use crate::plan::JobPlan;
use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

const HEREDOC_MARKER: &str = "EOF";

/// Shell guard ensuring GNU parallel exists before any command runs.
const PARALLEL_GUARD: &str = "command -v parallel > /dev/null 2>&1 || \
    { echo \"error: GNU parallel not found on PATH\" 1>&2; exit 1; }\n";

/// Write the generated script file(s) and return their paths.
///
/// Array mode produces a single `{name}.array` script whose body slices
/// the embedded command block by the scheduler-set array index. Non-array
/// mode produces one `{name}.{i}` script per job chunk.
pub fn emit(
    header: &str,
    plan: &JobPlan,
    tasks: &[String],
    opts: &Options,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(&opts.workdir)
        .with_context(|| format!("Failed to create script directory: {}", opts.workdir.display()))?;
    // Headers point scheduler output at the log directory; it must exist
    // before the job runs, not just for local execution.
    fs::create_dir_all(&opts.logdir)
        .with_context(|| format!("Failed to create log directory: {}", opts.logdir.display()))?;

    let mut paths = Vec::new();

    if plan.use_array {
        let path = opts.workdir.join(format!("{}.array", opts.job_name));
        let body = array_body(plan, tasks, opts);
        write_script(&path, header, &body, opts)?;
        paths.push(path);
    } else {
        for (index, slice) in tasks.chunks(plan.chunk_size).enumerate() {
            let path = opts.workdir.join(format!("{}.{}", opts.job_name, index));
            let body = chunk_body(slice, opts);
            write_script(&path, header, &body, opts)?;
            paths.push(path);
        }
    }

    Ok(paths)
}

/// Body for an array script: pick this task's slice of the command block
/// and pipe it into parallel.
fn array_body(plan: &JobPlan, tasks: &[String], opts: &Options) -> String {
    let mut body = String::from(PARALLEL_GUARD);
    body.push_str(&format!(
        "sed -n \"$(( ($ARRAY_IND - 1) * {chunk} + 1 )),+{rest}p\" << '{eof}' | \
         parallel -j{cores} --tag --line-buffer\n",
        chunk = plan.chunk_size,
        rest = plan.chunk_size.saturating_sub(1),
        eof = HEREDOC_MARKER,
        cores = opts.cores,
    ));
    for task in tasks {
        body.push_str(task);
        body.push('\n');
    }
    body.push_str(HEREDOC_MARKER);
    body.push('\n');
    body
}

/// Body for a standalone job chunk. A single command runs bare; anything
/// larger goes through parallel.
fn chunk_body(slice: &[String], opts: &Options) -> String {
    if let [only] = slice {
        return format!("{}\n", only);
    }

    let mut body = String::from(PARALLEL_GUARD);
    body.push_str(&format!(
        "parallel -j{cores} --tag --line-buffer << '{eof}'\n",
        cores = opts.cores,
        eof = HEREDOC_MARKER,
    ));
    for task in slice {
        body.push_str(task);
        body.push('\n');
    }
    body.push_str(HEREDOC_MARKER);
    body.push('\n');
    body
}

fn write_script(path: &PathBuf, header: &str, body: &str, opts: &Options) -> Result<()> {
    let mut content = String::with_capacity(header.len() + body.len());
    content.push_str(header);
    content.push_str(body);
    for line in &opts.footer {
        content.push_str(line);
        content.push('\n');
    }

    fs::write(path, content)
        .with_context(|| format!("Failed to write script: {}", path.display()))?;
    mark_executable(path)?;
    Ok(())
}

#[cfg(unix)]
fn mark_executable(path: &PathBuf) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .with_context(|| format!("Failed to mark executable: {}", path.display()))
}

#[cfg(not(unix))]
fn mark_executable(_path: &PathBuf) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvMode;
    use tempfile::TempDir;

    fn options(dir: &TempDir, chunk_size: usize, cores: &str) -> Options {
        Options {
            job_name: "job".to_string(),
            chunk_size,
            cores: cores.to_string(),
            ppj: 1,
            nodes: 1,
            sge_pe: "smp".to_string(),
            walltime: None,
            mem: None,
            memvars: "mem".to_string(),
            queue: None,
            depend: Vec::new(),
            env_mode: EnvMode::Batch,
            header: Vec::new(),
            footer: Vec::new(),
            options: Vec::new(),
            workdir: dir.path().join("scripts"),
            logdir: dir.path().join("logs"),
            shell: "/bin/sh".to_string(),
        }
    }

    fn tasks(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("echo task{}", i)).collect()
    }

    #[test]
    fn test_array_mode_emits_single_script() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir, 3, "3");
        let plan = JobPlan {
            total_tasks: 10,
            chunk_size: 3,
            num_jobs: 4,
            use_array: true,
        };
        let paths = emit("#!/bin/sh\n", &plan, &tasks(10), &opts).unwrap();
        assert_eq!(paths.len(), 1);
        assert!(paths[0].ends_with("job.array"));

        let content = fs::read_to_string(&paths[0]).unwrap();
        assert!(content.contains("($ARRAY_IND - 1) * 3 + 1"));
        assert!(content.contains("parallel -j3 --tag --line-buffer"));
        assert!(content.contains("command -v parallel"));
        for i in 1..=10 {
            assert!(content.contains(&format!("echo task{}", i)));
        }
    }

    #[test]
    fn test_non_array_emits_one_script_per_chunk() {
        let dir = TempDir::new().unwrap();
        let opts = options(&dir, 2, "2");
        let plan = JobPlan {
            total_tasks: 5,
            chunk_size: 2,
            num_jobs: 3,
            use_array: false,
        };
        let paths = emit("#!/bin/sh\n", &plan, &tasks(5), &opts).unwrap();
        assert_eq!(paths.len(), 3);
        assert!(paths[0].ends_with("job.0"));
        assert!(paths[2].ends_with("job.2"));

        // Last chunk holds a single command and runs it bare
        let last = fs::read_to_string(&paths[2]).unwrap();
        assert!(!last.contains("parallel"));
        assert!(last.contains("echo task5\n"));

        let first = fs::read_to_string(&paths[0]).unwrap();
        assert!(first.contains("parallel -j2"));
    }

    #[test]
    fn test_log_directory_created_at_emission() {
        // Scheduler backends never go through run_local, so the logdir the
        // header's -o directive points at has to exist once emission is done
        let dir = TempDir::new().unwrap();
        let opts = options(&dir, 3, "3");
        let plan = JobPlan {
            total_tasks: 10,
            chunk_size: 3,
            num_jobs: 4,
            use_array: true,
        };
        let header = format!("#!/bin/sh\n#PBS -o {}\n", opts.logdir.display());
        emit(&header, &plan, &tasks(10), &opts).unwrap();
        assert!(opts.logdir.is_dir());
    }

    #[test]
    fn test_footer_lands_at_end() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(&dir, 1, "1");
        opts.footer = vec!["echo done".to_string()];
        let plan = JobPlan {
            total_tasks: 1,
            chunk_size: 1,
            num_jobs: 1,
            use_array: false,
        };
        let paths = emit("#!/bin/sh\n", &plan, &tasks(1), &opts).unwrap();
        let content = fs::read_to_string(&paths[0]).unwrap();
        assert!(content.ends_with("echo done\n"));
    }

    #[cfg(unix)]
    #[test]
    fn test_scripts_are_executable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let opts = options(&dir, 1, "1");
        let plan = JobPlan {
            total_tasks: 1,
            chunk_size: 1,
            num_jobs: 1,
            use_array: false,
        };
        let paths = emit("#!/bin/sh\n", &plan, &tasks(1), &opts).unwrap();
        let mode = fs::metadata(&paths[0]).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }

    #[test]
    fn test_local_end_to_end_five_commands_chunk_two() {
        // Local execution: all five commands in one script, no array slicing
        let dir = TempDir::new().unwrap();
        let opts = options(&dir, 5, "2");
        let plan = crate::plan::plan(5, 5, crate::config::Backend::Local);
        let paths = emit("#!/bin/sh\n", &plan, &tasks(5), &opts).unwrap();
        assert_eq!(paths.len(), 1);
        let content = fs::read_to_string(&paths[0]).unwrap();
        assert!(!content.contains("ARRAY_IND"));
        assert!(content.contains("parallel -j2"));
        for i in 1..=5 {
            assert!(content.contains(&format!("echo task{}", i)));
        }
    }
}

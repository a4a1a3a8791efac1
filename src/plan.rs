//! Job-count planning: how many jobs/array tasks a command list becomes.

use crate::config::Backend;
use anyhow::{Context, Result};

/// How a task list is split into scheduler jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPlan {
    pub total_tasks: usize,
    pub chunk_size: usize,
    pub num_jobs: usize,
    pub use_array: bool,
}

/// Compute the job plan for a task list.
///
/// Local execution always collapses to a single script holding every task.
/// A task list that fits in one chunk is submitted as a plain job; anything
/// larger becomes an array job with `ceil(total / chunk)` tasks.
pub fn plan(total_tasks: usize, chunk_size: usize, backend: Backend) -> JobPlan {
    if backend == Backend::Local {
        return JobPlan {
            total_tasks,
            chunk_size: total_tasks.max(1),
            num_jobs: 1,
            use_array: false,
        };
    }

    if total_tasks <= chunk_size {
        return JobPlan {
            total_tasks,
            chunk_size,
            num_jobs: 1,
            use_array: false,
        };
    }

    JobPlan {
        total_tasks,
        chunk_size,
        num_jobs: total_tasks.div_ceil(chunk_size),
        use_array: true,
    }
}

/// Threads each launched command may use without oversubscribing the job.
///
/// `cores` is either an absolute count (`"2"`) or a percentage of the
/// processors requested per job (`"50%"`). A ppj of zero is treated as 1,
/// and the result never drops below 1.
pub fn threads_per_command(ppj: usize, cores: &str) -> Result<usize> {
    let ppj = if ppj == 0 { 1 } else { ppj };

    let threads = if let Some(percent) = cores.strip_suffix('%') {
        let percent: usize = percent
            .trim()
            .parse()
            .with_context(|| format!("Invalid cores percentage: {}", cores))?;
        ppj * percent / 100
    } else {
        let cores: usize = cores
            .trim()
            .parse()
            .with_context(|| format!("Invalid cores value: {}", cores))?;
        if cores == 0 {
            anyhow::bail!("cores must be greater than zero");
        }
        ppj / cores
    };

    Ok(threads.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceiling_division_invariants() {
        for total in 1..50usize {
            for chunk in 1..10usize {
                let p = plan(total, chunk, Backend::Pbs);
                assert!(p.num_jobs * chunk >= total);
                assert!((p.num_jobs - 1) * chunk < total);
            }
        }
    }

    #[test]
    fn test_single_chunk_disables_array() {
        let p = plan(3, 8, Backend::Sge);
        assert_eq!(p.num_jobs, 1);
        assert!(!p.use_array);
    }

    #[test]
    fn test_exact_multiple() {
        let p = plan(10, 5, Backend::Pbs);
        assert_eq!(p.num_jobs, 2);
        assert!(p.use_array);
    }

    #[test]
    fn test_local_forces_single_job() {
        let p = plan(100, 2, Backend::Local);
        assert_eq!(p.num_jobs, 1);
        assert!(!p.use_array);
        assert_eq!(p.chunk_size, 100);
    }

    #[test]
    fn test_sge_scenario_ten_by_three() {
        let p = plan(10, 3, Backend::Sge);
        assert_eq!(p.num_jobs, 4);
        assert!(p.use_array);
    }

    #[test]
    fn test_threads_per_command_absolute() {
        assert_eq!(threads_per_command(4, "2").unwrap(), 2);
    }

    #[test]
    fn test_threads_per_command_percentage() {
        assert_eq!(threads_per_command(4, "50%").unwrap(), 2);
    }

    #[test]
    fn test_threads_per_command_zero_ppj() {
        assert_eq!(threads_per_command(0, "1").unwrap(), 1);
    }

    #[test]
    fn test_threads_per_command_floors_at_one() {
        assert_eq!(threads_per_command(2, "8").unwrap(), 1);
    }

    #[test]
    fn test_threads_per_command_rejects_garbage() {
        assert!(threads_per_command(4, "lots").is_err());
        assert!(threads_per_command(4, "0").is_err());
    }
}

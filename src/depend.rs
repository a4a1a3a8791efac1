//! Dependency resolution against the live PBS queue.
//!
//! User-supplied glob patterns are matched against the name and identifier
//! of every unfinished job reported by `qstat -x`, and matches are split
//! into array jobs and regular jobs so the caller can build a `depend=`
//! clause with the right `afterokarray`/`afterok` keywords.

use crate::utils::run_command;
use anyhow::{Context, Result};
use glob::Pattern;
use regex::Regex;
use thiserror::Error;

/// Failure talking to the scheduler's job listing.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("scheduler query `{command}` failed: {message}")]
    Command { command: String, message: String },
}

/// One job record from the scheduler's job listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub id: String,
    pub name: String,
    pub state: String,
}

/// Job IDs a submission should wait on, split by dependency type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedDeps {
    pub array_ids: Vec<String>,
    pub regular_ids: Vec<String>,
}

impl ResolvedDeps {
    pub fn is_empty(&self) -> bool {
        self.array_ids.is_empty() && self.regular_ids.is_empty()
    }
}

/// Resolve dependency patterns against the live queue.
///
/// An empty pattern list never contacts the scheduler. A failing `qstat`
/// invocation is fatal; a clean invocation with no output only warns and
/// yields empty sets.
pub fn resolve(patterns: &[String]) -> Result<ResolvedDeps> {
    if patterns.is_empty() {
        return Ok(ResolvedDeps::default());
    }

    let result = run_command(&["qstat", "-x"]).map_err(|e| QueryError::Command {
        command: "qstat -x".to_string(),
        message: format!("{:#}", e),
    })?;

    if result.return_code != 0 {
        return Err(QueryError::Command {
            command: "qstat -x".to_string(),
            message: format!("exit code {}: {}", result.return_code, result.stderr.trim()),
        }
        .into());
    }

    if result.stdout.trim().is_empty() {
        eprintln!("Warning: qstat returned no jobs; submitting without dependencies");
        return Ok(ResolvedDeps::default());
    }

    let records = parse_job_listing(&result.stdout);
    let deps = match_patterns(&records, patterns)?;

    if !deps.array_ids.is_empty() && !deps.regular_ids.is_empty() {
        eprintln!(
            "Warning: dependencies match both array and regular jobs; \
             some scheduler versions reject mixed dependency types"
        );
    }

    Ok(deps)
}

/// Parse job records out of the XML job listing from `qstat -x`.
///
/// Only the identifier, name, and state fields are needed, so the records
/// are extracted with regexes rather than a full XML parse.
pub fn parse_job_listing(xml: &str) -> Vec<JobRecord> {
    let job_re = Regex::new(r"(?s)<Job>(.*?)</Job>").unwrap();
    let id_re = Regex::new(r"<Job_Id>\s*([^<]*?)\s*</Job_Id>").unwrap();
    let name_re = Regex::new(r"<Job_Name>\s*([^<]*?)\s*</Job_Name>").unwrap();
    let state_re = Regex::new(r"<job_state>\s*([^<]*?)\s*</job_state>").unwrap();

    let field = |re: &Regex, text: &str| -> String {
        re.captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    };

    job_re
        .captures_iter(xml)
        .filter_map(|caps| {
            let body = caps.get(1)?.as_str();
            let id = field(&id_re, body);
            if id.is_empty() {
                return None;
            }
            Some(JobRecord {
                id,
                name: field(&name_re, body),
                state: field(&state_re, body),
            })
        })
        .collect()
}

/// Match unfinished job records against glob patterns.
///
/// A pattern may match either the job name or the raw identifier. An
/// identifier containing `[]` marks an array job.
pub fn match_patterns(records: &[JobRecord], patterns: &[String]) -> Result<ResolvedDeps> {
    let globs: Vec<Pattern> = patterns
        .iter()
        .map(|p| Pattern::new(p).with_context(|| format!("Invalid dependency pattern: {}", p)))
        .collect::<Result<_>>()?;

    let mut deps = ResolvedDeps::default();

    for record in records {
        // Completed and exiting jobs cannot be depended on
        if matches!(record.state.as_str(), "C" | "E") {
            continue;
        }

        let hit = globs
            .iter()
            .any(|g| g.matches(&record.name) || g.matches(&record.id));
        if !hit {
            continue;
        }

        if record.id.contains("[]") {
            deps.array_ids.push(record.id.clone());
        } else {
            deps.regular_ids.push(record.id.clone());
        }
    }

    Ok(deps)
}

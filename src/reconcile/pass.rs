//! A single reconciliation pass

use crate::affinity::AffinityMask;
use crate::error::{AffinityError, Result};
use crate::rules::{normalize_process_name, RuleStore};
use crate::system::Platform;
use std::time::{Duration, Instant};

/// Counters from one pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Processes enumerated
    pub examined: usize,
    /// Processes with a rule
    pub matched: usize,
    /// Masks written
    pub applied: usize,
    /// Processes already running with their rule mask
    pub unchanged: usize,
    /// Processes whose mask could not be written
    pub failed: usize,
    /// Wall time of the pass
    pub duration: Duration,
}

impl PassReport {
    /// Print pass summary
    pub fn print_summary(&self) {
        println!("Reconciliation pass:");
        println!("  Processes examined: {}", self.examined);
        println!("  With rules:         {}", self.matched);
        println!("  Applied:            {}", self.applied);
        println!("  Already in place:   {}", self.unchanged);
        println!("  Failed:             {}", self.failed);
        println!("  Duration:           {:.2?}", self.duration);
    }
}

enum Outcome {
    Applied,
    Unchanged,
}

fn apply_rule(platform: &dyn Platform, pid: u32, mask: AffinityMask) -> Result<Outcome> {
    // CPUs beyond the mask range mean the current affinity differs from any rule
    if let Ok(current) = platform.read_affinity(pid) {
        if current.mask == mask && !current.is_truncated() {
            return Ok(Outcome::Unchanged);
        }
    }
    platform.set_affinity(pid, mask)?;
    Ok(Outcome::Applied)
}

fn log_failure(pid: u32, name: &str, error: &AffinityError) {
    match error {
        AffinityError::ProcessNotFound(_) => {
            tracing::debug!(pid, process = %name, "process exited before its rule was applied")
        }
        _ if error.is_recoverable() => {
            tracing::warn!(pid, process = %name, error = %error, "failed to apply affinity rule")
        }
        _ => tracing::error!(pid, process = %name, error = %error, "affinity rule cannot be applied"),
    }
}

/// Apply stored rules to every running process.
///
/// Only a failure to enumerate processes fails the pass. Per-process errors
/// are logged and counted.
pub fn run_pass(platform: &dyn Platform, store: &RuleStore) -> Result<PassReport> {
    let started = Instant::now();
    let processes = platform.enumerate_processes()?;
    let rules = store.resolve_all();

    let mut report = PassReport {
        examined: processes.len(),
        ..Default::default()
    };

    if !rules.is_empty() {
        for process in &processes {
            let key = normalize_process_name(&process.name);
            let Some(rule) = rules.get(&key) else {
                continue;
            };
            report.matched += 1;

            match apply_rule(platform, process.pid, rule.mask) {
                Ok(Outcome::Applied) => {
                    report.applied += 1;
                    tracing::debug!(pid = process.pid, process = %key, mask = %rule.mask, source = %rule.source, "rule applied");
                }
                Ok(Outcome::Unchanged) => report.unchanged += 1,
                Err(e) => {
                    report.failed += 1;
                    log_failure(process.pid, &process.name, &e);
                }
            }
        }
    }

    report.duration = started.elapsed();
    tracing::info!(
        examined = report.examined,
        matched = report.matched,
        applied = report.applied,
        failed = report.failed,
        "reconciliation pass complete"
    );
    Ok(report)
}

/// Apply the stored rule for a newly started process.
///
/// Returns the mask applied, or `None` when no rule exists.
pub fn trigger_for_process_start(
    platform: &dyn Platform,
    store: &RuleStore,
    pid: u32,
    name: &str,
) -> Result<Option<AffinityMask>> {
    let Some(rule) = store.get(name) else {
        return Ok(None);
    };

    match apply_rule(platform, pid, rule.mask) {
        Ok(_) => {
            tracing::info!(pid, process = %rule.process_name, mask = %rule.mask, "rule applied at process start");
            Ok(Some(rule.mask))
        }
        Err(e) => {
            log_failure(pid, name, &e);
            Err(e)
        }
    }
}

//! Validated CPU selections and applying them to processes

use crate::affinity::{detect_core_collisions, estimate_impact, AffinityMask, CoreCollisions, ImpactEstimate};
use crate::error::{AffinityError, Result};
use crate::rules::{RuleStore, SaveReport};
use crate::system::{Platform, ProcessorTopology};
use serde::{Deserialize, Serialize};

/// Where an applied mask should also be stored as a rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SaveTarget {
    /// Apply to the running process only
    #[default]
    None,
    /// Both registry scopes
    Permanent,
    /// The rule-table file
    Table,
}

/// A CPU selection checked against the topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyPlan {
    /// Selected CPU ids, ascending and deduplicated
    pub cpus: Vec<usize>,
    /// Mask of the representable selected CPUs
    pub mask: AffinityMask,
    /// Selected CPUs a 64-bit mask cannot carry
    pub truncated: Vec<usize>,
    /// Hyperthread siblings inside the selection
    pub collisions: CoreCollisions,
}

/// What happened when a plan was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// Target process
    pub pid: u32,
    /// Affinity before the change, when it could be read
    pub previous: Option<AffinityMask>,
    /// Affinity now in effect
    pub applied: AffinityMask,
}

impl ApplyPlan {
    /// Validate a selection.
    ///
    /// Fails on an empty selection, on CPU ids outside the topology, and when
    /// every selected CPU lies beyond the mask range.
    pub fn prepare(cpus: &[usize], topology: &ProcessorTopology, threads_per_core: usize) -> Result<Self> {
        let mut cpus = cpus.to_vec();
        cpus.sort_unstable();
        cpus.dedup();

        if cpus.is_empty() {
            return Err(AffinityError::EmptySelection);
        }
        if let Some(&cpu) = cpus.iter().find(|&&c| c >= topology.logical_processors) {
            return Err(AffinityError::InvalidCpu {
                cpu,
                available: topology.logical_processors,
            });
        }

        let conversion = AffinityMask::from_cpus(cpus.iter().copied());
        if conversion.mask.is_empty() {
            return Err(AffinityError::Truncation {
                cpus: conversion.truncated,
            });
        }
        if conversion.is_truncated() {
            tracing::warn!(cpus = ?conversion.truncated, "selected CPUs dropped from affinity mask");
        }

        let collisions = detect_core_collisions(&cpus, threads_per_core);

        Ok(Self {
            cpus,
            mask: conversion.mask,
            truncated: conversion.truncated,
            collisions,
        })
    }

    /// Whether applying needs explicit confirmation
    pub fn requires_confirmation(&self) -> bool {
        self.collisions.has_collisions()
    }

    /// Impact of moving from `current` to this plan
    pub fn impact(&self, current: AffinityMask) -> ImpactEstimate {
        estimate_impact(current, self.mask.count())
    }

    /// Apply the plan to a running process.
    ///
    /// A plan with hyperthread collisions is refused unless `confirmed`.
    pub fn apply(&self, platform: &dyn Platform, pid: u32, confirmed: bool) -> Result<ApplyOutcome> {
        if self.requires_confirmation() {
            if !confirmed {
                return Err(AffinityError::UnconfirmedCollision {
                    cores: self.collisions.cores.clone(),
                });
            }
            tracing::warn!(pid, cores = ?self.collisions.cores, "applying selection with shared physical cores");
        }

        let previous = platform.get_affinity(pid).ok();
        platform.set_affinity(pid, self.mask)?;

        tracing::info!(pid, mask = %self.mask, "affinity applied");
        Ok(ApplyOutcome {
            pid,
            previous,
            applied: self.mask,
        })
    }

    /// Store the plan's mask as a rule for `process_name`
    pub fn save(&self, store: &RuleStore, process_name: &str, target: SaveTarget) -> Result<Option<SaveReport>> {
        match target {
            SaveTarget::None => Ok(None),
            SaveTarget::Permanent => store.save_permanent(process_name, self.mask).map(Some),
            SaveTarget::Table => {
                store.save_to_table(process_name, self.mask)?;
                Ok(None)
            }
        }
    }

    /// Print plan summary
    pub fn print_summary(&self) {
        println!("CPU selection:");
        println!("  CPUs: {}", crate::affinity::format_cpu_list(&self.cpus));
        println!("  Mask: {}", self.mask);
        if !self.truncated.is_empty() {
            println!(
                "  Dropped (beyond mask range): {}",
                crate::affinity::format_cpu_list(&self.truncated)
            );
        }
        if self.collisions.has_collisions() {
            println!("  Warning: {}", self.collisions.warning());
        }
    }
}

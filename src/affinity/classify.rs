//! Heuristic classification of an observed affinity mask
//!
//! Guesses where a process's current affinity came from (OS default, manual
//! pinning, application code) and how good it is. Purely advisory.

use super::mask::AffinityMask;
use crate::system::ProcessorTopology;
use serde::{Deserialize, Serialize};

/// Probable origin of an affinity mask, in classification priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaskOrigin {
    /// Every logical CPU is allowed (operating system default)
    FullSystemDefault,
    /// Pinned to exactly one CPU
    SingleCpu,
    /// Mask value is a power of two (manual or automatic)
    PowerOfTwo,
    /// One unbroken run of CPUs (typical NUMA-aware manual choice)
    ContiguousRange,
    /// Scattered CPUs, usually set by application code
    ScatteredApplicationAssigned,
    /// Nothing else matched
    Unknown,
}

/// Classification result with display text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskClassification {
    /// Classified origin
    pub origin: MaskOrigin,
    /// Number of CPUs in the mask
    pub cpu_count: usize,
    /// Human-readable origin label
    pub source: String,
    /// Human-readable recommendation
    pub recommendation: String,
}

impl MaskOrigin {
    /// Human-readable origin label
    pub fn label(&self, cpu_count: usize) -> String {
        match self {
            Self::FullSystemDefault => "Operating system default (all CPUs)".to_string(),
            Self::SingleCpu => "Manual assignment (single CPU)".to_string(),
            Self::PowerOfTwo => format!("Manual or automatic ({} CPUs)", cpu_count),
            Self::ContiguousRange => format!("Manual NUMA optimization ({} CPUs)", cpu_count),
            Self::ScatteredApplicationAssigned => {
                format!("Application code assignment ({} CPUs)", cpu_count)
            }
            Self::Unknown => format!("Unknown source ({} CPUs)", cpu_count),
        }
    }

    /// Fixed recommendation for this origin
    pub fn recommendation(&self, cpu_count: usize) -> &'static str {
        match self {
            Self::FullSystemDefault => "Good: the operating system manages placement",
            Self::SingleCpu => "Too restrictive, widen CPU set",
            Self::PowerOfTwo if cpu_count >= 4 => "Reasonable",
            Self::PowerOfTwo => "Add more CPUs",
            Self::ContiguousRange => "NUMA-aware, good choice",
            Self::ScatteredApplicationAssigned => {
                "The application sets its own affinity; review its configuration"
            }
            Self::Unknown => "Manual inspection required",
        }
    }
}

/// Classify `mask` against the machine described by `topology`
pub fn classify_mask(mask: AffinityMask, topology: &ProcessorTopology) -> MaskClassification {
    let cpu_count = mask.count();
    let origin = classify_origin(mask, topology.logical_processors);

    MaskClassification {
        origin,
        cpu_count,
        source: origin.label(cpu_count),
        recommendation: origin.recommendation(cpu_count).to_string(),
    }
}

fn classify_origin(mask: AffinityMask, logical_processors: usize) -> MaskOrigin {
    let cpu_count = mask.count();

    if logical_processors > 0 && mask == AffinityMask::full(logical_processors) {
        MaskOrigin::FullSystemDefault
    } else if cpu_count == 1 {
        MaskOrigin::SingleCpu
    } else if mask.bits().is_power_of_two() {
        MaskOrigin::PowerOfTwo
    } else if mask.is_contiguous() {
        MaskOrigin::ContiguousRange
    } else if cpu_count > 2 {
        MaskOrigin::ScatteredApplicationAssigned
    } else {
        MaskOrigin::Unknown
    }
}

/// Expected impact of moving a process from `current` to `proposed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpactEstimate {
    /// Expected effect
    pub expected: String,
    /// Risk level
    pub risk: RiskLevel,
}

/// Risk of an affinity change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    /// Safe change
    Low,
    /// Likely to slow the process down
    High,
}

/// Compare CPU counts before and after a change
pub fn estimate_impact(current: AffinityMask, proposed_cpus: usize) -> ImpactEstimate {
    let current_cpus = current.count();

    if proposed_cpus < current_cpus {
        ImpactEstimate {
            expected: "Fewer CPUs; performance may drop".to_string(),
            risk: RiskLevel::High,
        }
    } else if proposed_cpus == current_cpus || current_cpus == 0 {
        ImpactEstimate {
            expected: "Same CPU count; NUMA locality improves".to_string(),
            risk: RiskLevel::Low,
        }
    } else {
        let gain = (proposed_cpus - current_cpus) * 100 / current_cpus;
        ImpactEstimate {
            expected: format!("About {}% more CPU capacity", gain),
            risk: RiskLevel::Low,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eight_cpus() -> ProcessorTopology {
        ProcessorTopology::from_counts(4, 8, 1)
    }

    fn origin_of(cpus: &[usize]) -> MaskOrigin {
        let mask = AffinityMask::from_cpus(cpus.iter().copied()).mask;
        classify_mask(mask, &eight_cpus()).origin
    }

    #[test]
    fn test_full_system_default() {
        let result = classify_mask(AffinityMask::from_bits(0xFF), &eight_cpus());
        assert_eq!(result.origin, MaskOrigin::FullSystemDefault);
        assert_eq!(result.cpu_count, 8);
    }

    #[test]
    fn test_single_cpu() {
        let result = classify_mask(AffinityMask::from_bits(0b100), &eight_cpus());
        assert_eq!(result.origin, MaskOrigin::SingleCpu);
        assert_eq!(result.recommendation, "Too restrictive, widen CPU set");
    }

    #[test]
    fn test_contiguous_range() {
        assert_eq!(origin_of(&[0, 1, 2, 3]), MaskOrigin::ContiguousRange);
        assert_eq!(origin_of(&[4, 5]), MaskOrigin::ContiguousRange);
        let result = classify_mask(AffinityMask::from_bits(0xF), &eight_cpus());
        assert_eq!(result.recommendation, "NUMA-aware, good choice");
    }

    #[test]
    fn test_scattered() {
        assert_eq!(origin_of(&[0, 2, 5, 7]), MaskOrigin::ScatteredApplicationAssigned);
        assert_eq!(origin_of(&[1, 3, 6]), MaskOrigin::ScatteredApplicationAssigned);
    }

    #[test]
    fn test_unknown() {
        assert_eq!(origin_of(&[]), MaskOrigin::Unknown);
        assert_eq!(origin_of(&[0, 5]), MaskOrigin::Unknown);
    }

    #[test]
    fn test_full_mask_on_large_machine() {
        let topology = ProcessorTopology::from_counts(64, 128, 2);
        let result = classify_mask(AffinityMask::from_bits(u64::MAX), &topology);
        assert_eq!(result.origin, MaskOrigin::FullSystemDefault);
    }

    #[test]
    fn test_impact_estimate() {
        let current = AffinityMask::from_bits(0xF);
        assert_eq!(estimate_impact(current, 2).risk, RiskLevel::High);
        assert_eq!(estimate_impact(current, 4).risk, RiskLevel::Low);
        assert_eq!(estimate_impact(current, 8).expected, "About 100% more CPU capacity");
    }
}

//! Hyperthread sibling collision detection

use std::collections::{BTreeMap, BTreeSet};

/// Default number of hardware threads per physical core
pub const DEFAULT_THREADS_PER_CORE: usize = 2;

/// CPUs in a selection that share a physical core
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreCollisions {
    /// Physical core ids with more than one selected sibling, ascending
    pub cores: Vec<usize>,
    /// The colliding CPU ids, ascending
    pub cpus: Vec<usize>,
}

impl CoreCollisions {
    /// Whether any core is double-booked
    pub fn has_collisions(&self) -> bool {
        !self.cores.is_empty()
    }

    /// One-line warning text for display
    pub fn warning(&self) -> String {
        format!(
            "CPUs {:?} share physical cores {:?}; hyperthread siblings compete for the same core",
            self.cpus, self.cores
        )
    }
}

/// Group CPU ids by `id / threads_per_core` and report cores with more than
/// one selected member
pub fn detect_core_collisions(cpu_ids: &[usize], threads_per_core: usize) -> CoreCollisions {
    let threads_per_core = threads_per_core.max(1);
    let mut groups: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();

    for &cpu in cpu_ids {
        groups.entry(cpu / threads_per_core).or_default().insert(cpu);
    }

    let mut collisions = CoreCollisions::default();
    for (core, cpus) in groups {
        if cpus.len() > 1 {
            collisions.cores.push(core);
            collisions.cpus.extend(cpus);
        }
    }

    collisions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sibling_collision() {
        let result = detect_core_collisions(&[0, 1, 2], DEFAULT_THREADS_PER_CORE);
        assert!(result.has_collisions());
        assert_eq!(result.cores, vec![0]);
        assert_eq!(result.cpus, vec![0, 1]);
    }

    #[test]
    fn test_no_collision_on_even_cpus() {
        let result = detect_core_collisions(&[0, 2, 4, 6], 2);
        assert!(!result.has_collisions());
        assert!(result.cpus.is_empty());
    }

    #[test]
    fn test_duplicates_are_not_collisions() {
        assert!(!detect_core_collisions(&[3, 3], 2).has_collisions());
    }

    #[test]
    fn test_wider_cores() {
        let result = detect_core_collisions(&[0, 3, 4, 9], 4);
        assert_eq!(result.cores, vec![0]);
        assert_eq!(result.cpus, vec![0, 3]);
    }

    #[test]
    fn test_zero_threads_per_core_never_collides() {
        assert!(!detect_core_collisions(&[0, 1, 2, 3], 0).has_collisions());
    }
}

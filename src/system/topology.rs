//! NUMA (Non-Uniform Memory Access) topology model
//!
//! A static snapshot of logical CPUs, cores, sockets and NUMA node
//! membership. Nodes are modelled one per socket with the logical CPUs
//! divided evenly between them, so node CPU sets always partition
//! `0..logical_processors`.

use super::platform::Platform;
use crate::affinity::{AffinityMask, MASK_BITS};
use serde::{Deserialize, Serialize};

/// NUMA node information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumaNode {
    /// Node ID (0-based)
    pub node_id: usize,
    /// CPUs belonging to this node, ascending
    pub processor_ids: Vec<usize>,
    /// Mask of the representable CPUs of this node
    pub affinity_mask: AffinityMask,
    /// CPUs of this node that a 64-bit mask cannot address
    pub unrepresentable: Vec<usize>,
}

impl NumaNode {
    /// Create a node from its CPU ids
    pub fn new(node_id: usize, mut processor_ids: Vec<usize>) -> Self {
        processor_ids.sort_unstable();
        processor_ids.dedup();

        let conversion = AffinityMask::from_cpus(processor_ids.iter().copied());
        if conversion.is_truncated() {
            tracing::warn!(
                node = node_id,
                cpus = ?conversion.truncated,
                "NUMA node has CPUs beyond the 64-bit affinity mask range"
            );
        }

        Self {
            node_id,
            processor_ids,
            affinity_mask: conversion.mask,
            unrepresentable: conversion.truncated,
        }
    }

    /// Number of CPUs of `mask` that fall on this node
    pub fn overlap(&self, mask: AffinityMask) -> usize {
        self.affinity_mask.intersection_count(mask)
    }

    /// First `n` CPU ids of this node
    pub fn first_cpus(&self, n: usize) -> Vec<usize> {
        self.processor_ids.iter().take(n).copied().collect()
    }

    /// Last `n` CPU ids of this node
    pub fn last_cpus(&self, n: usize) -> Vec<usize> {
        let skip = self.processor_ids.len().saturating_sub(n);
        self.processor_ids[skip..].to_vec()
    }
}

/// Processor topology information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessorTopology {
    /// Physical cores across all sockets
    pub total_cores: usize,
    /// Logical processors (hardware threads)
    pub logical_processors: usize,
    /// Physical sockets
    pub physical_sockets: usize,
    /// NUMA nodes ordered by node ID
    pub nodes: Vec<NumaNode>,
}

impl ProcessorTopology {
    /// Build a topology with one node per socket and CPUs divided evenly.
    ///
    /// When the division leaves a remainder the last node takes it, so every
    /// logical CPU belongs to exactly one node. A socket count of zero is
    /// treated as one.
    pub fn from_counts(total_cores: usize, logical_processors: usize, physical_sockets: usize) -> Self {
        let node_count = physical_sockets.clamp(1, logical_processors.max(1));
        let per_node = logical_processors / node_count;

        let nodes = (0..node_count)
            .map(|node_id| {
                let start = node_id * per_node;
                let end = if node_id + 1 == node_count {
                    logical_processors
                } else {
                    start + per_node
                };
                NumaNode::new(node_id, (start..end).collect())
            })
            .collect();

        Self {
            total_cores,
            logical_processors,
            physical_sockets: physical_sockets.max(1),
            nodes,
        }
    }

    /// Single node containing every logical CPU
    pub fn single_node(logical_processors: usize) -> Self {
        Self::from_counts(logical_processors, logical_processors, 1)
    }

    /// Fallback topology from the CPU count visible to this process
    pub fn fallback() -> Self {
        Self {
            total_cores: num_cpus::get_physical(),
            ..Self::single_node(num_cpus::get())
        }
    }

    /// Discover topology through the platform, falling back to a single
    /// node on failure. Safe to call repeatedly.
    pub fn discover(platform: &dyn Platform) -> Self {
        match platform.discover_topology() {
            Ok(topology) if !topology.nodes.is_empty() => topology,
            Ok(_) => {
                tracing::warn!("platform reported no NUMA nodes, using single-node topology");
                Self::fallback()
            }
            Err(e) => {
                tracing::warn!(error = %e, "topology discovery failed, using single-node topology");
                Self::fallback()
            }
        }
    }

    /// Number of NUMA nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Find a node by ID
    pub fn node(&self, node_id: usize) -> Option<&NumaNode> {
        self.nodes.iter().find(|n| n.node_id == node_id)
    }

    /// Mask with every representable logical CPU
    pub fn full_mask(&self) -> AffinityMask {
        AffinityMask::full(self.logical_processors)
    }

    /// Hardware threads per physical core, when it can be inferred
    pub fn threads_per_core(&self) -> Option<usize> {
        if self.total_cores == 0 || self.logical_processors % self.total_cores != 0 {
            None
        } else {
            Some(self.logical_processors / self.total_cores)
        }
    }

    /// Whether the machine has more CPUs than a mask can address
    pub fn exceeds_mask_range(&self) -> bool {
        self.logical_processors > MASK_BITS
    }

    /// Print topology summary
    pub fn print_summary(&self) {
        println!("Processor Topology:");
        println!("  Sockets:     {}", self.physical_sockets);
        println!("  Cores:       {}", self.total_cores);
        println!("  Logical:     {}", self.logical_processors);
        println!("  NUMA nodes:  {}", self.node_count());

        for node in &self.nodes {
            println!("  Node {}:", node.node_id);
            println!(
                "    CPUs: {}",
                crate::affinity::format_cpu_list(&node.processor_ids)
            );
            println!("    Mask: {}", node.affinity_mask);
            if !node.unrepresentable.is_empty() {
                println!(
                    "    Not addressable by mask: {}",
                    crate::affinity::format_cpu_list(&node.unrepresentable)
                );
            }
        }

        if self.exceeds_mask_range() {
            println!("  Warning: CPUs beyond 64 cannot be assigned with a 64-bit mask");
        }
    }
}

//! NUMA node selection for processes
//!
//! Recommendations are pure functions of the topology and a snapshot of
//! peer processes. Nothing is cached between calls, so repeated calls on the
//! same snapshot return the same CPUs.

use super::workload::{classify_workload, WorkloadClass};
use crate::system::{NumaNode, ProcessRecord, ProcessorTopology};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Number of CPUs a recommendation asks for
pub const RECOMMENDED_CPUS: usize = 4;

/// Why a node was chosen for a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionReason {
    /// Same-session peers already favour this node
    SessionAffinity,
    /// Node hosting the fewest sessions of this application
    SessionBalance,
    /// No peer is mapped yet; node picked from the session ID
    RoundRobin,
    /// Fixed placement for the workload class
    WorkloadPlacement,
    /// Node with the least peer load
    LeastLoaded,
}

/// A recommended CPU set
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    /// Workload class the recommendation was made for
    pub workload: WorkloadClass,
    /// Node the CPUs come from
    pub node_id: Option<usize>,
    /// Recommended CPU ids, in node order
    pub cpus: Vec<usize>,
    /// How the node was selected
    pub reason: SelectionReason,
}

/// Recommend CPUs for a workload class.
///
/// `peers` are comparable running processes; their current affinity is the
/// load measure for least-loaded selection.
pub fn recommend_assignment(
    topology: &ProcessorTopology,
    workload: WorkloadClass,
    peers: &[ProcessRecord],
) -> Vec<usize> {
    recommend_for_workload(topology, workload, peers).cpus
}

/// Like [`recommend_assignment`], also reporting the chosen node
pub fn recommend_for_workload(
    topology: &ProcessorTopology,
    workload: WorkloadClass,
    peers: &[ProcessRecord],
) -> Recommendation {
    let placed = |node: Option<&NumaNode>, cpus: Vec<usize>| Recommendation {
        workload,
        node_id: node.map(|n| n.node_id),
        cpus,
        reason: SelectionReason::WorkloadPlacement,
    };

    match workload {
        WorkloadClass::DatabaseServer => {
            // Trailing nodes tend to be the least contended
            let node = topology.nodes.last();
            placed(node, node.map(|n| n.last_cpus(RECOMMENDED_CPUS)).unwrap_or_default())
        }
        WorkloadClass::WebServer => {
            let node = topology.nodes.get(topology.nodes.len() / 2);
            placed(node, node.map(centre_cpus).unwrap_or_default())
        }
        WorkloadClass::ReportServer => {
            let node = topology.nodes.first();
            placed(node, node.map(|n| n.last_cpus(RECOMMENDED_CPUS)).unwrap_or_default())
        }
        WorkloadClass::ApplicationServer | WorkloadClass::Default => {
            let node = least_loaded_node(topology, peers);
            Recommendation {
                workload,
                node_id: node.map(|n| n.node_id),
                cpus: node.map(|n| n.first_cpus(RECOMMENDED_CPUS)).unwrap_or_default(),
                reason: SelectionReason::LeastLoaded,
            }
        }
    }
}

/// Recommend CPUs for a process name, using same-named processes from
/// `snapshot` as peers
pub fn recommend_for_name(
    topology: &ProcessorTopology,
    process_name: &str,
    snapshot: &[ProcessRecord],
) -> Recommendation {
    let key = crate::rules::normalize_process_name(process_name);
    let peers: Vec<ProcessRecord> = snapshot
        .iter()
        .filter(|p| p.normalized_name() == key)
        .cloned()
        .collect();

    recommend_for_workload(topology, classify_workload(process_name), &peers)
}

fn centre_cpus(node: &NumaNode) -> Vec<usize> {
    let start = (node.processor_ids.len() / 2).saturating_sub(RECOMMENDED_CPUS / 2);
    node.processor_ids
        .iter()
        .skip(start)
        .take(RECOMMENDED_CPUS)
        .copied()
        .collect()
}

/// Load of each node: total overlap of peer affinities with the node's CPUs
pub fn node_loads(topology: &ProcessorTopology, peers: &[ProcessRecord]) -> Vec<(usize, usize)> {
    topology
        .nodes
        .iter()
        .map(|node| {
            let load = peers.iter().map(|p| node.overlap(p.current_affinity)).sum();
            (node.node_id, load)
        })
        .collect()
}

/// Node with the smallest load; ties go to the lower node ID
pub fn least_loaded_node<'a>(
    topology: &'a ProcessorTopology,
    peers: &[ProcessRecord],
) -> Option<&'a NumaNode> {
    topology
        .nodes
        .iter()
        .map(|node| {
            let load: usize = peers.iter().map(|p| node.overlap(p.current_affinity)).sum();
            (load, node.node_id, node)
        })
        .min_by_key(|&(load, node_id, _)| (load, node_id))
        .map(|(_, _, node)| node)
}

/// Node holding a strict majority of the process's allowed CPUs.
///
/// Processes allowed on no CPU or on every addressable CPU have no
/// dominant node.
pub fn dominant_node(topology: &ProcessorTopology, process: &ProcessRecord) -> Option<usize> {
    let mask = process.current_affinity;
    let count = mask.count();
    if count == 0 || mask.intersection_count(topology.full_mask()) >= topology.full_mask().count() {
        return None;
    }

    topology
        .nodes
        .iter()
        .find(|node| node.overlap(process.current_affinity) * 2 > count)
        .map(|node| node.node_id)
}

/// Session-aware recommendation for a specific running process.
///
/// Only peers with the same normalized name are considered. Preference
/// order: keep the node the target's session already uses, then the node
/// hosting the fewest sessions of the application, then a round-robin node
/// derived from the session ID.
pub fn recommend_for_process(
    topology: &ProcessorTopology,
    target: &ProcessRecord,
    peers: &[ProcessRecord],
) -> Recommendation {
    let workload = classify_workload(&target.name);
    let key = target.normalized_name();
    let instances: Vec<&ProcessRecord> = peers.iter().filter(|p| p.normalized_name() == key).collect();

    let (node, reason) = select_session_node(topology, target, &instances);
    Recommendation {
        workload,
        node_id: node.map(|n| n.node_id),
        cpus: node.map(|n| n.first_cpus(RECOMMENDED_CPUS)).unwrap_or_default(),
        reason,
    }
}

fn select_session_node<'a>(
    topology: &'a ProcessorTopology,
    target: &ProcessRecord,
    instances: &[&ProcessRecord],
) -> (Option<&'a NumaNode>, SelectionReason) {
    // Session stickiness: majority vote of same-session dominant nodes
    let mut votes: BTreeMap<usize, usize> = BTreeMap::new();
    for peer in instances.iter().filter(|p| p.session_id == target.session_id) {
        if let Some(node_id) = dominant_node(topology, peer) {
            *votes.entry(node_id).or_default() += 1;
        }
    }
    let session_node = votes
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(&node_id, _)| node_id);
    if let Some(node) = session_node.and_then(|id| topology.node(id)) {
        return (Some(node), SelectionReason::SessionAffinity);
    }

    // Cross-session balancing: distinct sessions already mapped per node
    let mut sessions: BTreeMap<usize, BTreeSet<u32>> =
        topology.nodes.iter().map(|n| (n.node_id, BTreeSet::new())).collect();
    for peer in instances {
        if let Some(node_id) = dominant_node(topology, peer) {
            sessions.entry(node_id).or_default().insert(peer.session_id);
        }
    }
    if sessions.values().any(|s| !s.is_empty()) {
        let node = sessions
            .iter()
            .min_by_key(|(node_id, s)| (s.len(), **node_id))
            .and_then(|(node_id, _)| topology.node(*node_id));
        return (node, SelectionReason::SessionBalance);
    }

    // Nothing mapped yet: spread fresh instances by session ID
    let node = match topology.nodes.len() {
        0 => None,
        n => topology.nodes.get(target.session_id as usize % n),
    };
    (node, SelectionReason::RoundRobin)
}

//! # numa-affinity - NUMA-Aware Processor Affinity Policy Engine
//!
//! numa-affinity decides which logical CPUs a server process should run on,
//! stores those decisions as per-process rules and keeps them applied to
//! running processes.
//!
//! ## Features
//!
//! - **Topology Model**: sockets, cores, logical CPUs and NUMA node membership
//! - **Affinity Codec**: 64-bit masks, Linux-style CPU lists, hyperthread
//!   collision detection
//! - **Mask Classification**: guesses where an observed mask came from
//! - **Assignment Policy**: workload-aware and session-aware node selection
//! - **Rule Store**: rule-table file plus machine and user scopes, with
//!   JSON export and import
//! - **Reconciliation**: periodic, non-overlapping rule application
//!
//! ## Quick Start
//!
//! ```no_run
//! use numa_affinity::policy::{classify_workload, recommend_assignment};
//! use numa_affinity::system::{native_platform, snapshot_processes, ProcessorTopology};
//!
//! let platform = native_platform();
//! let topology = ProcessorTopology::discover(platform.as_ref());
//! topology.print_summary();
//!
//! let peers = snapshot_processes(platform.as_ref()).unwrap();
//! let cpus = recommend_assignment(&topology, classify_workload("sqlservr"), &peers);
//! println!("Recommended CPUs: {:?}", cpus);
//! ```
//!
//! ## Keeping Rules Applied
//!
//! ```no_run
//! use numa_affinity::affinity::AffinityMask;
//! use numa_affinity::reconcile::{Reconciler, DEFAULT_INTERVAL};
//! use numa_affinity::rules::RuleStore;
//! use numa_affinity::system::native_platform;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() {
//! let store = RuleStore::with_defaults("/etc/numa-affinity/rules.txt", "/etc", "/root/.config");
//! store.save_permanent("postgres", AffinityMask::from_bits(0xF0)).unwrap();
//!
//! let reconciler = Reconciler::new(native_platform(), Arc::new(store));
//! let cancel = CancellationToken::new();
//! reconciler.run(DEFAULT_INTERVAL, cancel).await;
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod affinity;
pub mod config;
pub mod error;
pub mod policy;
pub mod reconcile;
pub mod rules;
pub mod system;

// Re-export commonly used types
pub use affinity::AffinityMask;
pub use error::{AffinityError, Result};
pub use rules::RuleStore;
pub use system::ProcessorTopology;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use numa_affinity::prelude::*;
    //! ```

    pub use crate::affinity::{
        classify_mask, detect_core_collisions, format_cpu_list, parse_cpu_list, parse_mask_text,
        AffinityMask, MaskOrigin,
    };
    pub use crate::error::{AffinityError, Result};
    pub use crate::policy::{
        classify_workload, recommend_assignment, recommend_for_process, ApplyPlan, SaveTarget,
        WorkloadClass,
    };
    pub use crate::reconcile::{run_pass, trigger_for_process_start, PassReport, Reconciler};
    pub use crate::rules::{normalize_process_name, ResolvedRule, RuleStore};
    pub use crate::system::{native_platform, snapshot_processes, Platform, ProcessRecord, ProcessorTopology};
}

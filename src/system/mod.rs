//! System topology and platform access
//!
//! Provides the processor/NUMA topology model and the platform collaborator
//! used to enumerate processes and read or change their affinity.

pub mod platform;
mod topology;

pub use platform::{native_platform, snapshot_processes, Platform, ProcessEntry, ProcessRecord};
pub use topology::{NumaNode, ProcessorTopology};

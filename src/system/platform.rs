//! Platform collaborator: process enumeration and affinity get/set
//!
//! The policy engine never talks to the operating system directly. It goes
//! through [`Platform`], which has a Linux implementation backed by procfs,
//! sysfs and the `sched_{get,set}affinity` syscalls.

use super::topology::ProcessorTopology;
use crate::affinity::{AffinityMask, MaskConversion};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A running process as reported by the platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessEntry {
    /// Process ID
    pub pid: u32,
    /// Raw process name
    pub name: String,
    /// Session ID
    pub session_id: u32,
}

/// A running process together with its current affinity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    /// Process ID
    pub pid: u32,
    /// Raw process name
    pub name: String,
    /// Session ID
    pub session_id: u32,
    /// Current affinity mask
    pub current_affinity: AffinityMask,
}

impl ProcessRecord {
    /// Normalized process name (see [`crate::rules::normalize_process_name`])
    pub fn normalized_name(&self) -> String {
        crate::rules::normalize_process_name(&self.name)
    }
}

/// Operating system operations the engine depends on
pub trait Platform: Send + Sync {
    /// List running processes
    fn enumerate_processes(&self) -> Result<Vec<ProcessEntry>>;

    /// Read a process's affinity mask
    fn get_affinity(&self, pid: u32) -> Result<AffinityMask>;

    /// Read a process's affinity, also reporting allowed CPUs at 64 and
    /// above that the mask cannot hold
    fn read_affinity(&self, pid: u32) -> Result<MaskConversion> {
        self.get_affinity(pid).map(|mask| MaskConversion {
            mask,
            truncated: Vec::new(),
        })
    }

    /// Replace a process's affinity mask
    fn set_affinity(&self, pid: u32, mask: AffinityMask) -> Result<()>;

    /// Discover the processor topology
    fn discover_topology(&self) -> Result<ProcessorTopology>;
}

/// Snapshot running processes with their current affinity.
///
/// Processes whose affinity cannot be read are skipped. The result is sorted
/// by name, then PID.
pub fn snapshot_processes(platform: &dyn Platform) -> Result<Vec<ProcessRecord>> {
    let mut records: Vec<ProcessRecord> = platform
        .enumerate_processes()?
        .into_iter()
        .filter_map(|entry| match platform.get_affinity(entry.pid) {
            Ok(current_affinity) => Some(ProcessRecord {
                pid: entry.pid,
                name: entry.name,
                session_id: entry.session_id,
                current_affinity,
            }),
            Err(e) => {
                tracing::debug!(pid = entry.pid, name = %entry.name, error = %e, "skipping process");
                None
            }
        })
        .collect();

    records.sort_by(|a, b| a.name.cmp(&b.name).then(a.pid.cmp(&b.pid)));
    Ok(records)
}

/// Platform implementation for the current operating system
pub fn native_platform() -> Arc<dyn Platform> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(linux::LinuxPlatform::new())
    }

    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(UnsupportedPlatform)
    }
}

/// Placeholder for platforms without affinity support
#[cfg(not(target_os = "linux"))]
#[derive(Debug, Default)]
pub struct UnsupportedPlatform;

#[cfg(not(target_os = "linux"))]
impl Platform for UnsupportedPlatform {
    fn enumerate_processes(&self) -> Result<Vec<ProcessEntry>> {
        Err(crate::error::AffinityError::UnsupportedOperation(
            "process enumeration".to_string(),
        ))
    }

    fn get_affinity(&self, _pid: u32) -> Result<AffinityMask> {
        Err(crate::error::AffinityError::UnsupportedOperation(
            "reading process affinity".to_string(),
        ))
    }

    fn set_affinity(&self, _pid: u32, _mask: AffinityMask) -> Result<()> {
        Err(crate::error::AffinityError::UnsupportedOperation(
            "setting process affinity".to_string(),
        ))
    }

    fn discover_topology(&self) -> Result<ProcessorTopology> {
        Ok(ProcessorTopology::fallback())
    }
}

#[cfg(target_os = "linux")]
pub mod linux {
    //! Linux platform backed by procfs, sysfs and libc

    use super::{Platform, ProcessEntry};
    use crate::affinity::{parse_cpu_list, AffinityMask, MaskConversion};
    use crate::error::{AffinityError, Result};
    use crate::system::ProcessorTopology;
    use std::collections::BTreeSet;
    use std::path::Path;

    const SYSFS_CPU: &str = "/sys/devices/system/cpu";

    /// Linux implementation of [`Platform`]
    #[derive(Debug, Default)]
    pub struct LinuxPlatform;

    impl LinuxPlatform {
        /// Create the platform handle
        pub fn new() -> Self {
            Self
        }

        fn online_cpus() -> Option<usize> {
            let content = std::fs::read_to_string(Path::new(SYSFS_CPU).join("online")).ok()?;
            let cpus = parse_cpu_list(content.trim());
            cpus.last().map(|&last| last + 1)
        }

        fn socket_count(logical: usize) -> Option<usize> {
            let mut packages = BTreeSet::new();
            for cpu in 0..logical {
                let path = Path::new(SYSFS_CPU)
                    .join(format!("cpu{}", cpu))
                    .join("topology/physical_package_id");
                if let Ok(content) = std::fs::read_to_string(&path) {
                    if let Ok(id) = content.trim().parse::<i64>() {
                        packages.insert(id);
                    }
                }
            }
            if packages.is_empty() {
                None
            } else {
                Some(packages.len())
            }
        }

        fn map_errno(pid: u32, err: std::io::Error) -> AffinityError {
            match err.raw_os_error() {
                Some(libc::ESRCH) => AffinityError::ProcessNotFound(pid),
                _ => AffinityError::access(pid, err.to_string()),
            }
        }

        fn set_thread_affinity(pid: u32, tid: i32, mask: AffinityMask) -> Result<()> {
            // SAFETY: cpu_set_t is plain data; zeroed is a valid empty set and
            // the pointer passed to the syscall lives for the whole call.
            let result = unsafe {
                let mut set: libc::cpu_set_t = std::mem::zeroed();
                libc::CPU_ZERO(&mut set);
                for cpu in mask.cpu_ids() {
                    libc::CPU_SET(cpu, &mut set);
                }
                libc::sched_setaffinity(tid, std::mem::size_of::<libc::cpu_set_t>(), &set)
            };

            if result == 0 {
                Ok(())
            } else {
                Err(Self::map_errno(pid, std::io::Error::last_os_error()))
            }
        }
    }

    impl Platform for LinuxPlatform {
        fn enumerate_processes(&self) -> Result<Vec<ProcessEntry>> {
            let processes = procfs::process::all_processes()
                .map_err(|e| AffinityError::Enumeration(e.to_string()))?;

            Ok(processes
                .filter_map(|p| p.ok())
                .filter_map(|p| p.stat().ok())
                .map(|stat| ProcessEntry {
                    pid: stat.pid as u32,
                    name: stat.comm,
                    session_id: stat.session.max(0) as u32,
                })
                .collect())
        }

        fn get_affinity(&self, pid: u32) -> Result<AffinityMask> {
            let conversion = self.read_affinity(pid)?;
            if conversion.is_truncated() {
                tracing::warn!(
                    pid,
                    cpus = ?conversion.truncated,
                    "process is allowed on CPUs beyond the 64-bit affinity mask range"
                );
            }
            Ok(conversion.mask)
        }

        fn read_affinity(&self, pid: u32) -> Result<MaskConversion> {
            // SAFETY: see set_thread_affinity; the set is written by the kernel.
            let (result, set) = unsafe {
                let mut set: libc::cpu_set_t = std::mem::zeroed();
                let result = libc::sched_getaffinity(
                    pid as libc::pid_t,
                    std::mem::size_of::<libc::cpu_set_t>(),
                    &mut set,
                );
                (result, set)
            };

            if result != 0 {
                return Err(Self::map_errno(pid, std::io::Error::last_os_error()));
            }

            // SAFETY: every cpu is below CPU_SETSIZE.
            let allowed = (0..libc::CPU_SETSIZE as usize).filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, &set) });
            Ok(AffinityMask::from_cpus(allowed))
        }

        fn set_affinity(&self, pid: u32, mask: AffinityMask) -> Result<()> {
            if mask.is_empty() {
                return Err(AffinityError::EmptySelection);
            }

            let process = procfs::process::Process::new(pid as i32)
                .map_err(|_| AffinityError::ProcessNotFound(pid))?;

            // Linux affinity is per thread; apply to every thread of the process
            let tids: Vec<i32> = match process.tasks() {
                Ok(tasks) => tasks.filter_map(|t| t.ok()).map(|t| t.tid).collect(),
                Err(_) => vec![pid as i32],
            };

            let mut first_error = None;
            let mut applied = 0usize;
            for tid in tids {
                match Self::set_thread_affinity(pid, tid, mask) {
                    Ok(()) => applied += 1,
                    Err(e) => {
                        tracing::debug!(pid, tid, error = %e, "thread affinity update failed");
                        first_error.get_or_insert(e);
                    }
                }
            }

            match first_error {
                Some(e) if applied == 0 => Err(e),
                _ => Ok(()),
            }
        }

        fn discover_topology(&self) -> Result<ProcessorTopology> {
            let logical = Self::online_cpus().unwrap_or_else(num_cpus::get);
            if logical == 0 {
                return Err(AffinityError::TopologyDiscovery(
                    "no logical processors reported".to_string(),
                ));
            }

            let sockets = Self::socket_count(logical).unwrap_or_else(|| {
                tracing::warn!("socket count unavailable, modelling a single NUMA node");
                1
            });

            Ok(ProcessorTopology::from_counts(
                num_cpus::get_physical(),
                logical,
                sockets,
            ))
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory platform for tests

    use super::{Platform, ProcessEntry};
    use crate::affinity::{AffinityMask, MaskConversion};
    use crate::error::{AffinityError, Result};
    use crate::system::ProcessorTopology;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    #[derive(Debug)]
    pub(crate) struct ScriptedPlatform {
        topology: ProcessorTopology,
        topology_error: Mutex<Option<AffinityError>>,
        processes: Vec<ProcessEntry>,
        affinities: Mutex<HashMap<u32, AffinityMask>>,
        wide_cpus: Mutex<HashMap<u32, Vec<usize>>>,
        failing_pids: HashSet<u32>,
        fail_enumeration: bool,
        pub(crate) set_calls: Mutex<Vec<(u32, AffinityMask)>>,
    }

    impl ScriptedPlatform {
        pub(crate) fn new(topology: ProcessorTopology) -> Self {
            Self {
                topology,
                topology_error: Mutex::new(None),
                processes: Vec::new(),
                affinities: Mutex::new(HashMap::new()),
                wide_cpus: Mutex::new(HashMap::new()),
                failing_pids: HashSet::new(),
                fail_enumeration: false,
                set_calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn with_process(mut self, pid: u32, name: &str, session_id: u32, mask: u64) -> Self {
            self.processes.push(ProcessEntry {
                pid,
                name: name.to_string(),
                session_id,
            });
            self.affinities
                .get_mut()
                .unwrap()
                .insert(pid, AffinityMask::from_bits(mask));
            self
        }

        /// Also allow `pid` on CPU ids beyond the mask range
        pub(crate) fn with_wide_cpus(self, pid: u32, cpus: Vec<usize>) -> Self {
            self.wide_cpus.lock().unwrap().insert(pid, cpus);
            self
        }

        pub(crate) fn failing_on(mut self, pid: u32) -> Self {
            self.failing_pids.insert(pid);
            self
        }

        pub(crate) fn with_enumeration_failure(mut self) -> Self {
            self.fail_enumeration = true;
            self
        }

        pub(crate) fn with_topology_error(self, error: AffinityError) -> Self {
            *self.topology_error.lock().unwrap() = Some(error);
            self
        }

        pub(crate) fn affinity_of(&self, pid: u32) -> Option<AffinityMask> {
            self.affinities.lock().unwrap().get(&pid).copied()
        }

        pub(crate) fn set_call_pids(&self) -> Vec<u32> {
            self.set_calls.lock().unwrap().iter().map(|(pid, _)| *pid).collect()
        }
    }

    impl Platform for ScriptedPlatform {
        fn enumerate_processes(&self) -> Result<Vec<ProcessEntry>> {
            if self.fail_enumeration {
                return Err(AffinityError::Enumeration("scripted failure".to_string()));
            }
            Ok(self.processes.clone())
        }

        fn get_affinity(&self, pid: u32) -> Result<AffinityMask> {
            if self.failing_pids.contains(&pid) {
                return Err(AffinityError::access(pid, "access denied"));
            }
            self.affinity_of(pid).ok_or(AffinityError::ProcessNotFound(pid))
        }

        fn read_affinity(&self, pid: u32) -> Result<MaskConversion> {
            let mask = self.get_affinity(pid)?;
            let truncated = self.wide_cpus.lock().unwrap().get(&pid).cloned().unwrap_or_default();
            Ok(MaskConversion { mask, truncated })
        }

        fn set_affinity(&self, pid: u32, mask: AffinityMask) -> Result<()> {
            self.set_calls.lock().unwrap().push((pid, mask));
            if self.failing_pids.contains(&pid) {
                return Err(AffinityError::access(pid, "access denied"));
            }
            let mut affinities = self.affinities.lock().unwrap();
            match affinities.get_mut(&pid) {
                Some(current) => {
                    *current = mask;
                    self.wide_cpus.lock().unwrap().remove(&pid);
                    Ok(())
                }
                None => Err(AffinityError::ProcessNotFound(pid)),
            }
        }

        fn discover_topology(&self) -> Result<ProcessorTopology> {
            match self.topology_error.lock().unwrap().take() {
                Some(e) => Err(e),
                None => Ok(self.topology.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::ScriptedPlatform;
    use super::*;

    #[test]
    fn test_snapshot_skips_unreadable_and_sorts() {
        let platform = ScriptedPlatform::new(ProcessorTopology::from_counts(4, 8, 1))
            .with_process(30, "zeta", 1, 0xF)
            .with_process(10, "alpha", 1, 0xFF)
            .with_process(20, "locked", 0, 0x1)
            .failing_on(20);

        let snapshot = snapshot_processes(&platform).unwrap();
        let names: Vec<&str> = snapshot.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        assert_eq!(snapshot[1].current_affinity.bits(), 0xF);
    }

    #[test]
    fn test_snapshot_propagates_enumeration_failure() {
        let platform =
            ScriptedPlatform::new(ProcessorTopology::single_node(2)).with_enumeration_failure();
        assert!(snapshot_processes(&platform).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_linux_reads_own_affinity() {
        let platform = linux::LinuxPlatform::new();
        let mask = platform.get_affinity(std::process::id()).unwrap();
        assert!(!mask.is_empty());

        let topology = platform.discover_topology().unwrap();
        assert!(topology.logical_processors >= 1);
        assert!(!topology.nodes.is_empty());
    }
}

//! Configuration settings for numa-affinity
//!
//! Defines the CLI arguments, the optional JSON configuration file and the
//! runtime settings resolved from both.

use crate::affinity::DEFAULT_THREADS_PER_CORE;
use crate::error::{AffinityError, IoResultExt, Result};
use crate::policy::SaveTarget;
use crate::system::ProcessorTopology;
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// numa-affinity - NUMA-aware process affinity manager
#[derive(Parser, Debug, Clone)]
#[command(name = "numa-affinity")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "NUMA-aware processor affinity policy engine")]
#[command(long_about = r#"
numa-affinity inspects the processor topology, recommends NUMA-local CPU sets
for server workloads, and keeps per-process affinity rules applied.

Rules are resolved from the rule-table file first, then the machine scope,
then the user scope.

Examples:
  numa-affinity topology                          # Show sockets and NUMA nodes
  numa-affinity recommend sqlservr                # Suggest CPUs for a workload
  numa-affinity apply 4242 --cpus 0-3 --save permanent
  numa-affinity rules set capital 0xF0 --table    # Store a rule-table entry
  numa-affinity watch --interval 10s              # Keep rules applied
"#)]
pub struct CliArgs {
    /// JSON configuration file
    #[arg(long, env = "NUMA_AFFINITY_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Rule-table file
    #[arg(long, value_name = "PATH")]
    pub rules_file: Option<PathBuf>,

    /// Root directory of the machine rule scope
    #[arg(long, value_name = "DIR")]
    pub machine_root: Option<PathBuf>,

    /// Root directory of the user rule scope
    #[arg(long, value_name = "DIR")]
    pub user_root: Option<PathBuf>,

    /// Hardware threads per physical core for collision checks
    #[arg(long, value_name = "NUM")]
    pub threads_per_core: Option<usize>,

    /// Output format for listings
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Emit logs as JSON
    #[arg(long)]
    pub log_json: bool,

    /// Verbose output (-v, -vv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Subcommand
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Show processor topology and NUMA nodes
    #[command(name = "topology")]
    Topology,

    /// List running processes with their affinity
    #[command(name = "processes")]
    Processes {
        /// Only show processes whose name contains this text
        #[arg(short, long)]
        filter: Option<String>,
    },

    /// Classify a process's current mask, or a mask given as text
    #[command(name = "classify")]
    Classify {
        /// Process ID
        #[arg(required_unless_present = "mask")]
        pid: Option<u32>,

        /// Mask text (0x-prefixed hex or decimal)
        #[arg(long, conflicts_with = "pid")]
        mask: Option<String>,
    },

    /// Check a CPU list for hyperthread siblings
    #[command(name = "collisions")]
    Collisions {
        /// CPU list (e.g. 0-3,8)
        cpus: String,
    },

    /// Recommend a CPU set for a process name
    #[command(name = "recommend")]
    Recommend {
        /// Process name
        #[arg(required_unless_present = "pid")]
        name: Option<String>,

        /// Use session-aware placement for this running process
        #[arg(long)]
        pid: Option<u32>,
    },

    /// Apply a CPU selection to a running process
    #[command(name = "apply")]
    Apply {
        /// Process ID
        pid: u32,

        /// CPU list (e.g. 0-3,8)
        #[arg(long, conflicts_with_all = ["mask", "recommended"])]
        cpus: Option<String>,

        /// Mask text (0x-prefixed hex or decimal)
        #[arg(long, conflicts_with = "recommended")]
        mask: Option<String>,

        /// Use the recommended CPU set for the process
        #[arg(long)]
        recommended: bool,

        /// Apply even when CPUs share physical cores
        #[arg(short = 'y', long)]
        yes: bool,

        /// Also store the mask as a rule
        #[arg(long, value_enum, default_value = "none")]
        save: SaveMode,
    },

    /// Manage stored rules
    #[command(name = "rules")]
    Rules {
        /// Rule action
        #[command(subcommand)]
        action: RulesCommand,
    },

    /// Run one reconciliation pass
    #[command(name = "reconcile")]
    Reconcile,

    /// Keep rules applied until interrupted
    #[command(name = "watch")]
    Watch {
        /// Time between passes (e.g. 10s, 1m)
        #[arg(long, value_parser = humantime::parse_duration, value_name = "DURATION")]
        interval: Option<Duration>,
    },
}

/// Rule management actions
#[derive(Subcommand, Debug, Clone)]
pub enum RulesCommand {
    /// List effective rules with their source
    #[command(name = "list")]
    List,

    /// Show the effective rule for a process
    #[command(name = "get")]
    Get {
        /// Process name
        name: String,
    },

    /// Store a rule
    #[command(name = "set")]
    Set {
        /// Process name
        name: String,

        /// Mask text (0x-prefixed hex or decimal)
        mask: String,

        /// Write to the rule table instead of the registry scopes
        #[arg(long)]
        table: bool,
    },

    /// Delete a rule from the registry scopes
    #[command(name = "delete")]
    Delete {
        /// Process name
        name: String,
    },

    /// Delete every rule from the registry scopes
    #[command(name = "clear")]
    Clear {
        /// Do not ask for confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Export effective rules to a JSON file
    #[command(name = "export")]
    Export {
        /// Output file
        path: PathBuf,
    },

    /// Import rules from a JSON file
    #[command(name = "import")]
    Import {
        /// Input file
        path: PathBuf,
    },
}

/// Output format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Rule storage for `apply --save`
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaveMode {
    /// Do not store a rule
    #[default]
    None,
    /// Machine and user scopes
    Permanent,
    /// Rule-table file
    Table,
}

impl From<SaveMode> for SaveTarget {
    fn from(mode: SaveMode) -> Self {
        match mode {
            SaveMode::None => SaveTarget::None,
            SaveMode::Permanent => SaveTarget::Permanent,
            SaveMode::Table => SaveTarget::Table,
        }
    }
}

/// Runtime configuration from the config file and CLI overrides
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Rule-table file
    pub rules_file: PathBuf,
    /// Machine scope root
    pub machine_root: PathBuf,
    /// User scope root
    pub user_root: PathBuf,
    /// Time between reconciliation passes
    #[serde(with = "duration_text")]
    pub interval: Duration,
    /// Hardware threads per physical core for collision checks; inferred
    /// from the topology when unset
    pub threads_per_core: Option<usize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            rules_file: PathBuf::from("/etc/numa-affinity/rules.txt"),
            machine_root: PathBuf::from("/etc"),
            user_root: default_user_root(),
            interval: crate::reconcile::DEFAULT_INTERVAL,
            threads_per_core: None,
        }
    }
}

fn default_user_root() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(dir);
    }
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".config"),
        None => PathBuf::from("."),
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        serde_json::from_str(&content)
            .map_err(|e| AffinityError::config(format!("{}: {}", path.display(), e)))
    }

    /// Build configuration from CLI arguments
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let base = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        let config = base.with_cli_overrides(args);
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI flags over file values
    pub fn with_cli_overrides(mut self, args: &CliArgs) -> Self {
        if let Some(path) = &args.rules_file {
            self.rules_file = path.clone();
        }
        if let Some(root) = &args.machine_root {
            self.machine_root = root.clone();
        }
        if let Some(root) = &args.user_root {
            self.user_root = root.clone();
        }
        if let Some(threads) = args.threads_per_core {
            self.threads_per_core = Some(threads);
        }
        if let Commands::Watch { interval: Some(interval) } = &args.command {
            self.interval = *interval;
        }
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(AffinityError::config("reconcile interval must be greater than zero"));
        }
        if self.threads_per_core == Some(0) {
            return Err(AffinityError::config("threads per core must be at least 1"));
        }
        Ok(())
    }

    /// Threads per core for collision checks on `topology`: the configured
    /// value, else the topology's own ratio, else the default of 2
    pub fn threads_per_core_for(&self, topology: &ProcessorTopology) -> usize {
        self.threads_per_core
            .or_else(|| topology.threads_per_core())
            .filter(|&threads| threads > 0)
            .unwrap_or(DEFAULT_THREADS_PER_CORE)
    }
}

/// Durations as humantime text ("10s", "1m 30s")
mod duration_text {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let text = String::deserialize(deserializer)?;
        humantime::parse_duration(&text).map_err(D::Error::custom)
    }
}

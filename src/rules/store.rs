//! Rule resolution over an ordered list of storage backends
//!
//! The first backend in the list has the highest precedence. The default
//! layout is the rule-table file, then the machine registry scope, then the
//! user registry scope.

use super::normalize::normalize_process_name;
use super::registry::{RegistryScope, RegistryStore};
use super::table::RuleTable;
use crate::affinity::AffinityMask;
use crate::error::{AffinityError, Result, ScopeFailure};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Kind of a rule backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// The rule-table file
    Table,
    /// A registry scope
    Registry(RegistryScope),
}

/// Storage for process rules keyed by normalized name.
///
/// Values are returned raw; the store parses them so that a corrupt value
/// in one backend falls through to the next.
pub trait RuleBackend: Send + Sync + std::fmt::Debug {
    /// Backend name reported as a rule source
    fn name(&self) -> &str;

    /// Backend kind
    fn kind(&self) -> BackendKind;

    /// Raw stored value for a normalized key
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `mask` under a normalized key
    fn set(&self, key: &str, mask: AffinityMask) -> Result<()>;

    /// Remove a key; returns whether anything was removed
    fn delete(&self, key: &str) -> Result<bool>;

    /// Remove every key; returns how many were removed
    fn clear(&self) -> Result<usize>;

    /// All raw entries by normalized key
    fn entries(&self) -> Result<BTreeMap<String, String>>;
}

/// An effective rule and where it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedRule {
    /// Normalized process name
    pub process_name: String,
    /// Affinity mask to apply
    pub mask: AffinityMask,
    /// Backend name
    pub source: String,
}

/// Per-scope outcome of a permanent save
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Scopes that were written
    pub written: Vec<String>,
    /// Scopes that failed
    pub failed: Vec<ScopeFailure>,
}

impl SaveReport {
    /// Whether every scope was written
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Precedence-ordered rule store
#[derive(Debug, Default)]
pub struct RuleStore {
    backends: Vec<Box<dyn RuleBackend>>,
}

impl RuleStore {
    /// Create a store over backends in precedence order
    pub fn new(backends: Vec<Box<dyn RuleBackend>>) -> Self {
        Self { backends }
    }

    /// Standard layout: rule table, machine scope, user scope
    pub fn with_defaults(table_path: impl AsRef<Path>, machine_root: impl AsRef<Path>, user_root: impl AsRef<Path>) -> Self {
        let backends: Vec<Box<dyn RuleBackend>> = vec![
            Box::new(RuleTable::new(table_path.as_ref())),
            Box::new(RegistryStore::new(RegistryScope::Machine, machine_root)),
            Box::new(RegistryStore::new(RegistryScope::User, user_root)),
        ];
        Self::new(backends)
    }

    /// Backend names in precedence order
    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name()).collect()
    }

    fn registry_backends(&self) -> impl Iterator<Item = &Box<dyn RuleBackend>> {
        self.backends
            .iter()
            .filter(|b| matches!(b.kind(), BackendKind::Registry(_)))
    }

    /// Resolve the rule for a process name; the first parseable hit wins
    pub fn get(&self, process_name: &str) -> Option<ResolvedRule> {
        let key = normalize_process_name(process_name);
        if key.is_empty() {
            return None;
        }

        for backend in &self.backends {
            let raw = match backend.get(&key) {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = %e, "rule backend unreadable");
                    continue;
                }
            };
            match AffinityMask::from_hex_value(&raw) {
                Ok(mask) => {
                    return Some(ResolvedRule {
                        process_name: key,
                        mask,
                        source: backend.name().to_string(),
                    })
                }
                Err(e) => {
                    tracing::warn!(backend = backend.name(), process = %key, error = %e, "ignoring unparseable rule");
                }
            }
        }
        None
    }

    /// Effective rules of every backend merged by precedence
    pub fn resolve_all(&self) -> BTreeMap<String, ResolvedRule> {
        let mut resolved = BTreeMap::new();
        for backend in &self.backends {
            let entries = match backend.entries() {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(backend = backend.name(), error = %e, "rule backend unreadable");
                    continue;
                }
            };
            for (key, raw) in entries {
                if resolved.contains_key(&key) {
                    continue;
                }
                match AffinityMask::from_hex_value(&raw) {
                    Ok(mask) => {
                        resolved.insert(
                            key.clone(),
                            ResolvedRule {
                                process_name: key,
                                mask,
                                source: backend.name().to_string(),
                            },
                        );
                    }
                    Err(e) => {
                        tracing::warn!(backend = backend.name(), process = %key, error = %e, "ignoring unparseable rule");
                    }
                }
            }
        }
        resolved
    }

    /// Effective rules sorted by process name
    pub fn list(&self) -> Vec<ResolvedRule> {
        self.resolve_all().into_values().collect()
    }

    /// Write `mask` to every registry scope.
    ///
    /// Succeeds when at least one scope was written; the report names the
    /// scopes that failed. The rule table is not touched.
    pub fn save_permanent(&self, process_name: &str, mask: AffinityMask) -> Result<SaveReport> {
        let key = checked_key(process_name)?;
        let mut report = SaveReport::default();

        for backend in self.registry_backends() {
            match backend.set(&key, mask) {
                Ok(()) => report.written.push(backend.name().to_string()),
                Err(e) => {
                    tracing::warn!(scope = backend.name(), process = %key, error = %e, "scope write failed");
                    report.failed.push(ScopeFailure {
                        scope: backend.name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        if report.written.is_empty() {
            if report.failed.is_empty() {
                return Err(AffinityError::persistence("registry", "no registry scope configured"));
            }
            return Err(AffinityError::Persistence {
                failures: report.failed,
            });
        }

        tracing::info!(process = %key, mask = %mask, scopes = ?report.written, "rule saved");
        Ok(report)
    }

    /// Write `mask` to the rule table
    pub fn save_to_table(&self, process_name: &str, mask: AffinityMask) -> Result<()> {
        let key = checked_key(process_name)?;
        let table = self
            .backends
            .iter()
            .find(|b| b.kind() == BackendKind::Table)
            .ok_or_else(|| AffinityError::persistence("rule-table", "no rule table configured"))?;

        table
            .set(&key, mask)
            .map_err(|e| AffinityError::persistence(table.name(), e.to_string()))?;
        tracing::info!(process = %key, mask = %mask, "rule saved to table");
        Ok(())
    }

    /// Remove a rule from every registry scope; returns how many scopes
    /// held it
    pub fn delete(&self, process_name: &str) -> Result<usize> {
        let key = checked_key(process_name)?;
        self.for_each_scope(|backend| backend.delete(&key).map(usize::from))
    }

    /// Remove every rule from every registry scope; returns the number of
    /// entries removed
    pub fn delete_all(&self) -> Result<usize> {
        self.for_each_scope(|backend| backend.clear())
    }

    fn for_each_scope<F>(&self, mut op: F) -> Result<usize>
    where
        F: FnMut(&dyn RuleBackend) -> Result<usize>,
    {
        let mut total = 0;
        let mut failures = Vec::new();
        for backend in self.registry_backends() {
            match op(backend.as_ref()) {
                Ok(n) => total += n,
                Err(e) => failures.push(ScopeFailure {
                    scope: backend.name().to_string(),
                    message: e.to_string(),
                }),
            }
        }

        if failures.is_empty() {
            Ok(total)
        } else {
            Err(AffinityError::Persistence { failures })
        }
    }
}

fn checked_key(process_name: &str) -> Result<String> {
    let key = normalize_process_name(process_name);
    if key.is_empty() {
        return Err(AffinityError::format(process_name, "empty process name"));
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> RuleStore {
        RuleStore::with_defaults(
            dir.path().join("rules.txt"),
            dir.path().join("machine"),
            dir.path().join("user"),
        )
    }

    #[test]
    fn test_table_wins_over_registry() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        assert!(store.save_permanent("SqlServr.exe", AffinityMask::from_bits(0xF0)).unwrap().is_complete());
        assert_eq!(store.get("sqlservr").unwrap().source, "machine");

        store.save_to_table("sqlservr", AffinityMask::from_bits(0x0F)).unwrap();
        let rule = store.get("SQLSERVR.EXE").unwrap();
        assert_eq!(rule.mask.bits(), 0x0F);
        assert_eq!(rule.source, "rule-table");
    }

    #[test]
    fn test_unparseable_value_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        std::fs::write(dir.path().join("rules.txt"), "capital=XYZ\n").unwrap();
        store.save_permanent("capital", AffinityMask::from_bits(0x3)).unwrap();

        let rule = store.get("capital").unwrap();
        assert_eq!(rule.source, "machine");
        assert_eq!(store.list()[0].source, "machine");
    }

    #[test]
    fn test_save_permanent_is_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        // A file where the machine root directory should be
        let blocked = dir.path().join("machine");
        std::fs::write(&blocked, "not a directory").unwrap();
        let store = store_in(&dir);

        let report = store.save_permanent("app", AffinityMask::from_bits(0x1)).unwrap();
        assert_eq!(report.written, vec!["user".to_string()]);
        assert!(!report.is_complete());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].scope, "machine");
        assert_eq!(store.get("app").unwrap().source, "user");
    }

    #[test]
    fn test_save_permanent_fails_when_all_scopes_fail() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("machine"), "x").unwrap();
        std::fs::write(dir.path().join("user"), "x").unwrap();
        let store = store_in(&dir);

        match store.save_permanent("app", AffinityMask::from_bits(0x1)) {
            Err(AffinityError::Persistence { failures }) => assert_eq!(failures.len(), 2),
            other => panic!("expected persistence error, got {:?}", other),
        }
    }

    #[test]
    fn test_delete_leaves_table_alone() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save_permanent("app", AffinityMask::from_bits(0x1)).unwrap();
        store.save_to_table("app", AffinityMask::from_bits(0x2)).unwrap();

        assert_eq!(store.delete("app.exe").unwrap(), 2);
        assert_eq!(store.delete("app").unwrap(), 0);
        assert_eq!(store.get("app").unwrap().source, "rule-table");

        store.save_permanent("other", AffinityMask::from_bits(0x4)).unwrap();
        assert_eq!(store.delete_all().unwrap(), 2);
        assert_eq!(store.delete_all().unwrap(), 0);
    }

    #[test]
    fn test_get_agrees_with_list_for_foreign_key_spelling() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        let scope_dir = dir.path().join("machine").join("numa-affinity");
        std::fs::create_dir_all(&scope_dir).unwrap();
        std::fs::write(scope_dir.join("process-affinity.json"), r#"{"Capital.EXE": "F"}"#).unwrap();

        assert_eq!(store.list()[0].process_name, "capital");
        let rule = store.get("capital").unwrap();
        assert_eq!((rule.mask.bits(), rule.source.as_str()), (0xF, "machine"));
        assert_eq!(store.get("CAPITAL.exe"), Some(rule));
    }

    #[test]
    fn test_list_merges_with_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);
        store.save_permanent("a", AffinityMask::from_bits(0x1)).unwrap();
        store.save_permanent("b", AffinityMask::from_bits(0x2)).unwrap();
        store.save_to_table("b", AffinityMask::from_bits(0x3)).unwrap();

        let rules = store.list();
        assert_eq!(rules.len(), 2);
        assert_eq!((rules[0].process_name.as_str(), rules[0].source.as_str()), ("a", "machine"));
        assert_eq!((rules[1].process_name.as_str(), rules[1].mask.bits()), ("b", 0x3));
        assert_eq!(store.backend_names(), vec!["rule-table", "machine", "user"]);
    }
}

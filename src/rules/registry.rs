//! Registry-equivalent rule scopes
//!
//! Each scope is a JSON object of process name to uppercase hex mask stored
//! under `<root>/numa-affinity/process-affinity.json`. Keys written by other
//! tools may keep their `.exe` suffix or mixed case, so lookups match on the
//! normalized name and prefer the exact key.

use super::normalize::{normalize_process_name, replace_file};
use super::store::{BackendKind, RuleBackend};
use crate::affinity::AffinityMask;
use crate::error::{IoResultExt, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Fixed logical location of the rules below a scope root
pub const REGISTRY_SUBPATH: &str = "numa-affinity/process-affinity.json";

/// Which registry scope a store represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryScope {
    /// Machine-wide rules
    Machine,
    /// Per-user rules
    User,
}

impl RegistryScope {
    /// Backend name of the scope
    pub fn name(&self) -> &'static str {
        match self {
            Self::Machine => "machine",
            Self::User => "user",
        }
    }
}

/// One registry scope rooted at a directory
#[derive(Debug, Clone)]
pub struct RegistryStore {
    scope: RegistryScope,
    path: PathBuf,
}

impl RegistryStore {
    /// Open the scope below `root`
    pub fn new(scope: RegistryScope, root: impl AsRef<Path>) -> Self {
        Self {
            scope,
            path: root.as_ref().join(REGISTRY_SUBPATH),
        }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e).with_path(&self.path),
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn store(&self, values: &BTreeMap<String, String>) -> Result<()> {
        let json = serde_json::to_string_pretty(values)?;
        replace_file(&self.path, &json)
    }

    /// Keys in `values` that refer to the same process as `key`
    fn matching_keys(values: &BTreeMap<String, String>, key: &str) -> Vec<String> {
        values
            .keys()
            .filter(|k| normalize_process_name(k) == key)
            .cloned()
            .collect()
    }

    /// Value stored for `key`: the exact key, then `key.exe`, then the first
    /// key that normalizes to `key`
    fn lookup<'a>(values: &'a BTreeMap<String, String>, key: &str) -> Option<&'a String> {
        values
            .get(key)
            .or_else(|| values.get(&format!("{}.exe", key)))
            .or_else(|| {
                values
                    .iter()
                    .find(|(k, _)| normalize_process_name(k) == key)
                    .map(|(_, v)| v)
            })
    }
}

impl RuleBackend for RegistryStore {
    fn name(&self) -> &str {
        self.scope.name()
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Registry(self.scope)
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.load()?;
        Ok(Self::lookup(&values, key).cloned())
    }

    fn set(&self, key: &str, mask: AffinityMask) -> Result<()> {
        let mut values = self.load()?;
        for stale in Self::matching_keys(&values, key) {
            values.remove(&stale);
        }
        values.insert(key.to_string(), mask.to_hex_value());
        self.store(&values)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut values = self.load()?;
        let keys = Self::matching_keys(&values, key);
        if keys.is_empty() {
            return Ok(false);
        }
        for k in keys {
            values.remove(&k);
        }
        self.store(&values)?;
        Ok(true)
    }

    fn clear(&self) -> Result<usize> {
        let values = self.load()?;
        if values.is_empty() {
            return Ok(0);
        }
        self.store(&BTreeMap::new())?;
        Ok(values.len())
    }

    fn entries(&self) -> Result<BTreeMap<String, String>> {
        let values = self.load()?;
        let names: BTreeSet<String> = values.keys().map(|k| normalize_process_name(k)).collect();
        Ok(names
            .into_iter()
            .filter_map(|name| Self::lookup(&values, &name).cloned().map(|value| (name, value)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_and_uppercase_values() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(RegistryScope::Machine, dir.path());
        store.set("sqlservr", AffinityMask::from_bits(0xf000)).unwrap();

        let path = dir.path().join("numa-affinity").join("process-affinity.json");
        let raw: BTreeMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(raw["sqlservr"], "F000");
    }

    #[test]
    fn test_get_tries_exe_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(RegistryScope::User, dir.path());
        std::fs::create_dir_all(dir.path().join("numa-affinity")).unwrap();
        std::fs::write(store.path(), r#"{"capital.exe": "0F"}"#).unwrap();

        assert_eq!(store.get("capital").unwrap().as_deref(), Some("0F"));
        assert_eq!(store.entries().unwrap()["capital"], "0F");

        // Saving replaces the suffixed key
        store.set("capital", AffinityMask::from_bits(0xF0)).unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("capital.exe"));
    }

    #[test]
    fn test_mixed_case_key_is_visible_to_get_and_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(RegistryScope::Machine, dir.path());
        std::fs::create_dir_all(dir.path().join("numa-affinity")).unwrap();
        std::fs::write(store.path(), r#"{"Capital.EXE": "F"}"#).unwrap();

        assert_eq!(store.get("capital").unwrap().as_deref(), Some("F"));
        assert_eq!(store.entries().unwrap()["capital"], "F");
        assert_eq!(store.kind(), BackendKind::Registry(RegistryScope::Machine));
    }

    #[test]
    fn test_exact_key_wins_over_other_spellings() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(RegistryScope::User, dir.path());
        std::fs::create_dir_all(dir.path().join("numa-affinity")).unwrap();
        std::fs::write(store.path(), r#"{"Capital.EXE": "F", "capital": "3"}"#).unwrap();

        assert_eq!(store.get("capital").unwrap().as_deref(), Some("3"));
        assert_eq!(store.entries().unwrap()["capital"], "3");
    }

    #[test]
    fn test_delete_and_clear_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = RegistryStore::new(RegistryScope::User, dir.path());
        store.set("a", AffinityMask::from_bits(1)).unwrap();
        store.set("b", AffinityMask::from_bits(2)).unwrap();

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert_eq!(store.clear().unwrap(), 1);
        assert_eq!(store.clear().unwrap(), 0);
    }
}

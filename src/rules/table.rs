//! Rule-table file backend
//!
//! A plain text file with one `process=HEXMASK` rule per line. Lines starting
//! with `#` are comments, blank and malformed lines are ignored. Writes
//! rewrite the whole file sorted by key under a fixed header.

use super::normalize::{normalize_process_name, replace_file};
use super::store::{BackendKind, RuleBackend};
use crate::affinity::AffinityMask;
use crate::error::{IoResultExt, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const HEADER: &str = "# process=HEXMASK\n# example: sqlservr=0000000F\n";

/// File-backed rule table
#[derive(Debug, Clone)]
pub struct RuleTable {
    path: PathBuf,
}

impl RuleTable {
    /// Open a rule table at `path`; the file need not exist yet
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all raw entries. A missing file is an empty table.
    pub fn read_raw(&self) -> Result<BTreeMap<String, String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e).with_path(&self.path),
        };
        Ok(parse_table(&content))
    }

    fn write_raw(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        replace_file(&self.path, &render_table(entries))
    }
}

/// Parse rule-table text into normalized keys and raw values
pub fn parse_table(content: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = normalize_process_name(key);
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        entries.insert(key, value.to_string());
    }
    entries
}

/// Render entries sorted by key under the table header
pub fn render_table(entries: &BTreeMap<String, String>) -> String {
    let mut out = String::from(HEADER);
    for (key, value) in entries {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    out
}

impl RuleBackend for RuleTable {
    fn name(&self) -> &str {
        "rule-table"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Table
    }

    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_raw()?.remove(key))
    }

    fn set(&self, key: &str, mask: AffinityMask) -> Result<()> {
        let mut entries = self.read_raw()?;
        entries.insert(key.to_string(), mask.to_hex_value());
        self.write_raw(&entries)
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let mut entries = self.read_raw()?;
        if entries.remove(key).is_none() {
            return Ok(false);
        }
        self.write_raw(&entries)?;
        Ok(true)
    }

    fn clear(&self) -> Result<usize> {
        let entries = self.read_raw()?;
        if entries.is_empty() {
            return Ok(0);
        }
        self.write_raw(&BTreeMap::new())?;
        Ok(entries.len())
    }

    fn entries(&self) -> Result<BTreeMap<String, String>> {
        self.read_raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_malformed_lines() {
        let entries = parse_table(
            "# comment\n\nSqlServr.exe = 0000000F\nno-equals-sign\n=FF\nweb=\n  capital=F0  \n",
        );
        assert_eq!(entries.len(), 2);
        assert_eq!(entries["sqlservr"], "0000000F");
        assert_eq!(entries["capital"], "F0");
    }

    #[test]
    fn test_writes_sorted_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let table = RuleTable::new(dir.path().join("rules.txt"));
        table.set("zeta", AffinityMask::from_bits(0x3)).unwrap();
        table.set("alpha", AffinityMask::from_bits(0xF0)).unwrap();

        let content = std::fs::read_to_string(table.path()).unwrap();
        assert_eq!(
            content,
            "# process=HEXMASK\n# example: sqlservr=0000000F\nalpha=F0\nzeta=3\n"
        );
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let table = RuleTable::new(dir.path().join("absent.txt"));
        assert!(table.entries().unwrap().is_empty());
        assert_eq!(table.get("x").unwrap(), None);
        assert!(!table.delete("x").unwrap());
        assert_eq!(table.clear().unwrap(), 0);
    }
}

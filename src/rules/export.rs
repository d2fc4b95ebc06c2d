//! Rule export and import as JSON

use super::store::{ResolvedRule, RuleStore};
use crate::affinity::AffinityMask;
use crate::error::{AffinityError, IoResultExt, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One exported rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRecord {
    /// Normalized process name
    pub process_name: String,
    /// Mask as uppercase hex without prefix
    pub mask_hex: String,
    /// Mask as an integer
    pub mask: u64,
    /// CPU ids in the mask
    pub cpu_ids: Vec<usize>,
    /// Number of CPUs in the mask
    pub cpu_count: usize,
    /// When the record was exported
    pub timestamp: DateTime<Utc>,
    /// Backend the rule came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl ExportRecord {
    /// Build a record from an effective rule
    pub fn from_rule(rule: &ResolvedRule, timestamp: DateTime<Utc>) -> Self {
        Self {
            process_name: rule.process_name.clone(),
            mask_hex: rule.mask.to_hex_value(),
            mask: rule.mask.bits(),
            cpu_ids: rule.mask.cpu_ids(),
            cpu_count: rule.mask.count(),
            timestamp,
            source: Some(rule.source.clone()),
        }
    }

    /// Mask carried by the record; the hex form is authoritative
    pub fn affinity_mask(&self) -> Result<AffinityMask> {
        AffinityMask::from_hex_value(&self.mask_hex)
    }
}

/// Outcome of an import
#[derive(Debug, Clone, Default)]
pub struct ImportReport {
    /// Process names written
    pub imported: Vec<String>,
    /// Records that could not be imported
    pub failed: Vec<(String, String)>,
}

/// Export every effective rule
pub fn export_rules(store: &RuleStore) -> Vec<ExportRecord> {
    let now = Utc::now();
    store
        .list()
        .iter()
        .map(|rule| ExportRecord::from_rule(rule, now))
        .collect()
}

/// Export every effective rule to a JSON file; returns the record count
pub fn export_to_file(store: &RuleStore, path: &Path) -> Result<usize> {
    let records = export_rules(store);
    let json = serde_json::to_string_pretty(&records)?;
    std::fs::write(path, json).with_path(path)?;
    tracing::info!(path = %path.display(), count = records.len(), "rules exported");
    Ok(records.len())
}

/// Import records, overwriting same-named rules in the registry scopes
pub fn import_records(store: &RuleStore, records: &[ExportRecord]) -> ImportReport {
    let mut report = ImportReport::default();
    for record in records {
        let result = record
            .affinity_mask()
            .and_then(|mask| store.save_permanent(&record.process_name, mask));
        match result {
            Ok(_) => report.imported.push(record.process_name.clone()),
            Err(e) => {
                tracing::warn!(process = %record.process_name, error = %e, "rule import failed");
                report.failed.push((record.process_name.clone(), e.to_string()));
            }
        }
    }
    report
}

/// Import records from a JSON file
pub fn import_from_file(store: &RuleStore, path: &Path) -> Result<ImportReport> {
    let content = std::fs::read_to_string(path).with_path(path)?;
    let records: Vec<ExportRecord> = serde_json::from_str(&content)
        .map_err(|e| AffinityError::Serialization(format!("{}: {}", path.display(), e)))?;

    let report = import_records(store, &records);
    tracing::info!(
        path = %path.display(),
        imported = report.imported.len(),
        failed = report.failed.len(),
        "rules imported"
    );
    Ok(report)
}

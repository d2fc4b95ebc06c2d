//! Workload classification by process name

use crate::rules::normalize_process_name;
use serde::{Deserialize, Serialize};

/// Database server keywords
pub const DATABASE_KEYWORDS: &[&str] = &["sql", "oracle", "postgres", "mysql", "db2", "sybase"];

/// Web server keywords
pub const WEB_KEYWORDS: &[&str] = &["iis", "apache", "nginx", "tomcat", "weblogic", "websphere"];

/// Report server keywords
pub const REPORT_KEYWORDS: &[&str] = &["report", "crystal", "ssrs", "cognos", "businessobjects"];

/// Application platform keywords, including site-specific products
pub const APPLICATION_KEYWORDS: &[&str] = &[
    "sap",
    "oracle",
    "dynamics",
    "netsuite",
    "capital",
    "labsmobile",
];

/// Inferred workload class of a process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadClass {
    /// Database engines
    DatabaseServer,
    /// Application platforms (ERP and similar)
    ApplicationServer,
    /// Web and servlet servers
    WebServer,
    /// Reporting services
    ReportServer,
    /// Anything else
    #[default]
    Default,
}

impl WorkloadClass {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::DatabaseServer => "Database server",
            Self::ApplicationServer => "Application server",
            Self::WebServer => "Web server",
            Self::ReportServer => "Report server",
            Self::Default => "Default",
        }
    }
}

/// Classify a process by case-insensitive keyword match on its name.
///
/// Keyword sets are checked in the order database, web, report, application
/// and the first match wins. `oracle` appears in both the database and the
/// application sets, so it always classifies as a database server.
pub fn classify_workload(process_name: &str) -> WorkloadClass {
    let name = normalize_process_name(process_name);
    let matches = |keywords: &[&str]| keywords.iter().any(|k| name.contains(k));

    if matches(DATABASE_KEYWORDS) {
        WorkloadClass::DatabaseServer
    } else if matches(WEB_KEYWORDS) {
        WorkloadClass::WebServer
    } else if matches(REPORT_KEYWORDS) {
        WorkloadClass::ReportServer
    } else if matches(APPLICATION_KEYWORDS) {
        WorkloadClass::ApplicationServer
    } else {
        WorkloadClass::Default
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_classes() {
        assert_eq!(classify_workload("sqlservr.exe"), WorkloadClass::DatabaseServer);
        assert_eq!(classify_workload("Postgres"), WorkloadClass::DatabaseServer);
        assert_eq!(classify_workload("nginx"), WorkloadClass::WebServer);
        assert_eq!(classify_workload("ReportingServicesService"), WorkloadClass::ReportServer);
        assert_eq!(classify_workload("SAPgui.EXE"), WorkloadClass::ApplicationServer);
        assert_eq!(classify_workload("capital"), WorkloadClass::ApplicationServer);
        assert_eq!(classify_workload("bash"), WorkloadClass::Default);
    }

    #[test]
    fn test_oracle_resolves_to_database() {
        assert_eq!(classify_workload("oracle"), WorkloadClass::DatabaseServer);
    }

    #[test]
    fn test_earlier_sets_win() {
        // "mysql" is a database keyword even inside a web-ish name
        assert_eq!(classify_workload("apache-mysql-proxy"), WorkloadClass::DatabaseServer);
        assert_eq!(classify_workload("tomcat-report"), WorkloadClass::WebServer);
    }
}

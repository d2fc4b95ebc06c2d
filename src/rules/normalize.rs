//! Rule key normalization and file replacement

use crate::error::{IoResultExt, Result};
use std::io::Write;
use std::path::Path;

/// Normalize a process name into a rule key: trimmed, lower-case, without a
/// trailing `.exe`
pub fn normalize_process_name(name: &str) -> String {
    let lower = name.trim().to_lowercase();
    match lower.strip_suffix(".exe") {
        Some(stem) => stem.trim_end().to_string(),
        None => lower,
    }
}

/// Replace `path` with `contents` through a sibling temp file and a rename
pub(crate) fn replace_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_path(parent)?;
        }
    }

    let temp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&temp_path).with_path(&temp_path)?;
        file.write_all(contents.as_bytes()).with_path(&temp_path)?;
        file.sync_all().with_path(&temp_path)?;
    }

    std::fs::rename(&temp_path, path).with_path(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize_process_name("  SqlServr.EXE "), "sqlservr");
        assert_eq!(normalize_process_name("capital"), "capital");
        assert_eq!(normalize_process_name("my.exe.tool"), "my.exe.tool");
        assert_eq!(normalize_process_name(""), "");
    }

    #[test]
    fn test_replace_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/rules.txt");
        replace_file(&path, "x=1\n").unwrap();
        replace_file(&path, "x=2\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "x=2\n");
        assert!(!path.with_extension("tmp").exists());
    }
}

//! Source-write safety: protected paths, backups, git checkpoints, and
//! post-write validation with rollback.
//!
//! Every source write runs the same pipeline: refuse protected paths,
//! copy the current file to a timestamped backup, drop a git checkpoint
//! tag (best-effort), write, then validate machine-checkable formats. A
//! failed validation restores the backup.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{info, warn};

use archi_types::{ArchiError, Result};

/// Files the executor must never modify: the execution engine itself,
/// the safety policy, and the prime directive.
pub const PROTECTED_PATHS: &[&str] = &[
    "crates/archi-core/src/executor/mod.rs",
    "crates/archi-core/src/safety.rs",
    "config/prime_directive.txt",
];

/// Reject writes to protected paths (exact or suffix match).
pub fn check_protected(relative: &str) -> Result<()> {
    let rel = relative.trim_start_matches('/').replace('\\', "/");
    for protected in PROTECTED_PATHS {
        if rel == *protected || rel.ends_with(&format!("/{protected}")) {
            return Err(ArchiError::SecurityViolation {
                reason: format!("protected file cannot be modified: {protected}"),
            });
        }
    }
    Ok(())
}

/// Copy the current file contents to
/// `data/source_backups/<flattened>.<timestamp>.bak`.
///
/// Returns the backup path, or `None` when there was nothing to back up.
pub fn backup_file(project_root: &Path, data_dir: &Path, full_path: &Path) -> Option<PathBuf> {
    if !full_path.exists() {
        return None;
    }
    let backup_dir = data_dir.join("source_backups");
    if let Err(e) = std::fs::create_dir_all(&backup_dir) {
        warn!(error = %e, "backup dir unavailable");
        return None;
    }

    let rel = full_path
        .strip_prefix(project_root)
        .unwrap_or(full_path)
        .to_string_lossy()
        .replace(['/', '\\'], "__");
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    let backup_path = backup_dir.join(format!("{rel}.{timestamp}.bak"));

    match std::fs::copy(full_path, &backup_path) {
        Ok(_) => Some(backup_path),
        Err(e) => {
            warn!(path = %full_path.display(), error = %e, "backup failed");
            None
        }
    }
}

/// Restore a file from its backup.
pub fn restore_backup(backup: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::copy(backup, target).map(|_| ())
}

/// Create a lightweight git checkpoint tag. Best-effort: outside a git
/// repository (or without git on PATH) this silently does nothing.
pub async fn git_checkpoint(project_root: &Path) -> Option<String> {
    let tag = format!("archi-checkpoint-{}", Local::now().format("%Y%m%d-%H%M%S"));
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(project_root)
        .args(["tag", &tag])
        .output()
        .await
        .ok()?;
    if output.status.success() {
        info!(tag = %tag, "git checkpoint created");
        Some(tag)
    } else {
        None
    }
}

/// Roll the working tree back to a checkpoint tag. Best-effort.
pub async fn git_rollback(project_root: &Path, tag: &str) -> bool {
    let output = tokio::process::Command::new("git")
        .arg("-C")
        .arg(project_root)
        .args(["checkout", tag, "--", "."])
        .output()
        .await;
    matches!(output, Ok(out) if out.status.success())
}

/// Validate a freshly written file when its format is machine-checkable.
///
/// JSON, YAML, and TOML are parsed; other extensions are accepted as-is.
/// Returns `None` on success, or an error description.
pub fn syntax_check(path: &Path) -> Option<String> {
    let ext = path.extension()?.to_str()?;
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) => return Some(format!("unreadable after write: {e}")),
    };
    match ext {
        "json" => serde_json::from_str::<serde_json::Value>(&text)
            .err()
            .map(|e| format!("invalid JSON: {e}")),
        "yaml" | "yml" => serde_yaml::from_str::<serde_yaml::Value>(&text)
            .err()
            .map(|e| format!("invalid YAML: {e}")),
        "toml" => text
            .parse::<toml::Value>()
            .err()
            .map(|e| format!("invalid TOML: {e}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protected_paths_rejected() {
        assert!(check_protected("config/prime_directive.txt").is_err());
        assert!(check_protected("/config/prime_directive.txt").is_err());
        assert!(check_protected("nested/config/prime_directive.txt").is_err());
        assert!(check_protected("crates/archi-core/src/safety.rs").is_err());
        assert!(check_protected("src/other.rs").is_ok());
    }

    #[test]
    fn backup_roundtrip() {
        let project = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let file = project.path().join("src").join("lib.rs");
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, "original").unwrap();

        let backup = backup_file(project.path(), data.path(), &file).unwrap();
        assert!(backup.to_string_lossy().contains("src__lib.rs"));

        std::fs::write(&file, "clobbered").unwrap();
        restore_backup(&backup, &file).unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "original");
    }

    #[test]
    fn backup_of_missing_file_is_none() {
        let project = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        assert!(backup_file(project.path(), data.path(), &project.path().join("nope.rs")).is_none());
    }

    #[test]
    fn syntax_check_json_yaml_toml() {
        let dir = tempfile::tempdir().unwrap();

        let good = dir.path().join("ok.json");
        std::fs::write(&good, r#"{"a": 1}"#).unwrap();
        assert!(syntax_check(&good).is_none());

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{nope").unwrap();
        assert!(syntax_check(&bad).unwrap().contains("invalid JSON"));

        let bad_yaml = dir.path().join("bad.yaml");
        std::fs::write(&bad_yaml, "key: [unclosed").unwrap();
        assert!(syntax_check(&bad_yaml).unwrap().contains("invalid YAML"));

        let bad_toml = dir.path().join("bad.toml");
        std::fs::write(&bad_toml, "key = ").unwrap();
        assert!(syntax_check(&bad_toml).unwrap().contains("invalid TOML"));
    }

    #[test]
    fn syntax_check_skips_other_formats() {
        let dir = tempfile::tempdir().unwrap();
        let text = dir.path().join("notes.md");
        std::fs::write(&text, "anything { goes").unwrap();
        assert!(syntax_check(&text).is_none());
    }
}

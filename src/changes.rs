//! Code change manager: diffs, timestamped backups, apply/restore and the
//! optional git branch + commit around a refactoring.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::scanner::write_file_checked;

const BACKUP_STAMP: &str = "%Y%m%d_%H%M%S";

/// Unified diff with three lines of context and `a/`, `b/` headers. Identical
/// inputs give an empty string.
pub fn unified_diff(name: &str, original: &str, new: &str) -> String {
    if original == new {
        return String::new();
    }
    TextDiff::from_lines(original, new)
        .unified_diff()
        .context_radius(3)
        .header(&format!("a/{name}"), &format!("b/{name}"))
        .to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeChange {
    pub file_path: PathBuf,
    pub original: String,
    pub new: String,
    pub description: String,
    pub change_type: String,
    pub timestamp: DateTime<Local>,
    pub diff: String,
}

impl CodeChange {
    pub fn new(file_path: &Path, original: &str, new: &str, description: &str, change_type: &str) -> Self {
        let name = file_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.display().to_string());
        Self {
            file_path: file_path.to_path_buf(),
            original: original.to_string(),
            new: new.to_string(),
            description: description.to_string(),
            change_type: change_type.to_string(),
            timestamp: Local::now(),
            diff: unified_diff(&name, original, new),
        }
    }

    pub fn is_noop(&self) -> bool {
        self.diff.is_empty()
    }
}

/// A backup directory and the time it was taken, when the name is a stamp.
#[derive(Debug, Clone, PartialEq)]
pub struct BackupEntry {
    pub dir: PathBuf,
    pub label: String,
    pub taken_at: Option<NaiveDateTime>,
}

pub struct CodeChangeManager {
    project_root: PathBuf,
    backup_dir: PathBuf,
    applied: Vec<CodeChange>,
}

impl CodeChangeManager {
    pub fn new(project_root: &Path, backup_dir: &Path) -> Self {
        let backup_dir = if backup_dir.is_absolute() {
            backup_dir.to_path_buf()
        } else {
            project_root.join(backup_dir)
        };
        Self {
            project_root: project_root.to_path_buf(),
            backup_dir,
            applied: Vec::new(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn applied_changes(&self) -> &[CodeChange] {
        &self.applied
    }

    fn relative(&self, file: &Path) -> PathBuf {
        file.strip_prefix(&self.project_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| {
                file.file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| file.to_path_buf())
            })
    }

    /// Copy `file` to `<backup_dir>/<stamp>/<relative path>`.
    pub fn create_backup(&self, file: &Path) -> Result<PathBuf> {
        if !file.is_file() {
            bail!("Cannot back up missing file: {}", file.display());
        }
        let stamp = Local::now().format(BACKUP_STAMP).to_string();
        let target = self.backup_dir.join(stamp).join(self.relative(file));
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create backup directory: {parent:?}"))?;
        }
        fs::copy(file, &target).with_context(|| format!("Failed to back up {}", file.display()))?;
        info!("Backed up {} to {}", file.display(), target.display());
        Ok(target)
    }

    /// Write the change to disk, taking a backup first when `backup` is set.
    /// Returns the backup path.
    pub fn apply_change(&mut self, change: CodeChange, backup: bool) -> Result<Option<PathBuf>> {
        if !change.file_path.is_file() {
            bail!("File does not exist: {}", change.file_path.display());
        }
        let backup_path = if backup {
            Some(self.create_backup(&change.file_path)?)
        } else {
            None
        };

        write_file_checked(&change.file_path, &change.new)?;
        info!("Applied {} to {}", change.change_type, change.file_path.display());
        self.applied.push(change);
        Ok(backup_path)
    }

    /// Non-destructive mode: write `<stem>_<kind>_<stamp>.py` next to `file`.
    pub fn write_alongside(&self, file: &Path, kind: &str, content: &str) -> Result<PathBuf> {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .context("File has no name")?;
        let kind: String = kind
            .to_lowercase()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let stamp = Local::now().format(BACKUP_STAMP);
        let target = file.with_file_name(format!("{stem}_{kind}_{stamp}.py"));
        write_file_checked(&target, content)?;
        Ok(target)
    }

    /// Backup directories, newest first.
    pub fn list_backups(&self) -> Result<Vec<BackupEntry>> {
        if !self.backup_dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries: Vec<BackupEntry> = fs::read_dir(&self.backup_dir)
            .with_context(|| format!("Failed to read {}", self.backup_dir.display()))?
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| {
                let label = e.file_name().to_string_lossy().to_string();
                BackupEntry {
                    taken_at: NaiveDateTime::parse_from_str(&label, BACKUP_STAMP).ok(),
                    dir: e.path(),
                    label,
                }
            })
            .collect();

        // Timestamped backups newest first, hand-named directories after them.
        entries.sort_by(|a, b| {
            (b.taken_at.is_some(), &b.label).cmp(&(a.taken_at.is_some(), &a.label))
        });
        Ok(entries)
    }

    /// Copy every file of a backup back to its project-relative path.
    /// `dir` is either a path or a backup directory name.
    pub fn restore_backup(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let source = if dir.is_dir() {
            dir.to_path_buf()
        } else {
            self.backup_dir.join(dir)
        };
        if !source.is_dir() {
            bail!("Backup not found: {}", dir.display());
        }

        let mut restored = Vec::new();
        for entry in WalkDir::new(&source).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry.path().strip_prefix(&source)?;
            let target = self.project_root.join(rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to restore {}", target.display()))?;
            debug!("Restored {}", target.display());
            restored.push(target);
        }
        Ok(restored)
    }

    pub fn git(&self) -> GitRepo {
        GitRepo::new(&self.project_root)
    }
}

pub struct GitRepo {
    repo_path: PathBuf,
}

impl GitRepo {
    pub fn new(repo_path: &Path) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
        }
    }

    pub fn is_git_repo(&self) -> bool {
        self.run_git(&["rev-parse", "--is-inside-work-tree"])
            .map(|out| out == "true")
            .unwrap_or(false)
    }

    /// Create and check out a new branch. An existing branch is an error.
    pub fn create_branch(&self, branch_name: &str) -> Result<()> {
        if !self.is_git_repo() {
            bail!("{} is not a git repository", self.repo_path.display());
        }
        let existing = self.run_git(&["branch", "--list", branch_name])?;
        if !existing.is_empty() {
            bail!("Branch '{branch_name}' already exists");
        }
        self.run_git(&["checkout", "-b", branch_name])?;
        println!("✅ Created and checked out branch: {branch_name}");
        Ok(())
    }

    /// Stage the given files (or every modified tracked file) and commit.
    /// Returns the commit SHA.
    pub fn commit_changes(&self, message: &str, files: &[PathBuf]) -> Result<String> {
        if files.is_empty() {
            self.run_git(&["add", "-u"])?;
        } else {
            for file in files {
                let path = file.to_string_lossy();
                self.run_git(&["add", "--", path.as_ref()])?;
            }
        }

        self.run_git(&["commit", "-m", message])?;

        let sha = self.run_git(&["rev-parse", "HEAD"])?;
        println!("✅ Committed changes: {sha}");
        Ok(sha)
    }

    pub fn current_branch(&self) -> Result<String> {
        self.run_git(&["rev-parse", "--abbrev-ref", "HEAD"])
    }

    fn run_git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_path)
            .output()
            .context(format!("Failed to run git {args:?}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!("Git command failed: {stderr}");
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ORIGINAL: &str = "def add(a, b):\n    return a + b\n";
    const UPDATED: &str = "def add(a: int, b: int) -> int:\n    return a + b\n";

    #[test]
    fn test_unified_diff_headers() {
        let diff = unified_diff("math.py", ORIGINAL, UPDATED);
        assert!(diff.starts_with("--- a/math.py\n+++ b/math.py\n"));
        assert!(diff.contains("-def add(a, b):"));
        assert!(diff.contains("+def add(a: int, b: int) -> int:"));
        assert!(diff.contains("     return a + b"));
        assert_eq!(unified_diff("math.py", ORIGINAL, ORIGINAL), "");
    }

    #[test]
    fn test_apply_change_with_backup() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("pkg").join("math.py");
        fs::create_dir_all(file.parent().unwrap()).unwrap();
        fs::write(&file, ORIGINAL).unwrap();

        let mut manager = CodeChangeManager::new(dir.path(), Path::new(".refactor_backups"));
        let change = CodeChange::new(&file, ORIGINAL, UPDATED, "add hints", "type_hints");
        assert!(!change.is_noop());

        let backup = manager.apply_change(change, true).unwrap().unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), UPDATED);
        assert_eq!(fs::read_to_string(&backup).unwrap(), ORIGINAL);
        assert!(backup.ends_with("pkg/math.py"));
        assert!(backup.starts_with(dir.path().join(".refactor_backups")));
        assert_eq!(manager.applied_changes().len(), 1);
    }

    #[test]
    fn test_apply_change_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = CodeChangeManager::new(dir.path(), Path::new("backups"));
        let change = CodeChange::new(&dir.path().join("gone.py"), "", UPDATED, "", "x");
        assert!(manager.apply_change(change, true).is_err());
    }

    #[test]
    fn test_apply_change_refuses_empty_content() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("math.py");
        fs::write(&file, ORIGINAL).unwrap();

        let mut manager = CodeChangeManager::new(dir.path(), Path::new("backups"));
        let change = CodeChange::new(&file, ORIGINAL, "  \n", "", "x");
        assert!(manager.apply_change(change, false).is_err());
        assert_eq!(fs::read_to_string(&file).unwrap(), ORIGINAL);
    }

    #[test]
    fn test_write_alongside() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("math.py");
        fs::write(&file, ORIGINAL).unwrap();

        let manager = CodeChangeManager::new(dir.path(), Path::new("backups"));
        let written = manager.write_alongside(&file, "Extract Method", UPDATED).unwrap();
        let name = written.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("math_extract_method_"));
        assert!(name.ends_with(".py"));
        assert_eq!(fs::read_to_string(&file).unwrap(), ORIGINAL);
    }

    #[test]
    fn test_list_and_restore_backups() {
        let dir = tempfile::tempdir().unwrap();
        let backups = dir.path().join("backups");
        fs::create_dir_all(backups.join("20240101_120000/pkg")).unwrap();
        fs::create_dir_all(backups.join("20240301_080000")).unwrap();
        fs::create_dir_all(backups.join("manual")).unwrap();
        fs::write(backups.join("20240101_120000/pkg/math.py"), ORIGINAL).unwrap();

        let manager = CodeChangeManager::new(dir.path(), Path::new("backups"));
        let listed = manager.list_backups().unwrap();
        let labels: Vec<&str> = listed.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["20240301_080000", "20240101_120000", "manual"]);
        assert!(listed[0].taken_at.is_some());
        assert!(listed[2].taken_at.is_none());

        let restored = manager.restore_backup(Path::new("20240101_120000")).unwrap();
        assert_eq!(restored, vec![dir.path().join("pkg/math.py")]);
        assert_eq!(fs::read_to_string(dir.path().join("pkg/math.py")).unwrap(), ORIGINAL);

        assert!(manager.restore_backup(Path::new("nope")).is_err());
    }

    #[test]
    fn test_list_backups_without_directory() {
        let dir = tempfile::tempdir().unwrap();
        let manager = CodeChangeManager::new(dir.path(), Path::new("backups"));
        assert!(manager.list_backups().unwrap().is_empty());
    }
}

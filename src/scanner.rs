use anyhow::{bail, Context, Result};
use glob::Pattern;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Directory names never descended into.
const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "__pycache__",
    "venv",
    ".venv",
    "env",
    "build",
    "dist",
    "node_modules",
    ".refactor_backups",
    ".tox",
    ".mypy_cache",
];

/// Shortest content accepted by [`write_file_checked`].
pub const MIN_WRITE_LEN: usize = 10;

/// Collect the Python files under `path`. A single `.py` file is returned
/// as-is; directories are walked recursively, skipping virtualenvs, caches,
/// the directories in `skip_dirs` and anything matching one of
/// `exclude_patterns` (relative to `path`).
pub fn collect_python_files(
    path: &Path,
    exclude_patterns: &[String],
    skip_dirs: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        bail!("Path does not exist: {}", path.display());
    }

    if path.is_file() {
        if !is_python_file(path) {
            bail!("Not a Python file: {}", path.display());
        }
        return Ok(vec![path.to_path_buf()]);
    }

    let excludes: Vec<Pattern> = exclude_patterns
        .iter()
        .filter_map(|p| Pattern::new(p).ok())
        .collect();

    let skip: Vec<PathBuf> = skip_dirs
        .iter()
        .filter(|d| d.is_dir())
        .map(|d| normalize_path(d))
        .collect();

    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0
                || !(is_excluded_dir(e.path())
                    || (e.file_type().is_dir() && skip.contains(&normalize_path(e.path()))))
        })
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && is_python_file(e.path()))
        .filter(|e| {
            let rel = e
                .path()
                .strip_prefix(path)
                .unwrap_or(e.path())
                .to_string_lossy()
                .to_string();
            !excludes.iter().any(|p| p.matches(&rel))
        })
        .map(|e| e.into_path())
        .collect();

    files.sort();
    Ok(files)
}

/// Files under `root` whose file name is one of `names`, skipping the same
/// directories as [`collect_python_files`].
pub fn find_files_named(root: &Path, names: &[&str]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_excluded_dir(e.path()))
        .filter_map(|e| e.ok())
        .filter(|e| {
            e.file_type().is_file()
                && e.file_name().to_str().is_some_and(|n| names.contains(&n))
        })
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}

pub fn is_python_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "py")
}

fn is_excluded_dir(path: &Path) -> bool {
    path.is_dir()
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| EXCLUDED_DIRS.contains(&n) || n.ends_with(".egg-info"))
}

/// One spelling per file: the canonical path when the file exists, otherwise
/// the absolute path with `.` components dropped.
pub fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path)
        .or_else(|_| std::path::absolute(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

pub fn read_source(path: &Path) -> Result<String> {
    if !path.exists() {
        bail!("File not found: {}", path.display());
    }
    fs::read_to_string(path).with_context(|| format!("Failed to read file: {path:?}"))
}

/// Write `content` to `path`, creating parent directories. Suspiciously short
/// content (usually an empty or truncated model reply) is refused.
pub fn write_file_checked(path: &Path, content: &str) -> Result<()> {
    if content.trim().len() < MIN_WRITE_LEN {
        bail!(
            "Refusing to write {}: content is empty or too short",
            path.display()
        );
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {parent:?}"))?;
    }

    fs::write(path, content).with_context(|| format!("Failed to write file: {path:?}"))
}

/// Dotted module name for `file` relative to `root` (`pkg/sub/mod.py` -> `pkg.sub.mod`).
pub fn module_name(root: &Path, file: &Path) -> String {
    let rel = file.strip_prefix(root).unwrap_or(file);
    let without_ext = rel.with_extension("");
    without_ext
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect::<Vec<_>>()
        .join(".")
}

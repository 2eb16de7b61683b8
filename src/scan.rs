//! Filesystem discovery.
//!
//! Walks a root with walkdir and keeps regular files whose path relative
//! to the root matches `scan.include_globs` and none of the excludes.
//! `.git`, `target` and `node_modules` trees are always excluded. Globs
//! match case-insensitively so `REPORT.PDF` counts as a pdf.
//!
//! Paths are reported absolute, the form the Metadata Store keys on.

use anyhow::{bail, Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::ScanConfig;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Result of one walk.
#[derive(Debug, Default)]
pub struct ScanOutcome {
    /// Absolute root the walk started from; the classifier's scope.
    pub root: PathBuf,
    /// Matching files, sorted.
    pub files: Vec<PathBuf>,
    /// Entries the walk could not read. Records under them must not age.
    pub unreadable: Vec<PathBuf>,
}

/// Discover candidate files under `root`.
///
/// A `root` naming a single file yields just that file, whatever its
/// extension.
pub fn scan(root: &Path, config: &ScanConfig) -> Result<ScanOutcome> {
    if !root.exists() {
        bail!("Path does not exist: {}", root.display());
    }
    let root = std::fs::canonicalize(root)
        .with_context(|| format!("Failed to resolve {}", root.display()))?;

    if root.is_file() {
        return Ok(ScanOutcome {
            files: vec![root.clone()],
            root,
            unreadable: Vec::new(),
        });
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut walker = WalkDir::new(&root).follow_links(config.follow_symlinks);
    if !config.recursive {
        walker = walker.max_depth(1);
    }

    let mut outcome = ScanOutcome {
        root: root.clone(),
        ..Default::default()
    };
    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable entry");
                outcome.unreadable.push(path);
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(&root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();

        if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
            continue;
        }
        outcome.files.push(path.to_path_buf());
    }

    outcome.files.sort();
    Ok(outcome)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .literal_separator(false)
            .build()
            .with_context(|| format!("Invalid glob: {}", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn names(outcome: &ScanOutcome) -> Vec<String> {
        outcome
            .files
            .iter()
            .map(|p| {
                p.strip_prefix(&outcome.root)
                    .unwrap()
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect()
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        fs::write(root.join("b.txt"), "b").unwrap();
        fs::write(root.join("A.PDF"), "a").unwrap();
        fs::write(root.join("sub/c.md"), "c").unwrap();
        fs::write(root.join("skip.exe"), "x").unwrap();
        fs::write(root.join("node_modules/pkg/readme.md"), "x").unwrap();

        let outcome = scan(root, &ScanConfig::default()).unwrap();
        assert_eq!(names(&outcome), vec!["A.PDF", "b.txt", "sub/c.md"]);
        assert!(outcome.unreadable.is_empty());
        assert!(outcome.files.iter().all(|p| p.is_absolute()));
    }

    #[test]
    fn test_scan_non_recursive_and_excludes() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("sub")).unwrap();
        fs::write(root.join("top.txt"), "t").unwrap();
        fs::write(root.join("draft.txt"), "d").unwrap();
        fs::write(root.join("sub/deep.txt"), "d").unwrap();

        let config = ScanConfig {
            recursive: false,
            exclude_globs: vec!["**/draft*".into()],
            ..Default::default()
        };
        let outcome = scan(root, &config).unwrap();
        assert_eq!(names(&outcome), vec!["top.txt"]);
    }

    #[test]
    fn test_scan_single_file() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("notes.weird");
        fs::write(&file, "hello").unwrap();
        let outcome = scan(&file, &ScanConfig::default()).unwrap();
        assert_eq!(outcome.files.len(), 1);
        assert!(outcome.files[0].ends_with("notes.weird"));
    }

    #[test]
    fn test_scan_missing_root() {
        assert!(scan(Path::new("/definitely/not/here"), &ScanConfig::default()).is_err());
    }
}

//! Walks the ingest roots and collects files the loader can handle.

use crate::loader::{IMAGE_EXTENSIONS, TEXT_EXTENSIONS};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Returns every loadable file under `roots`, sorted and de-duplicated.
///
/// A root that is itself a file is returned regardless of its extension,
/// so explicitly named files always reach the loader.
pub fn discover(
    roots: &[PathBuf],
    excludes: &[String],
    include_hidden: bool,
) -> anyhow::Result<Vec<PathBuf>> {
    let exclude_set = build_globset(excludes)?;
    let mut found = BTreeSet::new();

    for root in roots {
        if root.is_file() {
            found.insert(root.clone());
            continue;
        }
        if !root.exists() {
            tracing::warn!(path = %root.display(), "ingest root does not exist");
            continue;
        }
        for entry in WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || should_descend(e.path(), include_hidden, &exclude_set))
        {
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    tracing::debug!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            let path = entry.path();
            if entry.file_type().is_dir() || !is_supported(path) {
                continue;
            }
            found.insert(path.to_path_buf());
        }
    }

    Ok(found.into_iter().collect())
}

pub async fn discover_async(
    roots: Vec<PathBuf>,
    excludes: Vec<String>,
    include_hidden: bool,
) -> anyhow::Result<Vec<PathBuf>> {
    tokio::task::spawn_blocking(move || discover(&roots, &excludes, include_hidden)).await?
}

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let e = e.to_lowercase();
            TEXT_EXTENSIONS.contains(&e.as_str()) || IMAGE_EXTENSIONS.contains(&e.as_str())
        })
        .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat)?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

fn should_descend(path: &Path, include_hidden: bool, excludes: &GlobSet) -> bool {
    if is_excluded(path, excludes) {
        return false;
    }
    if !include_hidden && is_hidden(path) {
        return false;
    }
    true
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn is_excluded(path: &Path, excludes: &GlobSet) -> bool {
    excludes.is_match(path)
}

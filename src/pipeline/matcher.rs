//! Directory listing helpers: eligible-file matching, page ordering, object
//! discovery and identifier-scoped cleanup.
//!
//! Everything here is a plain read (or delete) of a directory at call time.
//! Nothing is locked, so the result only reflects the listing at that moment.

use crate::error::PipelineError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::debug;

/// OS-generated files that are never source material.
const JUNK_FILES: &[&str] = &["Thumbs.db", "desktop.ini", "Icon\r"];

/// Trailing tags marking alternate captures of one page (`_se`, `_me`).
static RE_MULTI_SHOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)_(?:se|me)$").unwrap());

/// Options for [`matching_files`].
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchOptions<'a> {
    /// Keep only names starting with this exact string.
    pub prefix: Option<&'a str>,
    /// Keep only names ending with this exact string.
    pub suffix: Option<&'a str>,
    /// Drop names whose stem ends in `_001`.
    pub skip_first: bool,
    /// Return `directory.join(name)` instead of bare names.
    pub with_full_path: bool,
}

impl<'a> MatchOptions<'a> {
    pub fn prefix(mut self, prefix: &'a str) -> Self {
        self.prefix = Some(prefix);
        self
    }

    pub fn suffix(mut self, suffix: &'a str) -> Self {
        self.suffix = Some(suffix);
        self
    }

    pub fn skip_first(mut self, v: bool) -> Self {
        self.skip_first = v;
        self
    }

    pub fn with_full_path(mut self) -> Self {
        self.with_full_path = true;
        self
    }
}

/// List the regular files in `directory`, sorted by name, then filtered.
///
/// Symlinks are followed, so a link to a regular file is listed. Hidden files and OS junk are always excluded. `prefix` is a plain string
/// prefix: `"10"` also matches `"100_1.tif"`. Use [`artifact_files`] when
/// enumerating one identifier's derivatives.
pub fn matching_files(directory: &Path, opts: MatchOptions<'_>) -> Result<Vec<PathBuf>, PipelineError> {
    let entries = std::fs::read_dir(directory).map_err(|e| PipelineError::io(directory, e))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(directory, e))?;
        if !entry.path().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || JUNK_FILES.contains(&name.as_str()) {
            continue;
        }
        names.push(name);
    }
    names.sort();

    if let Some(prefix) = opts.prefix {
        names.retain(|n| n.starts_with(prefix));
    }
    if let Some(suffix) = opts.suffix {
        names.retain(|n| n.ends_with(suffix));
    }
    if opts.skip_first {
        names.retain(|n| !stem(n).ends_with("_001"));
    }

    Ok(names
        .into_iter()
        .map(|n| {
            if opts.with_full_path {
                directory.join(n)
            } else {
                PathBuf::from(n)
            }
        })
        .collect())
}

/// Full paths of the files in `directory` that belong to `identifier`.
///
/// A file belongs to an identifier when its name is the identifier followed
/// by `_` (a tile) or `.` (the PDF or manifest). Requiring the separator keeps
/// one identifier from claiming another's files when one is a prefix of the
/// other.
pub fn artifact_files(directory: &Path, identifier: &str) -> Result<Vec<PathBuf>, PipelineError> {
    let files = matching_files(directory, MatchOptions::default().prefix(identifier).with_full_path())?;
    Ok(files
        .into_iter()
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix(identifier))
                .is_some_and(|rest| rest.starts_with('_') || rest.starts_with('.'))
        })
        .collect())
}

/// Delete every file belonging to `identifier` in each of `directories`.
///
/// Missing directories are skipped. Returns the number of files removed.
pub fn cleanup_files(identifier: &str, directories: &[&Path]) -> Result<usize, PipelineError> {
    let mut removed = 0;
    for dir in directories {
        if !dir.is_dir() {
            continue;
        }
        for path in artifact_files(dir, identifier)? {
            std::fs::remove_file(&path).map_err(|e| PipelineError::io(&path, e))?;
            removed += 1;
        }
    }
    debug!("Removed {} local files for {}", removed, identifier);
    Ok(removed)
}

/// Immediate subdirectories of `source_root`, sorted by name.
///
/// Hidden directories and any of `excluded` (the output directories when the
/// target root is the source root) are left out.
pub fn object_dirs(source_root: &Path, excluded: &[&Path]) -> Result<Vec<PathBuf>, PipelineError> {
    let entries = std::fs::read_dir(source_root).map_err(|e| PipelineError::io(source_root, e))?;

    let excluded: Vec<PathBuf> = excluded.iter().map(|p| normalise(p)).collect();
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(source_root, e))?;
        let path = entry.path();
        if !path.is_dir() || entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        if excluded.contains(&normalise(&path)) {
            continue;
        }
        dirs.push(path);
    }
    dirs.sort();
    Ok(dirs)
}

fn normalise(p: &Path) -> PathBuf {
    std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
}

/// Part of a file name before the first `.`.
pub fn stem(file_name: &str) -> &str {
    file_name.split('.').next().unwrap_or(file_name)
}

/// Stem with any multi-shot tag (`_se`, `_me`) removed.
///
/// `"ms12_0003_se.tif"` → `"ms12_0003"`.
pub fn page_stem(file_name: &str) -> String {
    RE_MULTI_SHOT.replace(stem(file_name), "").into_owned()
}

/// The page-order key of a master file: the last `_`-separated segment of its
/// [`page_stem`].
///
/// `"ms12_0003_se.tif"` → `"0003"`; a name with no `_` yields its whole stem.
pub fn page_token(file_name: &str) -> String {
    let stem = page_stem(file_name);
    match stem.rsplit_once('_') {
        Some((_, token)) => token.to_string(),
        None => stem,
    }
}

/// Sort master paths into canonical page order (by [`page_stem`], then by
/// full name so alternate captures stay adjacent and deterministic).
pub fn sort_pages(files: &mut [PathBuf]) {
    files.sort_by(|a, b| {
        let (an, bn) = (file_name(a), file_name(b));
        match page_stem(&an).cmp(&page_stem(&bn)) {
            Ordering::Equal => an.cmp(&bn),
            other => other,
        }
    });
}

pub(crate) fn file_name(p: &Path) -> String {
    p.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

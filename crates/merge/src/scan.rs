//! Scanner module for grouping exported media files.
//!
//! Files in the target directory are matched to logical groups purely by name:
//! `{base_id}_main.{ext}` is a group's primary asset, `{base_id}_overlay_{n}.{ext}`
//! is an overlay for it, and any other `{base_id}.{ext}` is a standalone asset.

use crate::config::MediaConfig;
use crate::media::{Asset, MediaGroup, MediaKind, OverlayAsset};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

const MAIN_SUFFIX: &str = "_main";
const OVERLAY_MARKER: &str = "_overlay_";

/// Groups keyed and ordered by base id.
pub type GroupIndex = BTreeMap<String, MediaGroup>;

/// Errors that stop a scan before any entry is read.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("Directory not found: {0}")]
    NotFound(PathBuf),

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// Role of a file within its group, as decided by its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedName {
    /// `{base_id}_main.{ext}`
    Main { base_id: String, extension: String },
    /// `{base_id}_overlay_{index}.{ext}`
    Overlay {
        base_id: String,
        index: Option<u32>,
        extension: String,
    },
    /// `{base_id}.{ext}` with neither marker
    Standalone { base_id: String, extension: String },
    /// Sidecar, hidden file, or a name without an extension
    Ignored,
}

impl ParsedName {
    pub fn base_id(&self) -> Option<&str> {
        match self {
            ParsedName::Main { base_id, .. }
            | ParsedName::Overlay { base_id, .. }
            | ParsedName::Standalone { base_id, .. } => Some(base_id),
            ParsedName::Ignored => None,
        }
    }
}

/// Checks if an extension is one of the sidecar extensions (case-insensitive).
pub fn is_sidecar_extension(extension: &str, sidecar_extensions: &[String]) -> bool {
    sidecar_extensions
        .iter()
        .any(|s| s.eq_ignore_ascii_case(extension))
}

/// Parses the leading decimal digits after the overlay marker.
fn overlay_index(rest: &str) -> Option<u32> {
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Decides which group a file belongs to and what role it plays there.
///
/// The rules are applied in order:
/// 1. hidden names and sidecar extensions are ignored
/// 2. the name is split on its last dot; no dot means ignored
/// 3. a `_main` suffix marks the group's main asset
/// 4. an `_overlay_` marker marks an overlay of the group named before it
/// 5. anything else is a standalone main asset named by the whole stem
pub fn parse_file_name(file_name: &str, sidecar_extensions: &[String]) -> ParsedName {
    if file_name.starts_with('.') {
        return ParsedName::Ignored;
    }

    let Some((name, extension)) = file_name.rsplit_once('.') else {
        return ParsedName::Ignored;
    };

    if is_sidecar_extension(extension, sidecar_extensions) {
        return ParsedName::Ignored;
    }

    let extension = extension.to_lowercase();

    if let Some(base_id) = name.strip_suffix(MAIN_SUFFIX) {
        return ParsedName::Main {
            base_id: base_id.to_string(),
            extension,
        };
    }

    if let Some((base_id, rest)) = name.split_once(OVERLAY_MARKER) {
        return ParsedName::Overlay {
            base_id: base_id.to_string(),
            index: overlay_index(rest),
            extension,
        };
    }

    ParsedName::Standalone {
        base_id: name.to_string(),
        extension,
    }
}

/// Adds one parsed file to the index.
///
/// A `_main` file takes precedence over a standalone file for the same group;
/// between two candidates of the same rank the first one seen is kept.
fn insert_parsed(groups: &mut GroupIndex, path: PathBuf, parsed: ParsedName, media: &MediaConfig) {
    match parsed {
        ParsedName::Ignored => {}
        ParsedName::Overlay {
            base_id,
            index,
            extension,
        } => {
            let kind = MediaKind::classify(&extension, media);
            let group = groups
                .entry(base_id.clone())
                .or_insert_with(|| MediaGroup::new(base_id));
            group.overlays.push(OverlayAsset {
                asset: Asset::new(path, &extension, kind),
                index,
            });
        }
        ParsedName::Main { base_id, extension } => {
            let kind = MediaKind::classify(&extension, media);
            let group = groups
                .entry(base_id.clone())
                .or_insert_with(|| MediaGroup::new(base_id.clone()));
            let asset = Asset::new(path, &extension, kind);
            match &group.main {
                Some(existing) if is_explicit_main(existing) => {
                    warn!(
                        base_id = %base_id,
                        kept = %existing.file_name(),
                        ignored = %asset.file_name(),
                        "Duplicate main asset; leaving extra file untouched"
                    );
                }
                Some(existing) => {
                    warn!(
                        base_id = %base_id,
                        kept = %asset.file_name(),
                        ignored = %existing.file_name(),
                        "Main asset takes precedence over standalone file"
                    );
                    group.main = Some(asset);
                }
                None => group.main = Some(asset),
            }
        }
        ParsedName::Standalone { base_id, extension } => {
            let kind = MediaKind::classify(&extension, media);
            let group = groups
                .entry(base_id.clone())
                .or_insert_with(|| MediaGroup::new(base_id.clone()));
            let asset = Asset::new(path, &extension, kind);
            if let Some(existing) = &group.main {
                warn!(
                    base_id = %base_id,
                    kept = %existing.file_name(),
                    ignored = %asset.file_name(),
                    "Duplicate main asset; leaving extra file untouched"
                );
            } else {
                group.main = Some(asset);
            }
        }
    }
}

fn is_explicit_main(asset: &Asset) -> bool {
    asset
        .path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.ends_with(MAIN_SUFFIX))
        .unwrap_or(false)
}

/// Scans a directory and groups its files by base id.
///
/// This function:
/// - Lists only the directory's own entries (no recursion)
/// - Visits entries sorted by file name
/// - Skips directories, hidden files and unreadable entries; file symlinks count as files
/// - Skips sidecar files and names without an extension
/// - Sorts each group's overlays into compositing order
pub fn scan_directory(dir: &Path, media: &MediaConfig) -> Result<GroupIndex, ScanError> {
    if !dir.exists() {
        return Err(ScanError::NotFound(dir.to_path_buf()));
    }
    if !dir.is_dir() {
        return Err(ScanError::NotADirectory(dir.to_path_buf()));
    }

    let mut groups = GroupIndex::new();

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();

    for entry in walker.into_iter().filter_map(|e| e.ok()) {
        // Follows symlinks, so linked media is grouped like regular files.
        if !entry.path().is_file() {
            continue;
        }

        let Some(file_name) = entry.file_name().to_str() else {
            debug!(path = %entry.path().display(), "Skipping non UTF-8 file name");
            continue;
        };

        let parsed = parse_file_name(file_name, &media.sidecar_extensions);
        if parsed == ParsedName::Ignored {
            debug!(file = file_name, "Ignoring file");
            continue;
        }

        insert_parsed(&mut groups, entry.path().to_path_buf(), parsed, media);
    }

    for group in groups.values_mut() {
        group.sort_overlays();
    }

    Ok(groups)
}

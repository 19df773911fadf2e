//! Media data model: assets and the groups they are reconciled into.

use crate::config::MediaConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What kind of compositing an asset supports, decided by its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Unsupported,
}

impl MediaKind {
    /// Classifies a lower-case extension against the configured lists.
    pub fn classify(extension: &str, media: &MediaConfig) -> Self {
        let ext = extension.to_lowercase();
        if media.image_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            MediaKind::Image
        } else if media.video_extensions.iter().any(|e| e.eq_ignore_ascii_case(&ext)) {
            MediaKind::Video
        } else {
            MediaKind::Unsupported
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
            MediaKind::Unsupported => "unsupported",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Full path to the file.
    pub path: PathBuf,
    /// Lower-case extension without the dot.
    pub extension: String,
    pub kind: MediaKind,
}

impl Asset {
    pub fn new(path: PathBuf, extension: &str, kind: MediaKind) -> Self {
        Self {
            path,
            extension: extension.to_lowercase(),
            kind,
        }
    }

    /// File name as a lossy string, for status output.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }

    pub fn directory(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// An overlay together with the numeric position parsed from its name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayAsset {
    pub asset: Asset,
    /// Number after `_overlay_`, if the name carries one.
    pub index: Option<u32>,
}

/// One primary asset and the overlays meant to be composited onto it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MediaGroup {
    pub base_id: String,
    pub main: Option<Asset>,
    pub overlays: Vec<OverlayAsset>,
}

impl MediaGroup {
    pub fn new(base_id: impl Into<String>) -> Self {
        Self {
            base_id: base_id.into(),
            main: None,
            overlays: Vec::new(),
        }
    }

    /// Sorts overlays into compositing order.
    ///
    /// Numbered overlays come first in ascending order, unnumbered ones last;
    /// ties fall back to the file name.
    pub fn sort_overlays(&mut self) {
        self.overlays.sort_by(|a, b| {
            let key_a = (a.index.is_none(), a.index.unwrap_or(0));
            let key_b = (b.index.is_none(), b.index.unwrap_or(0));
            key_a
                .cmp(&key_b)
                .then_with(|| a.asset.path.cmp(&b.asset.path))
        });
    }
}

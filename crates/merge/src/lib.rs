//! Overlay merge
//!
//! Folds exported overlay layers back into their photos and videos: groups a
//! directory's files by base identifier, composites each overlay onto its main
//! asset and swaps the result into place.

pub mod compose;
pub mod coordinator;
pub mod media;
pub mod replace;
pub mod runner;
pub mod scan;
pub mod startup;
pub mod summary;

pub use compose::{ComposeError, Compositor, ImageCompositor, VideoCompositor, VideoEncodeParams};
pub use coordinator::{MergeCoordinator, OverlayError};
pub use media::{Asset, MediaGroup, MediaKind, OverlayAsset};
pub use overlay_merge_config as config;
pub use overlay_merge_config::Config;
pub use replace::{atomic_replace, create_backup, staging_path, ReplaceError};
pub use runner::{CommandRunner, ProcessRunner, ToolError, ToolOutput};
pub use scan::{parse_file_name, scan_directory, GroupIndex, ParsedName, ScanError};
pub use startup::{check_tool, check_tools, parse_ffmpeg_version, StartupError, ToolCheck};
pub use summary::{MergeOutcome, MergeResult, OverlayFailure, RunSummary};

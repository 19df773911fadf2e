//! Compositors that merge one overlay onto one main asset.

pub mod still;
pub mod video;

pub use still::{composite_over, flatten_onto_white, supports_alpha, ImageCompositor};
pub use video::{
    build_compose_command, build_probe_command, parse_dimensions, FilterGraph, VideoCompositor,
    VideoEncodeParams,
};

use crate::runner::ToolError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Why a compositor produced no output.
#[derive(Debug, Error)]
pub enum ComposeError {
    /// External executable missing from the environment.
    #[error("{program} not found; install it or set its path in the config")]
    ToolMissing { program: String },

    /// External command exceeded its bound.
    #[error("{program} timed out after {}s", .limit.as_secs())]
    ToolTimeout { program: String, limit: Duration },

    /// External command failed, after the fallback where one applies.
    #[error("{program} failed: {message}")]
    ToolFailure { program: String, message: String },

    /// Decode, resample or encode error on the image path.
    #[error("Image composite failed: {0}")]
    Composite(#[from] image::ImageError),

    /// IO error around the compositor itself.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComposeError {
    /// Stable label for summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            ComposeError::ToolMissing { .. } => "tool_missing",
            ComposeError::ToolTimeout { .. } => "tool_timeout",
            ComposeError::ToolFailure { .. } => "tool_failure",
            ComposeError::Composite(_) => "composite_failure",
            ComposeError::Io(_) => "io",
        }
    }
}

impl From<ToolError> for ComposeError {
    fn from(e: ToolError) -> Self {
        match e {
            ToolError::NotFound { program } => ComposeError::ToolMissing { program },
            ToolError::Timeout { program, limit } => ComposeError::ToolTimeout { program, limit },
            ToolError::Io { program, source } => ComposeError::ToolFailure {
                program,
                message: source.to_string(),
            },
        }
    }
}

/// Merges an overlay onto a main asset, writing the result to `output`.
///
/// On error no file is left at `output`.
#[async_trait]
pub trait Compositor: Send + Sync {
    async fn compose(&self, main: &Path, overlay: &Path, output: &Path)
        -> Result<(), ComposeError>;
}

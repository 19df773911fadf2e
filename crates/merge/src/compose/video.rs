//! Video compositor driving ffmpeg.
//!
//! Decoding and encoding are left to ffmpeg; this module builds the filter
//! graphs and applies the retry policy. The first attempt fits the overlay
//! inside the frame and centers it. If ffmpeg rejects that, the video is
//! probed for its exact size and the overlay is stretched over the whole frame
//! in a single retry.

use super::{ComposeError, Compositor};
use crate::config::Config;
use crate::replace::remove_if_exists;
use crate::runner::{CommandRunner, ProcessRunner};
use async_trait::async_trait;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Label of the composited video stream inside the filter graph.
const VIDEO_OUT_LABEL: &str = "[vout]";

/// Tool locations, codec settings and time bounds for video merges.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoEncodeParams {
    pub ffmpeg: String,
    pub ffprobe: String,
    pub video_codec: String,
    pub preset: String,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub compose_timeout: Duration,
    pub probe_timeout: Duration,
}

impl VideoEncodeParams {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            ffmpeg: cfg.tools.ffmpeg.clone(),
            ffprobe: cfg.tools.ffprobe.clone(),
            video_codec: cfg.video.codec.clone(),
            preset: cfg.video.preset.clone(),
            audio_codec: cfg.video.audio_codec.clone(),
            audio_bitrate: cfg.video.audio_bitrate.clone(),
            compose_timeout: Duration::from_secs(cfg.tools.compose_timeout_secs),
            probe_timeout: Duration::from_secs(cfg.tools.probe_timeout_secs),
        }
    }
}

impl Default for VideoEncodeParams {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// How the overlay is placed on each frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterGraph {
    /// Fit inside the frame keeping aspect ratio, centered.
    Centered,
    /// Stretch to exactly `width`x`height`, anchored top-left.
    FullFrame { width: u32, height: u32 },
}

impl FilterGraph {
    /// Renders the `-filter_complex` expression.
    ///
    /// Input 0 is the main video, input 1 the looped overlay image; the
    /// overlay ends with the main video.
    pub fn render(&self) -> String {
        match self {
            FilterGraph::Centered => format!(
                "[1:v][0:v]scale2ref=w=iw:h=ih:force_original_aspect_ratio=decrease[ovr][base];\
                 [base][ovr]overlay=x=(main_w-overlay_w)/2:y=(main_h-overlay_h)/2:shortest=1{}",
                VIDEO_OUT_LABEL
            ),
            FilterGraph::FullFrame { width, height } => format!(
                "[1:v]scale={}:{}[ovr];[0:v][ovr]overlay=x=0:y=0:shortest=1{}",
                width, height, VIDEO_OUT_LABEL
            ),
        }
    }
}

/// Builds the ffmpeg invocation for one compositing attempt.
///
/// The output path is always the last argument and is overwritten if present.
pub fn build_compose_command(
    params: &VideoEncodeParams,
    main: &Path,
    overlay: &Path,
    output: &Path,
    graph: &FilterGraph,
) -> Command {
    let mut cmd = Command::new(&params.ffmpeg);

    cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error", "-y"]);

    cmd.arg("-i").arg(main);
    cmd.args(["-loop", "1"]).arg("-i").arg(overlay);

    cmd.arg("-filter_complex").arg(graph.render());
    cmd.arg("-map").arg(VIDEO_OUT_LABEL);
    cmd.arg("-map").arg("0:a?");

    cmd.arg("-c:v").arg(&params.video_codec);
    cmd.arg("-preset").arg(&params.preset);
    cmd.arg("-c:a").arg(&params.audio_codec);
    cmd.arg("-b:a").arg(&params.audio_bitrate);

    cmd.arg(output);
    cmd
}

/// Builds the ffprobe invocation that prints `WIDTHxHEIGHT` of the first video stream.
pub fn build_probe_command(params: &VideoEncodeParams, main: &Path) -> Command {
    let mut cmd = Command::new(&params.ffprobe);
    cmd.args([
        "-v",
        "error",
        "-select_streams",
        "v:0",
        "-show_entries",
        "stream=width,height",
        "-of",
        "csv=s=x:p=0",
    ]);
    cmd.arg(main);
    cmd
}

/// Parses probe output such as `1080x1920` into `(width, height)`.
pub fn parse_dimensions(raw: &str) -> Option<(u32, u32)> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let mut parts = line.split('x');
    let width = parts.next()?.trim().parse::<u32>().ok()?;
    let height = parts.next()?.trim().parse::<u32>().ok()?;
    if width == 0 || height == 0 {
        return None;
    }
    Some((width, height))
}

/// Composites overlay images onto videos through an external command.
#[derive(Clone)]
pub struct VideoCompositor {
    runner: Arc<dyn CommandRunner>,
    params: VideoEncodeParams,
}

impl std::fmt::Debug for VideoCompositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoCompositor")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl VideoCompositor {
    /// Create a compositor that spawns real processes.
    pub fn new(params: VideoEncodeParams) -> Self {
        Self::with_runner(params, Arc::new(ProcessRunner))
    }

    pub fn with_runner(params: VideoEncodeParams, runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner, params }
    }

    pub fn params(&self) -> &VideoEncodeParams {
        &self.params
    }

    /// Runs one compositing attempt.
    ///
    /// Returns `Ok(None)` on success, `Ok(Some(message))` when ffmpeg exited
    /// non-zero, and `Err` for terminal errors (missing tool, timeout).
    async fn attempt(
        &self,
        graph: &FilterGraph,
        main: &Path,
        overlay: &Path,
        output: &Path,
    ) -> Result<Option<String>, ComposeError> {
        let cmd = build_compose_command(&self.params, main, overlay, output, graph);
        debug!(graph = %graph.render(), "Running ffmpeg");
        let result = self.runner.run(cmd, self.params.compose_timeout).await?;

        if !result.success() {
            return Ok(Some(format!("{} ({})", result.status, result.stderr_tail())));
        }

        // A zero exit without a usable file still counts as a failed attempt.
        match std::fs::metadata(output) {
            Ok(meta) if meta.len() > 0 => Ok(None),
            _ => Ok(Some("exited successfully but wrote no output".to_string())),
        }
    }

    /// Queries the exact frame size of the main video.
    async fn probe_dimensions(&self, main: &Path) -> Result<(u32, u32), ComposeError> {
        let cmd = build_probe_command(&self.params, main);
        let result = self.runner.run(cmd, self.params.probe_timeout).await?;

        if !result.success() {
            return Err(ComposeError::ToolFailure {
                program: self.params.ffprobe.clone(),
                message: format!("{} ({})", result.status, result.stderr_tail()),
            });
        }

        parse_dimensions(&result.stdout).ok_or_else(|| ComposeError::ToolFailure {
            program: self.params.ffprobe.clone(),
            message: format!("unexpected dimensions output: {:?}", result.stdout.trim()),
        })
    }

    async fn compose_with_fallback(
        &self,
        main: &Path,
        overlay: &Path,
        output: &Path,
    ) -> Result<(), ComposeError> {
        let Some(reason) = self
            .attempt(&FilterGraph::Centered, main, overlay, output)
            .await?
        else {
            return Ok(());
        };

        warn!(
            main = %main.display(),
            reason = %reason,
            "Centered overlay failed; retrying with full-frame overlay"
        );
        remove_if_exists(output)?;

        let (width, height) = self.probe_dimensions(main).await?;
        let fallback = FilterGraph::FullFrame { width, height };

        match self.attempt(&fallback, main, overlay, output).await? {
            None => Ok(()),
            Some(message) => Err(ComposeError::ToolFailure {
                program: self.params.ffmpeg.clone(),
                message,
            }),
        }
    }
}

#[async_trait]
impl Compositor for VideoCompositor {
    async fn compose(
        &self,
        main: &Path,
        overlay: &Path,
        output: &Path,
    ) -> Result<(), ComposeError> {
        let result = self.compose_with_fallback(main, overlay, output).await;
        if result.is_err() {
            let _ = remove_if_exists(output);
        }
        result
    }
}

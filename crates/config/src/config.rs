//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// File extension classification (lower-case, without the leading dot)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaConfig {
    /// Extensions treated as still images
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,
    /// Extensions treated as videos
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
    /// Metadata sidecar extensions excluded from grouping
    #[serde(default = "default_sidecar_extensions")]
    pub sidecar_extensions: Vec<String>,
}

fn default_image_extensions() -> Vec<String> {
    strings(&["jpg", "jpeg", "png", "webp"])
}

fn default_video_extensions() -> Vec<String> {
    strings(&["mp4", "mov", "avi", "m4v"])
}

fn default_sidecar_extensions() -> Vec<String> {
    strings(&["json"])
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            video_extensions: default_video_extensions(),
            sidecar_extensions: default_sidecar_extensions(),
        }
    }
}

/// External tool locations and time bounds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolsConfig {
    /// Frame-compositing executable (default "ffmpeg")
    #[serde(default = "default_ffmpeg")]
    pub ffmpeg: String,
    /// Probe executable (default "ffprobe")
    #[serde(default = "default_ffprobe")]
    pub ffprobe: String,
    /// Upper bound for one compositing invocation, in seconds
    #[serde(default = "default_compose_timeout_secs")]
    pub compose_timeout_secs: u64,
    /// Upper bound for one probe invocation, in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_ffmpeg() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe() -> String {
    "ffprobe".to_string()
}

fn default_compose_timeout_secs() -> u64 {
    300
}

fn default_probe_timeout_secs() -> u64 {
    30
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: default_ffmpeg(),
            ffprobe: default_ffprobe(),
            compose_timeout_secs: default_compose_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Video re-encode parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoConfig {
    #[serde(default = "default_video_codec")]
    pub codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "fast".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "128k".to_string()
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            codec: default_video_codec(),
            preset: default_preset(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
        }
    }
}

/// Still image encode parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageConfig {
    /// JPEG quality (1-100, default 95)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_jpeg_quality() -> u8 {
    95
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

/// Merge policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeConfig {
    /// Keep applying later overlays of a group after one fails (default true)
    #[serde(default = "default_continue_after_failure")]
    pub continue_after_failure: bool,
    /// Number of groups merged at once (default 1, sequential)
    #[serde(default = "default_max_parallel_groups")]
    pub max_parallel_groups: u32,
    /// Keep a hidden `.orig.<timestamp>` copy of each main asset before replacing it
    #[serde(default)]
    pub keep_originals: bool,
}

fn default_continue_after_failure() -> bool {
    true
}

fn default_max_parallel_groups() -> u32 {
    1
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            continue_after_failure: default_continue_after_failure(),
            max_parallel_groups: default_max_parallel_groups(),
            keep_originals: false,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub media: MediaConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub image: ImageConfig,
    #[serde(default)]
    pub merge: MergeConfig,
}

fn parse_bool(val: &str) -> Option<bool> {
    // Accept "true", "1", "yes" as true; "false", "0", "no" as false
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the file and fills missing sections and fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - OVERLAY_MERGE_FFMPEG -> tools.ffmpeg
    /// - OVERLAY_MERGE_FFPROBE -> tools.ffprobe
    /// - OVERLAY_MERGE_COMPOSE_TIMEOUT_SECS -> tools.compose_timeout_secs
    /// - OVERLAY_MERGE_PROBE_TIMEOUT_SECS -> tools.probe_timeout_secs
    /// - OVERLAY_MERGE_MAX_PARALLEL_GROUPS -> merge.max_parallel_groups
    /// - OVERLAY_MERGE_KEEP_ORIGINALS -> merge.keep_originals
    /// - OVERLAY_MERGE_CONTINUE_AFTER_FAILURE -> merge.continue_after_failure
    ///
    /// Unparsable values are ignored and the existing value is kept.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("OVERLAY_MERGE_FFMPEG") {
            if !val.trim().is_empty() {
                self.tools.ffmpeg = val;
            }
        }

        if let Ok(val) = env::var("OVERLAY_MERGE_FFPROBE") {
            if !val.trim().is_empty() {
                self.tools.ffprobe = val;
            }
        }

        if let Ok(val) = env::var("OVERLAY_MERGE_COMPOSE_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.tools.compose_timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("OVERLAY_MERGE_PROBE_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.tools.probe_timeout_secs = secs;
            }
        }

        if let Ok(val) = env::var("OVERLAY_MERGE_MAX_PARALLEL_GROUPS") {
            if let Ok(groups) = val.parse::<u32>() {
                self.merge.max_parallel_groups = groups;
            }
        }

        if let Ok(val) = env::var("OVERLAY_MERGE_KEEP_ORIGINALS") {
            if let Some(keep) = parse_bool(&val) {
                self.merge.keep_originals = keep;
            }
        }

        if let Ok(val) = env::var("OVERLAY_MERGE_CONTINUE_AFTER_FAILURE") {
            if let Some(cont) = parse_bool(&val) {
                self.merge.continue_after_failure = cont;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Default configuration with environment overrides applied
    ///
    /// Used when no config file is given.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }
}

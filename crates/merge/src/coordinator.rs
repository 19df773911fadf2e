//! Merge coordinator
//!
//! Drives a run: scans the directory, then for every group composites each
//! overlay onto the main asset in order, swapping the result into place and
//! deleting the consumed overlay. Groups run on a bounded pool gated by a
//! semaphore; the summary is always reported in group order.

use crate::compose::{ComposeError, Compositor, ImageCompositor, VideoCompositor, VideoEncodeParams};
use crate::media::{Asset, MediaGroup, MediaKind, OverlayAsset};
use crate::replace::{
    atomic_replace, create_backup, remove_consumed_overlay, remove_if_exists, staging_path,
    ReplaceError,
};
use crate::scan::{scan_directory, ScanError};
use crate::summary::{MergeOutcome, MergeResult, OverlayFailure, RunSummary};
use crate::Config;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

/// Why one overlay could not be merged.
#[derive(Debug, Error)]
pub enum OverlayError {
    /// The main asset's kind has no compositor.
    #[error("No compositor for {kind} main asset")]
    UnsupportedKind { kind: MediaKind },

    /// The overlay vanished between scan and merge.
    #[error("Overlay file is missing: {}", .0.display())]
    OverlayMissing(PathBuf),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    /// The staged result could not be swapped in, or the overlay not removed.
    #[error(transparent)]
    Replacement(#[from] ReplaceError),
}

impl OverlayError {
    /// Stable label for summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            OverlayError::UnsupportedKind { .. } => "unsupported_kind",
            OverlayError::OverlayMissing(_) => "overlay_missing",
            OverlayError::Compose(e) => e.kind(),
            OverlayError::Replacement(_) => "replacement_failure",
        }
    }

    /// True when the staged result could not be swapped in.
    ///
    /// The staged file is then the only copy of the composite, so the group
    /// must not compose into the same path again.
    pub fn halts_group(&self) -> bool {
        matches!(
            self,
            OverlayError::Replacement(ReplaceError::Backup(_) | ReplaceError::Rename(_))
        )
    }
}

/// Settings the coordinator reads per run.
#[derive(Debug, Clone)]
struct MergePolicy {
    continue_after_failure: bool,
    keep_originals: bool,
    max_parallel_groups: usize,
}

/// Dispatches every group of a directory to the right compositor.
#[derive(Clone)]
pub struct MergeCoordinator {
    config: Arc<Config>,
    policy: MergePolicy,
    image: Arc<dyn Compositor>,
    video: Arc<dyn Compositor>,
}

impl std::fmt::Debug for MergeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeCoordinator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl MergeCoordinator {
    /// Create a coordinator backed by the real image and video compositors.
    pub fn new(config: Config) -> Self {
        let image = Arc::new(ImageCompositor::new(config.image.jpeg_quality));
        let video = Arc::new(VideoCompositor::new(VideoEncodeParams::from_config(&config)));
        Self::with_compositors(config, image, video)
    }

    /// Create a coordinator with explicit compositors.
    pub fn with_compositors(
        config: Config,
        image: Arc<dyn Compositor>,
        video: Arc<dyn Compositor>,
    ) -> Self {
        let policy = MergePolicy {
            continue_after_failure: config.merge.continue_after_failure,
            keep_originals: config.merge.keep_originals,
            max_parallel_groups: config.merge.max_parallel_groups.max(1) as usize,
        };
        Self {
            config: Arc::new(config),
            policy,
            image,
            video,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn compositor_for(&self, kind: MediaKind) -> Result<Arc<dyn Compositor>, OverlayError> {
        match kind {
            MediaKind::Image => Ok(self.image.clone()),
            MediaKind::Video => Ok(self.video.clone()),
            MediaKind::Unsupported => Err(OverlayError::UnsupportedKind { kind }),
        }
    }

    /// Merges every group found in `dir`.
    ///
    /// Only a scan failure aborts the run; per-group failures are recorded in
    /// the summary.
    pub async fn run(&self, dir: &Path) -> Result<RunSummary, ScanError> {
        let groups = scan_directory(dir, &self.config.media)?;
        info!(
            directory = %dir.display(),
            groups = groups.len(),
            "Found unique media groups"
        );

        let semaphore = Arc::new(Semaphore::new(self.policy.max_parallel_groups));
        let mut handles = Vec::with_capacity(groups.len());

        for (base_id, group) in groups {
            let coordinator = self.clone();
            let semaphore = semaphore.clone();
            let handle = tokio::spawn(async move {
                // The semaphore is never closed, so a permit always arrives.
                let _permit = semaphore.acquire_owned().await.ok();
                coordinator.merge_group(group).await
            });
            handles.push((base_id, handle));
        }

        let mut results = Vec::with_capacity(handles.len());
        for (base_id, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    error!(base_id = %base_id, error = %e, "Merge task aborted");
                    results.push(MergeResult::attempted(
                        base_id,
                        None,
                        1,
                        0,
                        vec![OverlayFailure {
                            overlay: String::new(),
                            kind: "task_aborted".to_string(),
                            message: e.to_string(),
                        }],
                    ));
                }
            }
        }

        let summary = RunSummary::from_results(dir.display().to_string(), results);
        info!(
            merged = summary.merged,
            skipped = summary.skipped,
            partial = summary.partial,
            failed = summary.failed,
            overlays_applied = summary.overlays_applied,
            "Processing complete"
        );
        Ok(summary)
    }

    /// Merges the overlays of one group onto its main asset, in order.
    pub async fn merge_group(&self, group: MediaGroup) -> MergeResult {
        let MediaGroup {
            base_id,
            main,
            overlays,
        } = group;

        let Some(main) = main else {
            info!(base_id = %base_id, overlays = overlays.len(), "No main media file found; skipping");
            return MergeResult::skipped(base_id, MergeOutcome::SkippedNoMain, None, overlays.len());
        };
        let main_name = main.file_name();

        if overlays.is_empty() {
            debug!(base_id = %base_id, main = %main_name, "No overlays; leaving main untouched");
            return MergeResult::skipped(
                base_id,
                MergeOutcome::SkippedNoOverlay,
                Some(main_name),
                0,
            );
        }

        let compositor = match self.compositor_for(main.kind) {
            Ok(compositor) => compositor,
            Err(e) => {
                for overlay in &overlays {
                    warn!(
                        base_id = %base_id,
                        main = %main_name,
                        overlay = %overlay.asset.file_name(),
                        kind = e.kind(),
                        "Unsupported main media type; skipping overlay"
                    );
                }
                return MergeResult::skipped(
                    base_id,
                    MergeOutcome::SkippedUnsupported,
                    Some(main_name),
                    overlays.len(),
                );
            }
        };

        info!(
            base_id = %base_id,
            main = %main_name,
            overlays = overlays.len(),
            "Merging group"
        );

        let backup = if self.policy.keep_originals {
            match create_backup(&main.path) {
                Ok(path) => {
                    debug!(base_id = %base_id, backup = %path.display(), "Kept original");
                    Some(path)
                }
                Err(e) => {
                    let e = OverlayError::from(e);
                    warn!(base_id = %base_id, kind = e.kind(), error = %e, "Could not back up main asset");
                    let failure = OverlayFailure {
                        overlay: overlays[0].asset.file_name(),
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    };
                    return MergeResult::attempted(
                        base_id,
                        Some(main_name),
                        overlays.len(),
                        0,
                        vec![failure],
                    );
                }
            }
        } else {
            None
        };

        let mut applied = 0;
        let mut main_changed = false;
        let mut failures = Vec::new();

        for overlay in &overlays {
            let overlay_name = overlay.asset.file_name();
            let started = Instant::now();

            match self.apply_overlay(compositor.as_ref(), &main, overlay).await {
                Ok(()) => {
                    applied += 1;
                    main_changed = true;
                    info!(
                        base_id = %base_id,
                        overlay = %overlay_name,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Merged overlay"
                    );
                }
                Err(e) => {
                    warn!(
                        base_id = %base_id,
                        overlay = %overlay_name,
                        kind = e.kind(),
                        error = %e,
                        "Failed to merge overlay"
                    );
                    if matches!(e, OverlayError::Replacement(ReplaceError::RemoveOverlay { .. })) {
                        main_changed = true;
                    }
                    failures.push(OverlayFailure {
                        overlay: overlay_name,
                        kind: e.kind().to_string(),
                        message: e.to_string(),
                    });
                    if e.halts_group() {
                        warn!(
                            base_id = %base_id,
                            staged = %staging_path(&main.path).display(),
                            "Merged result kept for recovery; stopping group"
                        );
                        break;
                    }
                    if !self.policy.continue_after_failure {
                        break;
                    }
                }
            }
        }

        // Nothing changed, so the backup would only duplicate the main asset.
        if let (Some(path), false) = (&backup, main_changed) {
            if let Err(e) = remove_if_exists(path) {
                debug!(backup = %path.display(), error = %e, "Could not remove unused backup");
            }
        }

        let result = MergeResult::attempted(base_id, Some(main_name), overlays.len(), applied, failures);
        match result.outcome {
            MergeOutcome::Merged => info!(base_id = %result.base_id, "Group merged"),
            outcome => warn!(
                base_id = %result.base_id,
                outcome = %outcome,
                applied = result.overlays_applied,
                failed = result.overlays_failed,
                not_attempted = result.overlays_not_attempted,
                "Group not fully merged"
            ),
        }
        result
    }

    /// Composites one overlay into a staged file and swaps it over the main.
    ///
    /// A failed composite leaves no staged file behind. A failed swap keeps
    /// the staged file for recovery.
    async fn apply_overlay(
        &self,
        compositor: &dyn Compositor,
        main: &Asset,
        overlay: &OverlayAsset,
    ) -> Result<(), OverlayError> {
        if !overlay.asset.path.is_file() {
            return Err(OverlayError::OverlayMissing(overlay.asset.path.clone()));
        }

        let staged = staging_path(&main.path);
        if let Err(e) = compositor
            .compose(&main.path, &overlay.asset.path, &staged)
            .await
        {
            let _ = remove_if_exists(&staged);
            return Err(e.into());
        }

        atomic_replace(&main.path, &staged)?;
        remove_consumed_overlay(&overlay.asset.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::{ScriptedRunner, Step};
    use async_trait::async_trait;
    use image::{Rgba, RgbaImage};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// What the next composite does to the filesystem.
    #[derive(Debug, Clone, Copy)]
    enum Fault {
        /// Stage a directory, so renaming it over the main file fails.
        StageDirectory,
        /// Stage a good result, then put a directory where the overlay was.
        PinOverlay,
    }

    #[derive(Debug)]
    struct FaultyCompositor {
        fault: Fault,
        calls: AtomicUsize,
    }

    impl FaultyCompositor {
        fn new(fault: Fault) -> Arc<Self> {
            Arc::new(Self {
                fault,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Compositor for FaultyCompositor {
        async fn compose(
            &self,
            _main: &Path,
            overlay: &Path,
            output: &Path,
        ) -> Result<(), ComposeError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fault {
                Fault::StageDirectory => {
                    fs::create_dir(output)?;
                    fs::write(output.join("frame"), format!("composite {}", call))?;
                }
                Fault::PinOverlay => {
                    fs::write(output, b"merged")?;
                    fs::remove_file(overlay)?;
                    fs::create_dir(overlay)?;
                }
            }
            Ok(())
        }
    }

    fn faulty_coordinator(config: Config, image: Arc<FaultyCompositor>) -> MergeCoordinator {
        let video = Arc::new(VideoCompositor::with_runner(
            VideoEncodeParams::from_config(&config),
            Arc::new(ScriptedRunner::new([])),
        ));
        MergeCoordinator::with_compositors(config, image, video)
    }

    fn list(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn write_blue_jpeg(path: &Path, size: u32) {
        let img = image::RgbImage::from_pixel(size, size, image::Rgb([0, 0, 255]));
        img.save(path).unwrap();
    }

    /// Left half opaque red, right half fully transparent.
    fn write_half_red_png(path: &Path, size: u32) {
        let img = RgbaImage::from_fn(size, size, |x, _| {
            if x < size / 2 {
                Rgba([255, 0, 0, 255])
            } else {
                Rgba([0, 0, 0, 0])
            }
        });
        img.save(path).unwrap();
    }

    fn close(a: u8, b: u8) -> bool {
        (a as i16 - b as i16).abs() <= 40
    }

    fn video_coordinator(config: Config, runner: Arc<ScriptedRunner>) -> MergeCoordinator {
        let video = Arc::new(VideoCompositor::with_runner(
            VideoEncodeParams::from_config(&config),
            runner,
        ));
        let image = Arc::new(ImageCompositor::new(config.image.jpeg_quality));
        MergeCoordinator::with_compositors(config, image, video)
    }

    #[tokio::test]
    async fn test_image_overlay_is_merged_and_consumed() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let main = dir.join("20250101_1_main.jpg");
        let overlay = dir.join("20250101_1_overlay_1.png");
        write_blue_jpeg(&main, 32);
        write_half_red_png(&overlay, 32);

        let summary = MergeCoordinator::new(Config::default()).run(dir).await.unwrap();

        assert_eq!(summary.merged, 1);
        assert_eq!(summary.overlays_applied, 1);
        assert_eq!(summary.results[0].outcome, MergeOutcome::Merged);
        assert_eq!(list(dir), vec!["20250101_1_main.jpg"]);

        let merged = image::open(&main).unwrap().to_rgb8();
        assert_eq!(merged.dimensions(), (32, 32));
        let left = merged.get_pixel(4, 16);
        let right = merged.get_pixel(28, 16);
        assert!(close(left[0], 255) && close(left[1], 0) && close(left[2], 0), "{:?}", left);
        assert!(close(right[0], 0) && close(right[1], 0) && close(right[2], 255), "{:?}", right);
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let main = dir.join("20250101_1_main.jpg");
        write_blue_jpeg(&main, 16);
        write_half_red_png(&dir.join("20250101_1_overlay_1.png"), 16);

        let coordinator = MergeCoordinator::new(Config::default());
        coordinator.run(dir).await.unwrap();
        let after_first = fs::read(&main).unwrap();

        let summary = coordinator.run(dir).await.unwrap();

        assert_eq!(summary.results[0].outcome, MergeOutcome::SkippedNoOverlay);
        assert_eq!(fs::read(&main).unwrap(), after_first);
    }

    #[tokio::test]
    async fn test_missing_tool_leaves_video_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let main = dir.join("20250101_2_main.mp4");
        let overlay = dir.join("20250101_2_overlay_1.png");
        fs::write(&main, b"not really a video").unwrap();
        write_half_red_png(&overlay, 8);
        let overlay_bytes = fs::read(&overlay).unwrap();

        let mut config = Config::default();
        config.tools.ffmpeg = "/nonexistent/overlay-merge-ffmpeg".to_string();
        let summary = MergeCoordinator::new(config).run(dir).await.unwrap();

        let result = &summary.results[0];
        assert_eq!(result.outcome, MergeOutcome::Failed);
        assert_eq!(result.failures[0].kind, "tool_missing");
        assert_eq!(fs::read(&main).unwrap(), b"not really a video");
        assert_eq!(fs::read(&overlay).unwrap(), overlay_bytes);
        assert_eq!(list(dir).len(), 2);
    }

    #[tokio::test]
    async fn test_second_overlay_timeout_is_partial_failure() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let main = dir.join("clip_main.mp4");
        fs::write(&main, b"original video").unwrap();
        fs::write(dir.join("clip_overlay_1.png"), b"first").unwrap();
        fs::write(dir.join("clip_overlay_2.png"), b"second").unwrap();

        let runner = Arc::new(ScriptedRunner::new([Step::ok_with_output(), Step::Timeout]));
        let summary = video_coordinator(Config::default(), runner.clone())
            .run(dir)
            .await
            .unwrap();

        let result = &summary.results[0];
        assert_eq!(result.outcome, MergeOutcome::PartialFailure);
        assert_eq!(result.overlays_applied, 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].overlay, "clip_overlay_2.png");
        assert_eq!(result.failures[0].kind, "tool_timeout");
        assert_eq!(summary.partial, 1);

        assert_eq!(fs::read(&main).unwrap(), b"composited video");
        assert_eq!(list(dir), vec!["clip_main.mp4", "clip_overlay_2.png"]);
        assert_eq!(runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_stop_policy_leaves_remaining_overlays() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("clip_main.mp4"), b"original video").unwrap();
        for i in 1..=3 {
            fs::write(dir.join(format!("clip_overlay_{}.png", i)), b"o").unwrap();
        }

        let mut config = Config::default();
        config.merge.continue_after_failure = false;
        let runner = Arc::new(ScriptedRunner::new([Step::Timeout]));
        let summary = video_coordinator(config, runner.clone()).run(dir).await.unwrap();

        let result = &summary.results[0];
        assert_eq!(result.outcome, MergeOutcome::Failed);
        assert_eq!(result.overlays_failed, 1);
        assert_eq!(result.overlays_not_attempted, 2);
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(list(dir).len(), 4);
    }

    #[tokio::test]
    async fn test_standalone_asset_is_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let standalone = dir.join("foo.jpg");
        fs::write(&standalone, b"standalone bytes").unwrap();
        fs::write(dir.join("foo.json"), b"{}").unwrap();

        let summary = MergeCoordinator::new(Config::default()).run(dir).await.unwrap();

        assert_eq!(summary.total_groups(), 1);
        assert_eq!(summary.results[0].outcome, MergeOutcome::SkippedNoOverlay);
        assert_eq!(fs::read(&standalone).unwrap(), b"standalone bytes");
        assert_eq!(list(dir), vec!["foo.jpg", "foo.json"]);
    }

    #[tokio::test]
    async fn test_orphan_overlay_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("lost_overlay_1.png"), b"o").unwrap();

        let summary = MergeCoordinator::new(Config::default()).run(dir).await.unwrap();

        assert_eq!(summary.results[0].outcome, MergeOutcome::SkippedNoMain);
        assert_eq!(summary.skipped, 1);
        assert!(dir.join("lost_overlay_1.png").exists());
    }

    #[tokio::test]
    async fn test_unsupported_main_kind_is_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        fs::write(dir.join("pic_main.heic"), b"heic").unwrap();
        fs::write(dir.join("pic_overlay_1.png"), b"o").unwrap();

        let summary = MergeCoordinator::new(Config::default()).run(dir).await.unwrap();

        assert_eq!(summary.results[0].outcome, MergeOutcome::SkippedUnsupported);
        assert!(!summary.has_failures());
        assert_eq!(list(dir), vec!["pic_main.heic", "pic_overlay_1.png"]);
    }

    #[tokio::test]
    async fn test_corrupt_overlay_leaves_main_byte_identical() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let main = dir.join("a_main.jpg");
        write_blue_jpeg(&main, 8);
        let before = fs::read(&main).unwrap();
        fs::write(dir.join("a_overlay_1.png"), b"definitely not a png").unwrap();

        let summary = MergeCoordinator::new(Config::default()).run(dir).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.results[0].failures[0].kind, "composite_failure");
        assert_eq!(fs::read(&main).unwrap(), before);
        assert_eq!(list(dir), vec!["a_main.jpg", "a_overlay_1.png"]);
    }

    #[tokio::test]
    async fn test_vanished_overlay_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let main = temp_dir.path().join("a_main.jpg");
        write_blue_jpeg(&main, 8);

        let mut group = MediaGroup::new("a");
        group.main = Some(Asset::new(main, "jpg", MediaKind::Image));
        group.overlays.push(OverlayAsset {
            asset: Asset::new(temp_dir.path().join("a_overlay_1.png"), "png", MediaKind::Image),
            index: Some(1),
        });

        let result = MergeCoordinator::new(Config::default()).merge_group(group).await;

        assert_eq!(result.outcome, MergeOutcome::Failed);
        assert_eq!(result.failures[0].kind, "overlay_missing");
    }

    #[tokio::test]
    async fn test_keep_originals_writes_hidden_backup() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let main = dir.join("a_main.jpg");
        write_blue_jpeg(&main, 8);
        let before = fs::read(&main).unwrap();
        write_half_red_png(&dir.join("a_overlay_1.png"), 8);

        let mut config = Config::default();
        config.merge.keep_originals = true;
        let coordinator = MergeCoordinator::new(config);
        coordinator.run(dir).await.unwrap();

        let names = list(dir);
        assert_eq!(names.len(), 2);
        let backup = names.iter().find(|n| n.starts_with(".a_main.jpg.orig.")).unwrap();
        assert_eq!(fs::read(dir.join(backup)).unwrap(), before);

        // Backups are hidden, so the next scan sees only the main asset.
        let summary = coordinator.run(dir).await.unwrap();
        assert_eq!(summary.total_groups(), 1);
    }

    #[tokio::test]
    async fn test_failed_swap_keeps_staged_result_and_stops_group() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let main = dir.join("a_main.jpg");
        fs::write(&main, b"original photo").unwrap();
        fs::write(dir.join("a_overlay_1.png"), b"o1").unwrap();
        fs::write(dir.join("a_overlay_2.png"), b"o2").unwrap();

        let compositor = FaultyCompositor::new(Fault::StageDirectory);
        let summary = faulty_coordinator(Config::default(), compositor.clone())
            .run(dir)
            .await
            .unwrap();

        let result = &summary.results[0];
        assert_eq!(result.outcome, MergeOutcome::Failed);
        let kinds: Vec<&str> = result.failures.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(kinds, vec!["replacement_failure"]);
        assert_eq!(result.overlays_not_attempted, 1);
        assert_eq!(compositor.calls(), 1);

        let staged = staging_path(&main);
        assert_eq!(fs::read(staged.join("frame")).unwrap(), b"composite 0");
        assert_eq!(fs::read(&main).unwrap(), b"original photo");
        assert!(dir.join("a_overlay_1.png").is_file());
        assert!(dir.join("a_overlay_2.png").is_file());
    }

    #[tokio::test]
    async fn test_undeletable_overlay_after_swap_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let main = dir.join("a_main.jpg");
        fs::write(&main, b"original photo").unwrap();
        fs::write(dir.join("a_overlay_1.png"), b"o1").unwrap();

        let mut config = Config::default();
        config.merge.keep_originals = true;
        let compositor = FaultyCompositor::new(Fault::PinOverlay);
        let summary = faulty_coordinator(config, compositor).run(dir).await.unwrap();

        let result = &summary.results[0];
        assert_eq!(result.outcome, MergeOutcome::Failed);
        assert_eq!(result.failures[0].kind, "replacement_failure");
        assert!(result.failures[0].message.contains("a_overlay_1.png"));
        assert_eq!(fs::read(&main).unwrap(), b"merged");
        assert!(dir.join("a_overlay_1.png").exists());
        assert!(!staging_path(&main).exists());

        // The main asset changed, so its backup is kept.
        let backup = list(dir)
            .into_iter()
            .find(|n| n.starts_with(".a_main.jpg.orig."))
            .unwrap();
        assert_eq!(fs::read(dir.join(backup)).unwrap(), b"original photo");
    }

    #[tokio::test]
    async fn test_backup_survives_several_overlays_in_one_group() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        let main = dir.join("a_main.png");
        RgbaImage::from_pixel(8, 8, Rgba([0, 0, 255, 255])).save(&main).unwrap();
        let before = fs::read(&main).unwrap();
        write_half_red_png(&dir.join("a_overlay_1.png"), 8);
        write_half_red_png(&dir.join("a_overlay_2.png"), 8);

        let mut config = Config::default();
        config.merge.keep_originals = true;
        let summary = MergeCoordinator::new(config).run(dir).await.unwrap();

        assert_eq!(summary.results[0].outcome, MergeOutcome::Merged);
        let names = list(dir);
        let backups: Vec<&String> = names
            .iter()
            .filter(|n| n.starts_with(".a_main.png.orig."))
            .collect();
        assert_eq!(backups.len(), 1, "{:?}", names);
        assert_eq!(fs::read(dir.join(backups[0])).unwrap(), before);
        assert_ne!(fs::read(&main).unwrap(), before);
    }

    #[tokio::test]
    async fn test_backup_dropped_when_nothing_merged() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        write_blue_jpeg(&dir.join("a_main.jpg"), 8);
        fs::write(dir.join("a_overlay_1.png"), b"definitely not a png").unwrap();

        let mut config = Config::default();
        config.merge.keep_originals = true;
        let summary = MergeCoordinator::new(config).run(dir).await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(list(dir), vec!["a_main.jpg", "a_overlay_1.png"]);
    }

    #[tokio::test]
    async fn test_parallel_groups_report_in_group_order() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        for id in ["d", "a", "c", "b"] {
            write_blue_jpeg(&dir.join(format!("{}_main.jpg", id)), 8);
            write_half_red_png(&dir.join(format!("{}_overlay_1.png", id)), 8);
        }

        let mut config = Config::default();
        config.merge.max_parallel_groups = 3;
        let summary = MergeCoordinator::new(config).run(dir).await.unwrap();

        let ids: Vec<&str> = summary.results.iter().map(|r| r.base_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(summary.merged, 4);
        assert_eq!(list(dir).len(), 4);
    }

    #[tokio::test]
    async fn test_missing_directory_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("snapchat_memories");

        let result = MergeCoordinator::new(Config::default()).run(&missing).await;

        assert!(matches!(result, Err(ScanError::NotFound(_))));
    }
}

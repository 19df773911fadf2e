//! Per-group merge results and the run summary built from them.

use serde::{Deserialize, Serialize};

/// Final state of one group after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeOutcome {
    /// Every overlay was composited and removed.
    Merged,
    /// Overlays exist but there is no main asset to put them on.
    SkippedNoMain,
    /// Main asset with nothing to merge; left untouched.
    SkippedNoOverlay,
    /// Main asset kind has no compositor; left untouched.
    SkippedUnsupported,
    /// Some overlays merged, some failed.
    PartialFailure,
    /// No overlay could be merged.
    Failed,
}

impl MergeOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeOutcome::Merged => "merged",
            MergeOutcome::SkippedNoMain => "skipped_no_main",
            MergeOutcome::SkippedNoOverlay => "skipped_no_overlay",
            MergeOutcome::SkippedUnsupported => "skipped_unsupported",
            MergeOutcome::PartialFailure => "partial_failure",
            MergeOutcome::Failed => "failed",
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(
            self,
            MergeOutcome::SkippedNoMain
                | MergeOutcome::SkippedNoOverlay
                | MergeOutcome::SkippedUnsupported
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, MergeOutcome::PartialFailure | MergeOutcome::Failed)
    }
}

impl std::fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One overlay that could not be merged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OverlayFailure {
    pub overlay: String,
    pub kind: String,
    pub message: String,
}

/// Outcome and counts for one group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MergeResult {
    pub base_id: String,
    pub outcome: MergeOutcome,
    pub main: Option<String>,
    pub overlays_total: usize,
    pub overlays_applied: usize,
    pub overlays_failed: usize,
    /// Overlays left alone because an earlier one failed and the group was stopped.
    pub overlays_not_attempted: usize,
    pub failures: Vec<OverlayFailure>,
}

impl MergeResult {
    /// A group that was not touched.
    pub fn skipped(
        base_id: impl Into<String>,
        outcome: MergeOutcome,
        main: Option<String>,
        overlays_total: usize,
    ) -> Self {
        Self {
            base_id: base_id.into(),
            outcome,
            main,
            overlays_total,
            overlays_applied: 0,
            overlays_failed: 0,
            overlays_not_attempted: overlays_total,
            failures: Vec::new(),
        }
    }

    /// A group whose overlays were attempted.
    ///
    /// The outcome is merged when every overlay landed, partial when at least
    /// one landed and at least one did not, and failed when none landed.
    pub fn attempted(
        base_id: impl Into<String>,
        main: Option<String>,
        overlays_total: usize,
        overlays_applied: usize,
        failures: Vec<OverlayFailure>,
    ) -> Self {
        let overlays_failed = failures.len();
        let overlays_not_attempted = overlays_total.saturating_sub(overlays_applied + overlays_failed);
        let outcome = if overlays_applied == overlays_total {
            MergeOutcome::Merged
        } else if overlays_applied > 0 {
            MergeOutcome::PartialFailure
        } else {
            MergeOutcome::Failed
        };

        Self {
            base_id: base_id.into(),
            outcome,
            main,
            overlays_total,
            overlays_applied,
            overlays_failed,
            overlays_not_attempted,
            failures,
        }
    }
}

/// Aggregate of all group results for one run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub directory: String,
    pub results: Vec<MergeResult>,
    pub merged: usize,
    pub skipped: usize,
    pub partial: usize,
    pub failed: usize,
    pub overlays_applied: usize,
}

impl RunSummary {
    pub fn from_results(directory: impl Into<String>, results: Vec<MergeResult>) -> Self {
        let mut summary = Self {
            directory: directory.into(),
            ..Self::default()
        };

        for result in &results {
            summary.overlays_applied += result.overlays_applied;
            match result.outcome {
                MergeOutcome::Merged => summary.merged += 1,
                MergeOutcome::PartialFailure => summary.partial += 1,
                MergeOutcome::Failed => summary.failed += 1,
                _ => summary.skipped += 1,
            }
        }

        summary.results = results;
        summary
    }

    pub fn total_groups(&self) -> usize {
        self.results.len()
    }

    /// True if any group ended partial or failed.
    pub fn has_failures(&self) -> bool {
        self.partial > 0 || self.failed > 0
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

//! Batch report types.
//!
//! A [`BatchReport`] lists one [`EntryOutcome`] per image entry that was
//! processed, in input order, plus the entries that were skipped and why the
//! batch stopped early, if it did.

use serde::Serialize;
use std::fmt;

/// What happened to every image entry of a batch.
#[derive(Clone, Debug, Default, Serialize)]
pub struct BatchReport {
    /// Number of image entries found in the input archive.
    pub total: usize,
    /// Entries not recognized as images (directories excluded).
    pub skipped: Vec<String>,
    /// One outcome per processed entry, in input order.
    pub outcomes: Vec<EntryOutcome>,
    /// Set when the batch stopped before every image was processed.
    pub stop_reason: Option<StopReason>,
}

impl BatchReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Default::default()
        }
    }

    pub fn push(&mut self, outcome: EntryOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn exported_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_failed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failed()).count()
    }

    /// Image entries never reached because the batch stopped early.
    pub fn not_processed(&self) -> usize {
        self.total.saturating_sub(self.outcomes.len())
    }

    /// True if every image entry was exported.
    pub fn is_complete(&self) -> bool {
        self.stop_reason.is_none() && self.failed_count() == 0 && self.not_processed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &EntryOutcome> {
        self.outcomes.iter().filter(|o| o.is_failed())
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "  {} image(s): {} exported, {} failed, {} not processed",
            self.total,
            self.exported_count(),
            self.failed_count(),
            self.not_processed()
        )?;

        if !self.skipped.is_empty() {
            writeln!(f, "  skipped {} non-image entries", self.skipped.len())?;
        }

        if let Some(reason) = &self.stop_reason {
            writeln!(f, "  stopped early: {reason}")?;
        }

        let failed = self.failed_count();
        if failed > 0 {
            writeln!(f)?;
            writeln!(f, "Failures ({}):", failed)?;
            for outcome in self.failures() {
                if let EntryOutcome::Failed {
                    entry,
                    kind,
                    message,
                } = outcome
                {
                    writeln!(f, "  - {entry} [{kind}]: {message}")?;
                }
            }
        }

        Ok(())
    }
}

/// Result of processing one image entry.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EntryOutcome {
    /// An export entry named `output` was written.
    Exported {
        entry: String,
        output: String,
        detections: usize,
    },
    /// No export entry was written for `entry`.
    Failed {
        entry: String,
        kind: FailureKind,
        message: String,
    },
}

impl EntryOutcome {
    pub fn entry(&self) -> &str {
        match self {
            EntryOutcome::Exported { entry, .. } | EntryOutcome::Failed { entry, .. } => entry,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, EntryOutcome::Failed { .. })
    }
}

/// Stage at which an entry failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Read,
    Decode,
    Inference,
    InvalidBox,
    Export,
    DuplicateOutput,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Read => "read",
            FailureKind::Decode => "decode",
            FailureKind::Inference => "inference",
            FailureKind::InvalidBox => "invalid box",
            FailureKind::Export => "export",
            FailureKind::DuplicateOutput => "duplicate output",
        };
        f.write_str(s)
    }
}

/// Why a batch stopped before processing every image.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum StopReason {
    Cancelled,
    FailFast { entry: String },
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Cancelled => f.write_str("cancelled"),
            StopReason::FailFast { entry } => write!(f, "fail-fast after '{entry}'"),
        }
    }
}

/// Progress event, emitted after each entry is written or recorded as failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Progress<'a> {
    pub completed: usize,
    pub total: usize,
    pub entry: &'a str,
}

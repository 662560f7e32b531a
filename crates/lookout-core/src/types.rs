use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a [`Review`].
///
/// Transitions only move forward: `queued → in_progress → completed | failed`.
///
/// # Examples
///
/// ```
/// use lookout_core::ReviewStatus;
///
/// assert!(ReviewStatus::Queued.can_transition_to(ReviewStatus::InProgress));
/// assert!(!ReviewStatus::Completed.can_transition_to(ReviewStatus::Failed));
/// assert_eq!(ReviewStatus::InProgress.to_string(), "in_progress");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    /// Created from a webhook delivery, waiting for a worker.
    #[default]
    Queued,
    /// A pipeline run has picked the review up.
    InProgress,
    /// Findings were published and persisted.
    Completed,
    /// The run stopped on an error; the summary carries the detail.
    Failed,
}

impl ReviewStatus {
    /// Stable string form used in storage and JSON.
    pub fn as_str(self) -> &'static str {
        match self {
            ReviewStatus::Queued => "queued",
            ReviewStatus::InProgress => "in_progress",
            ReviewStatus::Completed => "completed",
            ReviewStatus::Failed => "failed",
        }
    }

    /// Returns `true` for `completed` and `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ReviewStatus::Completed | ReviewStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    pub fn can_transition_to(self, next: ReviewStatus) -> bool {
        matches!(
            (self, next),
            (ReviewStatus::Queued, ReviewStatus::InProgress)
                | (ReviewStatus::InProgress, ReviewStatus::Completed)
                | (ReviewStatus::InProgress, ReviewStatus::Failed)
        )
    }

    /// The statuses a review may be in immediately before entering `self`.
    pub fn predecessors(self) -> &'static [ReviewStatus] {
        match self {
            ReviewStatus::Queued => &[],
            ReviewStatus::InProgress => &[ReviewStatus::Queued],
            ReviewStatus::Completed | ReviewStatus::Failed => &[ReviewStatus::InProgress],
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(ReviewStatus::Queued),
            "in_progress" => Ok(ReviewStatus::InProgress),
            "completed" => Ok(ReviewStatus::Completed),
            "failed" => Ok(ReviewStatus::Failed),
            other => Err(format!("unknown review status: {other}")),
        }
    }
}

/// Issue severity level for review comments.
///
/// # Examples
///
/// ```
/// use lookout_core::Severity;
///
/// let s: Severity = serde_json::from_str("\"critical\"").unwrap();
/// assert_eq!(s, Severity::Critical);
/// assert_eq!(Severity::default(), Severity::Info);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational observation.
    #[default]
    Info,
    /// A potential issue worth investigating.
    Warning,
    /// A defect or vulnerability that should block the merge.
    Critical,
}

impl Severity {
    /// Upper-case label used in the published Markdown body.
    pub fn label(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

/// One tracked pull request analysis.
///
/// Exactly one review exists per accepted webhook delivery; a re-delivery for
/// the same pull request creates a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    /// Opaque UUID assigned at creation.
    pub id: String,
    /// Repository full name, `owner/name`.
    pub repo: String,
    /// Pull request number within the repository.
    pub pr_number: u64,
    /// Current lifecycle status.
    pub status: ReviewStatus,
    /// Free-form summary: webhook note, model summary, or failure detail.
    pub summary: String,
    /// Creation time (UTC).
    pub created_at: DateTime<Utc>,
    /// Findings attached to this review.
    #[serde(default)]
    pub comments: Vec<ReviewComment>,
}

/// A persisted finding attached to a [`Review`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    /// Row identifier.
    pub id: i64,
    /// Owning review.
    pub review_id: String,
    /// Path of the file the finding is about.
    pub file_path: String,
    /// First line of the range.
    pub line_start: u32,
    /// Last line of the range, never below `line_start`.
    pub line_end: u32,
    /// Explanation of the finding.
    pub message: String,
    /// Severity of the finding.
    pub severity: Severity,
}

/// A finding that has not been persisted yet.
///
/// # Examples
///
/// ```
/// use lookout_core::{NewReviewComment, Severity};
///
/// let c: NewReviewComment = serde_json::from_str(
///     r#"{"file_path":"a.rs","line_start":3,"line_end":4,"message":"x"}"#,
/// ).unwrap();
/// assert_eq!(c.severity, Severity::Info);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReviewComment {
    pub file_path: String,
    pub line_start: u32,
    pub line_end: u32,
    pub message: String,
    #[serde(default)]
    pub severity: Severity,
}

/// Pull request metadata used to build the review prompt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestMeta {
    #[serde(default)]
    pub number: u64,
    #[serde(default)]
    pub title: String,
    /// Description; `None` when the author left it empty.
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
}

/// Change status of a file within a pull request.
///
/// # Examples
///
/// ```
/// use lookout_core::FileStatus;
///
/// let s: FileStatus = serde_json::from_str("\"renamed\"").unwrap();
/// assert_eq!(s, FileStatus::Renamed);
/// let other: FileStatus = serde_json::from_str("\"mystery\"").unwrap();
/// assert_eq!(other, FileStatus::Other);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
    Renamed,
    Copied,
    Changed,
    Unchanged,
    /// Any status the platform adds later.
    #[serde(other)]
    Other,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Added => "added",
            FileStatus::Modified => "modified",
            FileStatus::Removed => "removed",
            FileStatus::Renamed => "renamed",
            FileStatus::Copied => "copied",
            FileStatus::Changed => "changed",
            FileStatus::Unchanged => "unchanged",
            FileStatus::Other => "other",
        };
        f.write_str(s)
    }
}

/// A changed file in a pull request, as returned by the files listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    /// Path of the file after the change.
    #[serde(rename = "filename")]
    pub path: String,
    pub status: FileStatus,
    /// Unified diff text; absent for binary or oversized files.
    #[serde(default)]
    pub patch: Option<String>,
}

/// Model output after boundary validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedReview {
    pub summary: String,
    pub comments: Vec<NewReviewComment>,
}

/// Short-lived credential scoped to one app installation.
///
/// Never cached across pipeline runs. `Debug` redacts the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct InstallationToken(String);

impl InstallationToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The bearer string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("InstallationToken(***)")
    }
}

/// Event kind attached to a posted pull request review.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewEvent {
    #[default]
    Comment,
    Approve,
    RequestChanges,
}

impl fmt::Display for ReviewEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewEvent::Comment => write!(f, "COMMENT"),
            ReviewEvent::Approve => write!(f, "APPROVE"),
            ReviewEvent::RequestChanges => write!(f, "REQUEST_CHANGES"),
        }
    }
}

/// Output format for CLI subcommands.
///
/// # Examples
///
/// ```
/// use lookout_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable tables and summaries.
    #[default]
    Text,
    /// Machine-readable JSON.
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ReviewStatus; 4] = [
        ReviewStatus::Queued,
        ReviewStatus::InProgress,
        ReviewStatus::Completed,
        ReviewStatus::Failed,
    ];

    #[test]
    fn terminal_statuses_have_no_exits() {
        for from in ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn transitions_never_go_backwards() {
        assert!(!ReviewStatus::InProgress.can_transition_to(ReviewStatus::Queued));
        assert!(!ReviewStatus::Queued.can_transition_to(ReviewStatus::Completed));
        assert!(!ReviewStatus::Queued.can_transition_to(ReviewStatus::Failed));
        assert!(!ReviewStatus::InProgress.can_transition_to(ReviewStatus::InProgress));
    }

    #[test]
    fn predecessors_agree_with_transitions() {
        for to in ALL {
            for from in ALL {
                assert_eq!(
                    to.predecessors().contains(&from),
                    from.can_transition_to(to),
                    "{from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn status_string_forms_match() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<ReviewStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("pending".parse::<ReviewStatus>().is_err());
    }

    #[test]
    fn severity_from_str_is_case_insensitive() {
        assert_eq!("WARNING".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!(" critical ".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("bug".parse::<Severity>().is_err());
        assert_eq!(Severity::Critical.label(), "CRITICAL");
    }

    #[test]
    fn file_diff_reads_github_shape() {
        let json = r#"{"sha":"abc","filename":"src/lib.rs","status":"modified","additions":3,"patch":"@@ -1 +1 @@"}"#;
        let file: FileDiff = serde_json::from_str(json).unwrap();
        assert_eq!(file.path, "src/lib.rs");
        assert_eq!(file.status, FileStatus::Modified);
        assert_eq!(file.patch.as_deref(), Some("@@ -1 +1 @@"));

        let binary: FileDiff =
            serde_json::from_str(r#"{"filename":"logo.png","status":"added"}"#).unwrap();
        assert!(binary.patch.is_none());
    }

    #[test]
    fn installation_token_debug_is_redacted() {
        let token = InstallationToken::new("ghs_secret");
        assert_eq!(format!("{token:?}"), "InstallationToken(***)");
        assert_eq!(token.as_str(), "ghs_secret");
    }

    #[test]
    fn review_event_serializes_screaming_case() {
        assert_eq!(
            serde_json::to_string(&ReviewEvent::RequestChanges).unwrap(),
            "\"REQUEST_CHANGES\""
        );
        assert_eq!(ReviewEvent::default().to_string(), "COMMENT");
    }

    #[test]
    fn output_format_from_str() {
        assert_eq!("JSON".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert!("xml".parse::<OutputFormat>().is_err());
    }
}

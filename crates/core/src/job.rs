//! The cached job snapshot and its lifecycle ordering.
//!
//! A [`Job`] moves forward through [`JobStatus`] stages until it reaches
//! one of the two terminal states. Updates arrive as [`JobPatch`]es that
//! only touch the fields they explicitly carry.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::analysis::{AudioAnalysis, SpeechAnalysis};
use crate::error::CoreError;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// JobStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of an analysis job.
///
/// `Pending` through `AnalyzingAudio` form a strict forward order.
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Transcribing,
    AnalyzingSpeech,
    AnalyzingAudio,
    Completed,
    Failed,
}

/// Every status in lifecycle order.
pub const ALL_STATUSES: [JobStatus; 6] = [
    JobStatus::Pending,
    JobStatus::Transcribing,
    JobStatus::AnalyzingSpeech,
    JobStatus::AnalyzingAudio,
    JobStatus::Completed,
    JobStatus::Failed,
];

impl JobStatus {
    /// Parse a wire status token.
    ///
    /// Matching is case-insensitive and treats `-`, `_` and missing
    /// separators alike, so `ANALYZING_SPEECH`, `analyzing-speech` and
    /// `analyzingSpeech` all resolve to [`JobStatus::AnalyzingSpeech`].
    /// `done` is accepted as an alias of `completed`.
    pub fn parse(token: &str) -> Result<Self, CoreError> {
        let normalized: String = token
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-' && *c != ' ')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "pending" => Ok(Self::Pending),
            "transcribing" => Ok(Self::Transcribing),
            "analyzingspeech" => Ok(Self::AnalyzingSpeech),
            "analyzingaudio" => Ok(Self::AnalyzingAudio),
            "completed" | "done" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(CoreError::UnknownStatus(token.to_string())),
        }
    }

    /// Canonical snake_case token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Transcribing => "transcribing",
            Self::AnalyzingSpeech => "analyzing_speech",
            Self::AnalyzingAudio => "analyzing_audio",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn is_in_progress(self) -> bool {
        !self.is_terminal()
    }

    /// Position within the forward (non-terminal) part of the lifecycle.
    fn stage(self) -> Option<u8> {
        match self {
            Self::Pending => Some(0),
            Self::Transcribing => Some(1),
            Self::AnalyzingSpeech => Some(2),
            Self::AnalyzingAudio => Some(3),
            Self::Completed | Self::Failed => None,
        }
    }

    /// Whether moving from `current` to `self` is a forward transition.
    ///
    /// Nothing advances from a terminal state. Both terminal states are
    /// reachable from any in-progress state; progress stages must be
    /// strictly later than `current`.
    pub fn advances_from(self, current: JobStatus) -> bool {
        if current.is_terminal() {
            return false;
        }
        match (self.stage(), current.stage()) {
            (Some(next), Some(cur)) => next > cur,
            (None, _) => true,
            (Some(_), None) => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Summary numbers shown on dashboards once a job has completed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobMetrics {
    pub filler_words_count: u32,
    /// Words per minute, rounded.
    pub speech_rate: u32,
    pub pauses_count: u32,
    pub score: f64,
}

/// Detailed analysis output attached to a completed job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub transcription: Option<String>,
    pub speech_analysis: Option<SpeechAnalysis>,
    pub audio_analysis: Option<AudioAnalysis>,
}

/// Metrics and payload delivered together when a job completes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobResult {
    pub metrics: JobMetrics,
    pub payload: JobPayload,
}

// ---------------------------------------------------------------------------
// JobPatch
// ---------------------------------------------------------------------------

/// A partial update. `None` fields leave the cached value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub filename: Option<String>,
    pub created_at: Option<Timestamp>,
    pub metrics: Option<JobMetrics>,
    pub payload: Option<JobPayload>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// A patch that sets `Completed` together with the full result.
    pub fn completed(result: JobResult) -> Self {
        Self {
            status: Some(JobStatus::Completed),
            metrics: Some(result.metrics),
            payload: Some(result.payload),
            ..Default::default()
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    pub fn with_created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = Some(created_at);
        self
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// A tracked analysis job as held in the client-side cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub filename: Option<String>,
    pub created_at: Option<Timestamp>,
    pub metrics: Option<JobMetrics>,
    pub payload: Option<JobPayload>,
}

impl Job {
    /// A freshly submitted job.
    pub fn pending(id: impl Into<JobId>, filename: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            filename: Some(filename.into()),
            created_at: Some(created_at),
            metrics: None,
            payload: None,
        }
    }

    /// A `Pending` entry that knows nothing but its id.
    pub fn placeholder(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            filename: None,
            created_at: None,
            metrics: None,
            payload: None,
        }
    }

    /// Build a new entry from a patch applied over a placeholder.
    pub fn from_patch(id: impl Into<JobId>, patch: JobPatch) -> Self {
        let mut job = Self::placeholder(id);
        job.apply(patch);
        job
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge `patch` into this entry and report whether anything changed.
    ///
    /// `filename` and `created_at` are write-once: a patch only fills them
    /// while they are still absent.
    pub fn apply(&mut self, patch: JobPatch) -> bool {
        let before = self.clone();

        if let Some(status) = patch.status {
            self.status = status;
        }
        if self.filename.is_none() {
            self.filename = patch.filename;
        }
        if self.created_at.is_none() {
            self.created_at = patch.created_at;
        }
        if let Some(metrics) = patch.metrics {
            self.metrics = Some(metrics);
        }
        if let Some(payload) = patch.payload {
            self.payload = Some(payload);
        }

        *self != before
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!(JobStatus::parse("TRANSCRIBING").unwrap(), JobStatus::Transcribing);
        assert_eq!(
            JobStatus::parse("Analyzing_Speech").unwrap(),
            JobStatus::AnalyzingSpeech
        );
        assert_eq!(
            JobStatus::parse("analyzing-audio").unwrap(),
            JobStatus::AnalyzingAudio
        );
        assert_eq!(JobStatus::parse(" failed ").unwrap(), JobStatus::Failed);
    }

    #[test]
    fn parse_accepts_done_alias() {
        assert_eq!(JobStatus::parse("DONE").unwrap(), JobStatus::Completed);
    }

    #[test]
    fn parse_rejects_unknown_token() {
        assert_matches!(
            JobStatus::parse("uploading"),
            Err(CoreError::UnknownStatus(t)) if t == "uploading"
        );
    }

    #[test]
    fn as_str_round_trips_through_parse() {
        for status in ALL_STATUSES {
            assert_eq!(JobStatus::parse(status.as_str()).unwrap(), status);
        }
    }

    #[test]
    fn progress_stages_only_move_forward() {
        use JobStatus::*;
        assert!(Transcribing.advances_from(Pending));
        assert!(AnalyzingAudio.advances_from(Transcribing));
        assert!(!Transcribing.advances_from(AnalyzingAudio));
        assert!(!Transcribing.advances_from(Transcribing));
    }

    #[test]
    fn terminal_states_reachable_from_any_progress_stage() {
        use JobStatus::*;
        for current in [Pending, Transcribing, AnalyzingSpeech, AnalyzingAudio] {
            assert!(Failed.advances_from(current));
            assert!(Completed.advances_from(current));
        }
    }

    #[test]
    fn nothing_advances_from_terminal() {
        for status in ALL_STATUSES {
            assert!(!status.advances_from(JobStatus::Completed));
            assert!(!status.advances_from(JobStatus::Failed));
        }
    }

    #[test]
    fn apply_leaves_omitted_fields_untouched() {
        let mut job = Job::pending("abc", "talk.mp3", chrono::Utc::now());
        let changed = job.apply(JobPatch::status(JobStatus::Transcribing));

        assert!(changed);
        assert_eq!(job.status, JobStatus::Transcribing);
        assert_eq!(job.filename.as_deref(), Some("talk.mp3"));
        assert!(job.created_at.is_some());
    }

    #[test]
    fn apply_never_overwrites_filename() {
        let mut job = Job::pending("abc", "talk.mp3", chrono::Utc::now());
        job.apply(JobPatch::default().with_filename("other.mp3"));
        assert_eq!(job.filename.as_deref(), Some("talk.mp3"));

        let mut placeholder = Job::placeholder("abc");
        placeholder.apply(JobPatch::default().with_filename("late.mp3"));
        assert_eq!(placeholder.filename.as_deref(), Some("late.mp3"));
    }

    #[test]
    fn apply_reports_no_change_for_identical_patch() {
        let mut job = Job::placeholder("abc");
        assert!(!job.apply(JobPatch::status(JobStatus::Pending)));
    }

    #[test]
    fn completed_patch_carries_status_and_result() {
        let result = JobResult {
            metrics: JobMetrics {
                score: 82.0,
                ..Default::default()
            },
            payload: JobPayload::default(),
        };
        let job = Job::from_patch("abc", JobPatch::completed(result));

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.metrics.as_ref().map(|m| m.score), Some(82.0));
        assert!(job.payload.is_some());
    }
}

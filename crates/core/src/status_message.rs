//! Human-readable progress text for lifecycle statuses.
//!
//! [`status_message`] is total over arbitrary tokens: anything that does
//! not parse as a known [`JobStatus`] degrades to [`MSG_PROCESSING`].

use crate::job::JobStatus;

/// Shown before the first event arrives on a fresh subscription.
pub const MSG_CONNECTING: &str = "Connecting...";

/// Shown while the push channel is being re-established.
pub const MSG_RECONNECTING: &str = "Connection error. Reconnecting...";

/// Fallback for status values this client does not know.
pub const MSG_PROCESSING: &str = "Processing...";

impl JobStatus {
    pub fn message(self) -> &'static str {
        match self {
            Self::Pending => "Waiting to start...",
            Self::Transcribing => "Transcribing audio...",
            Self::AnalyzingSpeech => "Analyzing speech...",
            Self::AnalyzingAudio => "Analyzing audio...",
            Self::Completed => "Analysis complete!",
            Self::Failed => "Analysis failed.",
        }
    }
}

/// Map a raw status token to progress text.
pub fn status_message(token: &str) -> &'static str {
    JobStatus::parse(token).map_or(MSG_PROCESSING, JobStatus::message)
}

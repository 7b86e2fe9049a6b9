//! The analysis document published by the Analysis Service.
//!
//! The same camelCase JSON shape is returned by `GET /v2/analysis/{id}`
//! and pushed as the body of the `analysis_result` stream event. Every
//! field is optional on the wire; [`AnalysisDocument::result`] derives the
//! dashboard metrics with zero defaults for anything missing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::job::{Job, JobMetrics, JobPatch, JobPayload, JobResult, JobStatus};
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Speech analysis
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Silence {
    pub start: f64,
    pub end: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SilenceAnalysis {
    pub duration: f64,
    pub silences: Vec<Silence>,
    pub pauses: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FillerwordOccurrence {
    pub start: f64,
    pub end: f64,
    pub word: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FillerwordAnalysis {
    pub total: u32,
    /// Occurrence count per filler word.
    pub distribution: BTreeMap<String, u32>,
    pub occurrences: Vec<FillerwordOccurrence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VocabularySuggestion {
    pub word: String,
    pub count: u32,
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VocabularyAnalysis {
    pub suggestions: Vec<VocabularySuggestion>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LexicalRichnessAnalysis {
    pub type_token_ratio: f64,
    pub unique_words: u32,
    pub total_words: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Topic {
    pub topic: String,
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TopicAnalysis {
    pub topics: Vec<Topic>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SpeechAnalysis {
    pub silence_analysis: Option<SilenceAnalysis>,
    pub fillerwords_analysis: Option<FillerwordAnalysis>,
    pub vocabulary_analysis: Option<VocabularyAnalysis>,
    pub lexical_richness_analysis: Option<LexicalRichnessAnalysis>,
    pub topic_analysis: Option<TopicAnalysis>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AudioAnalysis {
    /// Words per minute.
    pub speech_rate: f64,
    /// Seconds.
    pub duration: f64,
}

// ---------------------------------------------------------------------------
// AnalysisDocument
// ---------------------------------------------------------------------------

/// A full job snapshot as served by the Analysis Service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisDocument {
    pub id: Option<JobId>,
    /// Raw status token; parsed lazily so unknown values do not reject
    /// the whole document.
    pub status: Option<String>,
    pub filename: Option<String>,
    pub created_at: Option<String>,
    pub transcription: Option<String>,
    pub speech_analysis: Option<SpeechAnalysis>,
    pub audio_analysis: Option<AudioAnalysis>,
    pub score: Option<f64>,
}

impl AnalysisDocument {
    /// Parse a JSON body.
    ///
    /// The body must be a JSON object whose present fields have the
    /// expected types; anything else is [`CoreError::MalformedResult`].
    pub fn from_json(raw: &str) -> Result<Self, CoreError> {
        let value: serde_json::Value =
            serde_json::from_str(raw).map_err(|e| CoreError::MalformedResult(e.to_string()))?;
        if !value.is_object() {
            return Err(CoreError::MalformedResult(
                "expected a JSON object".to_string(),
            ));
        }
        serde_json::from_value(value).map_err(|e| CoreError::MalformedResult(e.to_string()))
    }

    /// The parsed status, if the document carries one.
    pub fn parsed_status(&self) -> Option<Result<JobStatus, CoreError>> {
        self.status.as_deref().map(JobStatus::parse)
    }

    /// `createdAt` as a UTC timestamp, when present and RFC 3339.
    pub fn created_at(&self) -> Option<Timestamp> {
        self.created_at
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
    }

    /// Dashboard metrics derived from the nested analyses.
    pub fn metrics(&self) -> JobMetrics {
        let speech = self.speech_analysis.as_ref();
        JobMetrics {
            filler_words_count: speech
                .and_then(|s| s.fillerwords_analysis.as_ref())
                .map_or(0, |f| f.total),
            speech_rate: self
                .audio_analysis
                .as_ref()
                .map_or(0, |a| a.speech_rate.max(0.0).round() as u32),
            pauses_count: speech
                .and_then(|s| s.silence_analysis.as_ref())
                .map_or(0, |s| s.pauses),
            score: self.score.unwrap_or(0.0),
        }
    }

    pub fn payload(&self) -> JobPayload {
        JobPayload {
            transcription: self.transcription.clone(),
            speech_analysis: self.speech_analysis.clone(),
            audio_analysis: self.audio_analysis.clone(),
        }
    }

    pub fn result(&self) -> JobResult {
        JobResult {
            metrics: self.metrics(),
            payload: self.payload(),
        }
    }

    /// Convert a fetched snapshot into a cache entry for `id`.
    ///
    /// A `completed` snapshot carries its result; an unknown or missing
    /// status falls back to `Pending`.
    pub fn into_job(self, id: impl Into<JobId>) -> Job {
        let status = match self.parsed_status() {
            Some(Ok(status)) => status,
            _ => JobStatus::Pending,
        };

        let mut patch = if status == JobStatus::Completed {
            JobPatch::completed(self.result())
        } else {
            JobPatch::status(status)
        };
        patch.created_at = self.created_at();
        patch.filename = self.filename;

        Job::from_patch(id, patch)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const FULL_DOCUMENT: &str = r#"{
        "id": "abc",
        "status": "completed",
        "filename": "pitch.mp3",
        "createdAt": "2026-03-01T12:00:00Z",
        "transcription": "hello there",
        "speechAnalysis": {
            "silenceAnalysis": {"duration": 4.5, "silences": [{"start": 1.0, "end": 2.5, "duration": 1.5}], "pauses": 3},
            "fillerwordsAnalysis": {"total": 7, "distribution": {"um": 5, "like": 2}, "occurrences": []},
            "lexicalRichnessAnalysis": {"typeTokenRatio": 0.42, "uniqueWords": 120, "totalWords": 285}
        },
        "audioAnalysis": {"speechRate": 142.6, "duration": 61.0},
        "score": 82
    }"#;

    #[test]
    fn full_document_derives_metrics() {
        let doc = AnalysisDocument::from_json(FULL_DOCUMENT).unwrap();
        let metrics = doc.metrics();

        assert_eq!(metrics.filler_words_count, 7);
        assert_eq!(metrics.speech_rate, 143);
        assert_eq!(metrics.pauses_count, 3);
        assert_eq!(metrics.score, 82.0);
    }

    #[test]
    fn nested_fields_are_camel_case() {
        let doc = AnalysisDocument::from_json(FULL_DOCUMENT).unwrap();
        let lexical = doc
            .speech_analysis
            .as_ref()
            .and_then(|s| s.lexical_richness_analysis.as_ref())
            .expect("lexical richness should parse");
        assert_eq!(lexical.unique_words, 120);
        assert_eq!(doc.created_at().map(|t| t.to_rfc3339()).as_deref(), Some("2026-03-01T12:00:00+00:00"));
    }

    #[test]
    fn minimal_document_defaults_to_zero_metrics() {
        let doc = AnalysisDocument::from_json(r#"{"status":"completed","score":82}"#).unwrap();
        let metrics = doc.metrics();

        assert_eq!(metrics.filler_words_count, 0);
        assert_eq!(metrics.speech_rate, 0);
        assert_eq!(metrics.pauses_count, 0);
        assert_eq!(metrics.score, 82.0);
    }

    #[test]
    fn non_object_body_is_malformed() {
        assert_matches!(
            AnalysisDocument::from_json(r#"["completed", 82]"#),
            Err(CoreError::MalformedResult(_))
        );
        assert_matches!(
            AnalysisDocument::from_json("not json"),
            Err(CoreError::MalformedResult(_))
        );
    }

    #[test]
    fn wrongly_typed_field_is_malformed() {
        assert_matches!(
            AnalysisDocument::from_json(r#"{"status":"completed","score":"eighty"}"#),
            Err(CoreError::MalformedResult(_))
        );
    }

    #[test]
    fn into_job_keeps_result_for_completed_snapshot() {
        let job = AnalysisDocument::from_json(FULL_DOCUMENT).unwrap().into_job("abc");

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.filename.as_deref(), Some("pitch.mp3"));
        assert_eq!(job.metrics.as_ref().map(|m| m.pauses_count), Some(3));
        assert_eq!(
            job.payload.as_ref().and_then(|p| p.transcription.as_deref()),
            Some("hello there")
        );
    }

    #[test]
    fn into_job_omits_result_while_in_progress() {
        let job = AnalysisDocument::from_json(r#"{"status":"TRANSCRIBING","filename":"a.wav"}"#)
            .unwrap()
            .into_job("abc");

        assert_eq!(job.status, JobStatus::Transcribing);
        assert!(job.metrics.is_none());
        assert!(job.payload.is_none());
    }

    #[test]
    fn into_job_with_unknown_status_is_pending() {
        let job = AnalysisDocument::from_json(r#"{"status":"queued"}"#)
            .unwrap()
            .into_job("abc");
        assert_eq!(job.status, JobStatus::Pending);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Lifecycle of a transcription job
///
/// Legal transitions: `Queued → Mixing → Transcribing → Completed | Failed`,
/// plus `Mixing → Failed`. `Transcribing` is never entered without a prior
/// `Mixing`, even when the inputs already look mixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
	Queued,
	Mixing,
	Transcribing,
	Completed,
	Failed,
}

impl JobStatus {
	/// Terminal states are never left and are the only ones `purge_terminal` removes
	#[must_use]
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Completed | Self::Failed)
	}

	/// Active states count against the single-worker concurrency limit
	#[must_use]
	pub const fn is_active(self) -> bool {
		matches!(self, Self::Mixing | Self::Transcribing)
	}
}

impl std::fmt::Display for JobStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let s = match self {
			Self::Queued => "queued",
			Self::Mixing => "mixing",
			Self::Transcribing => "transcribing",
			Self::Completed => "completed",
			Self::Failed => "failed",
		};
		f.write_str(s)
	}
}

/// One request to mix a pair of audio tracks and transcribe the result
///
/// The queue manager owns the authoritative record for the job's entire
/// lifetime; the worker only ever receives a per-message copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionJob {
	pub id: Uuid,

	/// Owning meeting. Not unique across jobs - a meeting accumulates a new
	/// job on every retry.
	pub event_id: String,

	pub system_audio_path: PathBuf,
	pub mic_audio_path: PathBuf,

	/// Set once mixing succeeds
	pub mixed_audio_path: Option<PathBuf>,

	pub status: JobStatus,

	/// Percent complete, only meaningful while `Transcribing`
	pub progress: Option<u8>,

	/// Present only when `Completed`
	pub transcript: Option<String>,

	/// Human-readable failure reason, present only when `Failed`
	pub error: Option<String>,

	/// Model-name override; `None` falls back to the configured default
	pub model: Option<String>,

	pub created_at: DateTime<Utc>,
}

impl TranscriptionJob {
	pub(crate) fn new(event_id: String, system_audio_path: PathBuf, mic_audio_path: PathBuf, model: Option<String>) -> Self {
		Self {
			id: Uuid::new_v4(),
			event_id,
			system_audio_path,
			mic_audio_path,
			mixed_audio_path: None,
			status: JobStatus::Queued,
			progress: None,
			transcript: None,
			error: None,
			model,
			created_at: Utc::now(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn new_job_starts_queued() {
		let job = TranscriptionJob::new("evt-1".to_string(), PathBuf::from("/a/sys.wav"), PathBuf::from("/a/mic.wav"), None);

		assert_eq!(job.status, JobStatus::Queued);
		assert!(!job.id.is_nil());
		assert!(job.mixed_audio_path.is_none());
		assert!(job.transcript.is_none());
		assert!(job.error.is_none());
	}

	#[test]
	fn status_classification() {
		assert!(JobStatus::Completed.is_terminal());
		assert!(JobStatus::Failed.is_terminal());
		assert!(!JobStatus::Queued.is_terminal());

		assert!(JobStatus::Mixing.is_active());
		assert!(JobStatus::Transcribing.is_active());
		assert!(!JobStatus::Completed.is_active());
	}

	#[test]
	fn status_serializes_lowercase() {
		assert_eq!(serde_json::to_string(&JobStatus::Transcribing).unwrap(), "\"transcribing\"");
		assert_eq!(JobStatus::Mixing.to_string(), "mixing");
	}
}

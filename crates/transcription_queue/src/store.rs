use crate::error::Result;
use crate::job::JobStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Subset of a job worth persisting on a status transition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
	pub event_id: String,
	pub status: JobStatus,
	pub transcript: Option<String>,
	pub error: Option<String>,
	pub progress: Option<u8>,
}

/// Persistence port consumed by the queue manager
///
/// Writes are fire-and-forget from the manager's perspective: failures are
/// logged and never bounce back into the job's lifecycle.
#[async_trait]
pub trait TranscriptStore: Send + Sync {
	/// # Errors
	/// Returns an error when the underlying store rejects the write
	async fn record_transcription_result(&self, record: ResultRecord) -> Result<()>;
}

use crate::config::PipelineConfig;
use crate::engine::SttEngine;
use crate::job::JobStatus;
use crate::mixer::AudioMixer;
use crate::paths::ArtifactPaths;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One job's worth of data handed to the worker
///
/// The worker never sees the authoritative job record, only this copy.
#[derive(Debug, Clone)]
pub struct JobAssignment {
	pub job_id: Uuid,
	pub system_audio_path: PathBuf,
	pub mic_audio_path: PathBuf,
	/// Already defaulted by the manager - never empty
	pub model: String,
}

/// Field-level job mutation reported by the worker
#[derive(Debug, Clone)]
pub struct StatusUpdate {
	pub job_id: Uuid,
	pub status: JobStatus,
	pub progress: Option<u8>,
	pub mixed_audio_path: Option<PathBuf>,
	pub transcript: Option<String>,
	pub error: Option<String>,
}

impl StatusUpdate {
	fn with_status(job_id: Uuid, status: JobStatus) -> Self {
		Self {
			job_id,
			status,
			progress: None,
			mixed_audio_path: None,
			transcript: None,
			error: None,
		}
	}

	fn failed(job_id: Uuid, error: String) -> Self {
		Self {
			error: Some(error),
			..Self::with_status(job_id, JobStatus::Failed)
		}
	}
}

/// Worker-to-manager protocol
#[derive(Debug, Clone)]
pub enum WorkerEvent {
	/// Idle and able to accept the next assignment. Sent once right after
	/// startup and exactly once after every concluded job.
	Ready,
	StatusUpdate(StatusUpdate),
}

/// The worker can no longer report back to the manager
#[derive(Debug, thiserror::Error)]
#[error("Worker event channel closed")]
pub(crate) struct WorkerFault;

pub(crate) struct WorkerContext {
	pub config: PipelineConfig,
	pub mixer: Arc<dyn AudioMixer>,
	pub engine: Arc<dyn SttEngine>,
	pub paths: Arc<dyn ArtifactPaths>,
}

/// Single-job-at-a-time worker loop
///
/// Processes exactly one assignment between successive `Ready` signals. The
/// manager's busy flag guarantees no second assignment arrives in between;
/// the worker keeps no queue of its own.
///
/// Returns `Ok(())` when the assignment channel closes - the manager dropped
/// the sender on purpose. Every other exit is a fault the manager recovers
/// from.
pub(crate) async fn run_worker(ctx: WorkerContext, mut assignments: mpsc::Receiver<JobAssignment>, events: mpsc::Sender<WorkerEvent>) -> Result<(), WorkerFault> {
	info!("🏭 Transcription worker started");
	events.send(WorkerEvent::Ready).await.map_err(|_| WorkerFault)?;

	while let Some(assignment) = assignments.recv().await {
		let job_id = assignment.job_id;
		process_job(&ctx, assignment, &events).await.map_err(|_| WorkerFault)?;

		events.send(WorkerEvent::Ready).await.map_err(|_| WorkerFault)?;
		debug!(%job_id, "Worker ready for next assignment");
	}

	info!("Transcription worker shutting down (assignment channel closed)");
	Ok(())
}

type SendResult = Result<(), mpsc::error::SendError<WorkerEvent>>;

async fn send_update(events: &mpsc::Sender<WorkerEvent>, update: StatusUpdate) -> SendResult {
	events.send(WorkerEvent::StatusUpdate(update)).await
}

/// Drive one job through mix → transcribe
///
/// Job-level failures are reported as `Failed` updates and return `Ok`; only
/// the inability to emit events escapes as an error.
async fn process_job(ctx: &WorkerContext, assignment: JobAssignment, events: &mpsc::Sender<WorkerEvent>) -> SendResult {
	let job_id = assignment.job_id;
	info!(%job_id, model = %assignment.model, "📥 Processing transcription job");

	send_update(events, StatusUpdate::with_status(job_id, JobStatus::Mixing)).await?;

	let mixed_target = ctx.config.scratch_dir().join(format!("mixed-{job_id}.wav"));
	let mixed = match ctx.mixer.mix(&assignment.system_audio_path, &assignment.mic_audio_path, &mixed_target).await {
		Ok(path) => path,
		Err(e) => {
			warn!(%job_id, error = %e, "Audio mix failed");
			return send_update(events, StatusUpdate::failed(job_id, format!("Mixing failed: {e}"))).await;
		}
	};

	let mut update = StatusUpdate::with_status(job_id, JobStatus::Transcribing);
	update.progress = Some(0);
	update.mixed_audio_path = Some(mixed.clone());
	send_update(events, update).await?;

	// Per-job artifact validation: a missing file fails this job, not the worker
	let engine_binary = ctx.paths.engine_binary();
	if !engine_binary.is_file() {
		warn!(%job_id, path = %engine_binary.display(), "Transcription engine missing");
		return send_update(events, StatusUpdate::failed(job_id, format!("Transcription engine not found at {}", engine_binary.display()))).await;
	}

	let model_file = ctx.paths.model_file(&assignment.model);
	if !model_file.is_file() {
		warn!(%job_id, path = %model_file.display(), "Model file missing");
		return send_update(
			events,
			StatusUpdate::failed(job_id, format!("Model {} not found at {}", assignment.model, model_file.display())),
		)
		.await;
	}

	let (progress_tx, mut progress_rx) = mpsc::channel(16);
	let transcribe = ctx.engine.transcribe(&model_file, &mixed, progress_tx);
	tokio::pin!(transcribe);

	let outcome = loop {
		tokio::select! {
			Some(pct) = progress_rx.recv() => {
				let mut update = StatusUpdate::with_status(job_id, JobStatus::Transcribing);
				update.progress = Some(pct);
				send_update(events, update).await?;
			}
			result = &mut transcribe => break result,
		}
	};

	// Flush progress that raced with engine completion so updates stay ordered
	while let Ok(pct) = progress_rx.try_recv() {
		let mut update = StatusUpdate::with_status(job_id, JobStatus::Transcribing);
		update.progress = Some(pct);
		send_update(events, update).await?;
	}

	match outcome {
		Ok(transcript) => {
			info!(%job_id, chars = transcript.len(), "✅ Transcription complete");
			let mut update = StatusUpdate::with_status(job_id, JobStatus::Completed);
			update.transcript = Some(transcript);
			send_update(events, update).await
		}
		Err(e) => {
			warn!(%job_id, error = %e, "❌ Transcription failed");
			send_update(events, StatusUpdate::failed(job_id, e.to_string())).await
		}
	}
}

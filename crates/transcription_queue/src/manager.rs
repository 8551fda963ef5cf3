use crate::config::PipelineConfig;
use crate::engine::{SttEngine, WhisperCliEngine};
use crate::error::{PipelineError, Result};
use crate::job::{JobStatus, TranscriptionJob};
use crate::mixer::{AudioMixer, FfmpegMixer};
use crate::paths::{ArtifactPaths, LayoutPaths};
use crate::store::{ResultRecord, TranscriptStore};
use crate::worker::{run_worker, JobAssignment, StatusUpdate, WorkerContext, WorkerEvent, WorkerFault};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Per-worker channel capacity. At most one assignment is ever in flight, so
/// these never back up in practice.
const WORKER_CHANNEL_CAPACITY: usize = 8;

/// UI-facing notifications, carrying full job snapshots
#[derive(Debug, Clone)]
pub enum QueueEvent {
	Queued(TranscriptionJob),
	Updated(TranscriptionJob),
}

/// Per-status job counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
	pub queued: usize,
	pub mixing: usize,
	pub transcribing: usize,
	pub completed: usize,
	pub failed: usize,
}

struct WorkerHandle {
	assignments: mpsc::Sender<JobAssignment>,
	abort: AbortHandle,
	generation: u64,
}

#[derive(Default)]
struct Lifecycle {
	worker: Option<WorkerHandle>,
	/// Set while an assignment is in flight; cleared on `Ready`
	busy: bool,
	/// Set by `pause`, cleared by `resume`. Kept separate from `busy` so a
	/// worker finishing mid-pause cannot silently resume dispatch.
	paused: bool,
	/// Terminal; set by `shutdown` only
	shutdown: bool,
	consecutive_failures: u32,
	restart_timer: Option<JoinHandle<()>>,
	generation: u64,
}

/// Owner of the job list and the worker lifecycle
///
/// Accepts jobs, dispatches them FIFO to a single background worker, ingests
/// the worker's status stream, fans updates out to the store port and the UI
/// notification channel, and recreates the worker after faults - a bounded
/// number of times.
///
/// Handles are cheap to clone; all clones share one queue and one worker.
#[derive(Clone)]
pub struct QueueManager {
	inner: Arc<Inner>,
}

struct Inner {
	config: PipelineConfig,
	jobs: Mutex<Vec<TranscriptionJob>>,
	lifecycle: Mutex<Lifecycle>,
	events: broadcast::Sender<QueueEvent>,
	store: Option<Arc<dyn TranscriptStore>>,
	mixer: Arc<dyn AudioMixer>,
	engine: Arc<dyn SttEngine>,
	paths: Arc<dyn ArtifactPaths>,
}

impl QueueManager {
	#[must_use]
	pub fn new(
		config: PipelineConfig,
		mixer: Arc<dyn AudioMixer>,
		engine: Arc<dyn SttEngine>,
		paths: Arc<dyn ArtifactPaths>,
		store: Option<Arc<dyn TranscriptStore>>,
	) -> Self {
		let (events, _) = broadcast::channel(config.event_capacity);

		Self {
			inner: Arc::new(Inner {
				config,
				jobs: Mutex::new(Vec::new()),
				lifecycle: Mutex::new(Lifecycle::default()),
				events,
				store,
				mixer,
				engine,
				paths,
			}),
		}
	}

	/// Manager wired to the production collaborators: ffmpeg mixing, the
	/// whisper.cpp CLI engine, and layout-based artifact resolution
	#[must_use]
	pub fn with_default_runtime(config: PipelineConfig, store: Option<Arc<dyn TranscriptStore>>) -> Self {
		let paths: Arc<dyn ArtifactPaths> = Arc::new(LayoutPaths);
		let mixer = Arc::new(FfmpegMixer::new(Arc::clone(&paths)));
		let engine = Arc::new(WhisperCliEngine::new(Arc::clone(&paths), config.language.clone()));
		Self::new(config, mixer, engine, paths, store)
	}

	/// Queue a new transcription job
	///
	/// Returns the queued snapshot immediately; all mixing and transcription
	/// happens off the caller's context. Creates the worker on first use.
	pub fn submit(&self, event_id: impl Into<String>, system_audio_path: impl Into<PathBuf>, mic_audio_path: impl Into<PathBuf>, model: Option<String>) -> TranscriptionJob {
		let job = TranscriptionJob::new(event_id.into(), system_audio_path.into(), mic_audio_path.into(), model);
		info!(job_id = %job.id, event_id = %job.event_id, "📋 Job queued");

		self.inner.jobs_guard().push(job.clone());
		self.inner.publish(QueueEvent::Queued(job.clone()));
		self.inner.ensure_worker_or_dispatch();

		job
	}

	/// Re-submit a job's inputs as a fresh job
	///
	/// Without `job_id`, the most recent job for the event is used.
	///
	/// # Errors
	/// Fails when no prior job matches or its input files are gone from disk
	pub fn retry(&self, event_id: &str, job_id: Option<Uuid>) -> Result<TranscriptionJob> {
		let prior = {
			let jobs = self.inner.jobs_guard();
			match job_id {
				Some(id) => jobs.iter().find(|j| j.id == id && j.event_id == event_id).cloned(),
				None => jobs.iter().rev().find(|j| j.event_id == event_id).cloned(),
			}
		};

		let Some(prior) = prior else {
			return Err(PipelineError::NoRetryableJob { event_id: event_id.to_string() });
		};

		for path in [&prior.system_audio_path, &prior.mic_audio_path] {
			if !path.is_file() {
				return Err(PipelineError::InputMissing { path: path.display().to_string() });
			}
		}

		Ok(self.submit(prior.event_id, prior.system_audio_path, prior.mic_audio_path, prior.model))
	}

	/// Snapshot of every job, in insertion order
	#[must_use]
	pub fn jobs(&self) -> Vec<TranscriptionJob> {
		self.inner.jobs_guard().clone()
	}

	#[must_use]
	pub fn job(&self, id: Uuid) -> Option<TranscriptionJob> {
		self.inner.jobs_guard().iter().find(|j| j.id == id).cloned()
	}

	#[must_use]
	pub fn jobs_for_event(&self, event_id: &str) -> Vec<TranscriptionJob> {
		self.inner.jobs_guard().iter().filter(|j| j.event_id == event_id).cloned().collect()
	}

	#[must_use]
	pub fn stats(&self) -> QueueStats {
		let jobs = self.inner.jobs_guard();
		let mut stats = QueueStats::default();
		for job in jobs.iter() {
			match job.status {
				JobStatus::Queued => stats.queued += 1,
				JobStatus::Mixing => stats.mixing += 1,
				JobStatus::Transcribing => stats.transcribing += 1,
				JobStatus::Completed => stats.completed += 1,
				JobStatus::Failed => stats.failed += 1,
			}
		}
		stats
	}

	/// Subscribe to the UI notification channel
	///
	/// Slow or absent subscribers never block the pipeline; a lagging
	/// receiver observes a `Lagged` gap, not stalled jobs.
	#[must_use]
	pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
		self.inner.events.subscribe()
	}

	/// Suspend dispatch
	///
	/// With `terminate`, the worker task is aborted mid-job and recreation is
	/// suppressed (the failure counter saturates) until `resume` is called.
	pub fn pause(&self, terminate: bool) {
		let mut lc = self.inner.lifecycle_guard();
		lc.paused = true;
		info!(terminate, "⏸️ Transcription queue paused");

		if terminate {
			lc.consecutive_failures = self.inner.config.max_worker_restarts + 1;
			if let Some(timer) = lc.restart_timer.take() {
				timer.abort();
			}
			if let Some(worker) = lc.worker.take() {
				worker.abort.abort();
				info!("🛑 Worker terminated");
			}
			lc.busy = false;
		}
	}

	/// Clear the pause and restart the worker if none exists
	pub fn resume(&self) {
		{
			let mut lc = self.inner.lifecycle_guard();
			if lc.shutdown {
				return;
			}
			lc.paused = false;
			lc.consecutive_failures = 0;
			if lc.worker.is_none() {
				lc.busy = false;
			}
		}
		info!("▶️ Transcription queue resumed");
		self.inner.ensure_worker_or_dispatch();
	}

	/// Drop all jobs in a terminal state; returns how many were removed
	pub fn purge_terminal(&self) -> usize {
		let mut jobs = self.inner.jobs_guard();
		let before = jobs.len();
		jobs.retain(|j| !j.status.is_terminal());
		let removed = before - jobs.len();
		drop(jobs);

		if removed > 0 {
			info!(removed, "Purged terminal jobs");
		}
		removed
	}

	/// Stop everything. Intended for process exit only - the manager does
	/// not come back from this.
	pub fn shutdown(&self) {
		{
			let mut lc = self.inner.lifecycle_guard();
			lc.shutdown = true;
			lc.busy = false;
			if let Some(timer) = lc.restart_timer.take() {
				timer.abort();
			}
			if let Some(worker) = lc.worker.take() {
				worker.abort.abort();
			}
		}
		self.inner.jobs_guard().clear();
		info!("🛑 Transcription queue shut down");
	}
}

impl Inner {
	fn jobs_guard(&self) -> MutexGuard<'_, Vec<TranscriptionJob>> {
		self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn lifecycle_guard(&self) -> MutexGuard<'_, Lifecycle> {
		self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn publish(&self, event: QueueEvent) {
		// Err just means nobody is listening right now
		let _ = self.events.send(event);
	}

	fn exhausted(&self, lc: &Lifecycle) -> bool {
		lc.consecutive_failures > self.config.max_worker_restarts
	}

	/// Entry point for every dispatch trigger: new job, ready worker,
	/// recreated worker, resume
	fn ensure_worker_or_dispatch(self: &Arc<Self>) {
		let needs_worker = {
			let lc = self.lifecycle_guard();
			!lc.shutdown && lc.worker.is_none() && lc.restart_timer.is_none() && !self.exhausted(&lc)
		};

		if needs_worker {
			self.spawn_worker();
		} else {
			self.dispatch();
		}
	}

	/// Create the worker task after validating the executable artifacts
	///
	/// Validation failure counts as a worker fault and schedules recovery
	/// instead of retrying inline.
	fn spawn_worker(self: &Arc<Self>) {
		{
			let lc = self.lifecycle_guard();
			if lc.shutdown || lc.worker.is_some() || self.exhausted(&lc) {
				return;
			}
		}

		let engine_binary = self.paths.engine_binary();
		let ffmpeg_binary = self.paths.ffmpeg_binary();
		for (artifact, path) in [("transcription engine", &engine_binary), ("ffmpeg", &ffmpeg_binary)] {
			if !path.is_file() {
				error!(artifact, path = %path.display(), "Required artifact missing, worker not started");
				self.worker_fault(None, &format!("{artifact} missing at {}", path.display()));
				return;
			}
		}

		let (assign_tx, assign_rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);
		let (event_tx, event_rx) = mpsc::channel(WORKER_CHANNEL_CAPACITY);

		let ctx = WorkerContext {
			config: self.config.clone(),
			mixer: Arc::clone(&self.mixer),
			engine: Arc::clone(&self.engine),
			paths: Arc::clone(&self.paths),
		};
		let task = tokio::spawn(run_worker(ctx, assign_rx, event_tx));

		let generation = {
			let mut lc = self.lifecycle_guard();
			if lc.shutdown || lc.worker.is_some() {
				task.abort();
				return;
			}
			lc.generation += 1;
			lc.worker = Some(WorkerHandle {
				assignments: assign_tx,
				abort: task.abort_handle(),
				generation: lc.generation,
			});
			lc.consecutive_failures = 0;
			lc.busy = false;
			lc.generation
		};

		info!(generation, "🏭 Worker started");
		self.spawn_event_loop(event_rx, generation);
		self.spawn_monitor(task, generation);
		// The worker's startup Ready triggers the first dispatch
	}

	/// Hand the first queued job to the worker, FIFO
	fn dispatch(self: &Arc<Self>) {
		let send_failed = {
			let mut lc = self.lifecycle_guard();
			if lc.busy || lc.paused || lc.shutdown {
				return;
			}
			let Some(worker) = lc.worker.as_ref() else {
				return;
			};
			let sender = worker.assignments.clone();
			let generation = worker.generation;

			let jobs = self.jobs_guard();
			let Some(job) = jobs.iter().find(|j| j.status == JobStatus::Queued) else {
				return;
			};
			let assignment = JobAssignment {
				job_id: job.id,
				system_audio_path: job.system_audio_path.clone(),
				mic_audio_path: job.mic_audio_path.clone(),
				model: job.model.clone().unwrap_or_else(|| self.config.default_model.clone()),
			};
			let job_id = job.id;
			drop(jobs);

			lc.busy = true;
			match sender.try_send(assignment) {
				Ok(()) => {
					debug!(%job_id, "Dispatched job to worker");
					None
				}
				// The job stays Queued; the next dispatch after recovery picks it up
				Err(e) => {
					warn!(%job_id, error = %e, "Failed to hand job to worker");
					Some(generation)
				}
			}
		};

		if let Some(generation) = send_failed {
			self.worker_fault(Some(generation), "dispatch send failed");
		}
	}

	/// Ingest one worker fault and schedule bounded recovery
	///
	/// `generation` is `Some` for faults attributable to a specific worker
	/// incarnation; stale faults from an already-replaced worker are ignored.
	fn worker_fault(self: &Arc<Self>, generation: Option<u64>, reason: &str) {
		let mut lc = self.lifecycle_guard();
		if lc.shutdown {
			return;
		}

		if let Some(generation) = generation {
			match lc.worker.as_ref() {
				Some(w) if w.generation == generation => lc.worker = None,
				Some(_) => return,
				None => {}
			}
		}

		lc.busy = false;
		lc.consecutive_failures += 1;
		let failures = lc.consecutive_failures;

		if self.exhausted(&lc) {
			error!(failures, reason, "🚨 Worker failure ceiling reached; queued jobs stall until resume() is called");
			return;
		}

		if lc.restart_timer.is_some() {
			debug!(reason, "Worker recreation already scheduled");
			return;
		}

		let delay = self.config.restart_delay;
		warn!(failures, reason, delay_ms = delay.as_millis() as u64, "Worker failed, scheduling recreation");

		let inner = Arc::clone(self);
		lc.restart_timer = Some(tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			inner.lifecycle_guard().restart_timer = None;
			inner.spawn_worker();
		}));
	}

	/// Apply a status update to the authoritative record and fan it out
	fn apply_update(self: &Arc<Self>, update: StatusUpdate) {
		let snapshot = {
			let mut jobs = self.jobs_guard();
			let Some(job) = jobs.iter_mut().find(|j| j.id == update.job_id) else {
				// Possible when purge_terminal raced an in-flight job
				warn!(job_id = %update.job_id, "Status update for unknown job dropped");
				return;
			};

			job.status = update.status;
			if let Some(progress) = update.progress {
				job.progress = Some(progress);
			}
			if let Some(path) = update.mixed_audio_path {
				job.mixed_audio_path = Some(path);
			}
			if let Some(transcript) = update.transcript {
				job.transcript = Some(transcript);
			}
			if let Some(error) = update.error {
				job.error = Some(error);
			}
			if update.status.is_terminal() {
				job.progress = None;
			}

			job.clone()
		};

		debug!(job_id = %snapshot.id, status = %snapshot.status, "Job updated");
		self.publish(QueueEvent::Updated(snapshot.clone()));
		self.persist(snapshot);
	}

	/// Fire-and-forget persistence of the status-relevant subset
	fn persist(self: &Arc<Self>, job: TranscriptionJob) {
		let Some(store) = self.store.clone() else {
			return;
		};

		let record = match job.status {
			JobStatus::Completed => ResultRecord {
				event_id: job.event_id,
				status: job.status,
				transcript: job.transcript,
				error: None,
				progress: None,
			},
			JobStatus::Failed => ResultRecord {
				event_id: job.event_id,
				status: job.status,
				transcript: None,
				error: job.error,
				progress: None,
			},
			JobStatus::Transcribing => ResultRecord {
				event_id: job.event_id,
				status: job.status,
				transcript: None,
				error: None,
				progress: job.progress,
			},
			JobStatus::Queued | JobStatus::Mixing => return,
		};

		tokio::spawn(async move {
			if let Err(e) = store.record_transcription_result(record).await {
				error!(error = %e, "Failed to persist transcription result");
			}
		});
	}

	fn on_ready(self: &Arc<Self>, generation: u64) {
		{
			let mut lc = self.lifecycle_guard();
			match lc.worker.as_ref() {
				Some(w) if w.generation == generation => {}
				// Ready from a worker that has since been replaced or torn down
				_ => return,
			}
			lc.busy = false;
			lc.consecutive_failures = 0;
			if let Some(timer) = lc.restart_timer.take() {
				timer.abort();
			}
		}
		self.dispatch();
	}

	fn spawn_event_loop(self: &Arc<Self>, mut event_rx: mpsc::Receiver<WorkerEvent>, generation: u64) {
		let inner = Arc::clone(self);
		tokio::spawn(async move {
			while let Some(event) = event_rx.recv().await {
				match event {
					WorkerEvent::Ready => inner.on_ready(generation),
					WorkerEvent::StatusUpdate(update) => inner.apply_update(update),
				}
			}
			debug!(generation, "Worker event channel closed");
		});
	}

	/// Watch the worker task and translate its exit into lifecycle actions
	///
	/// Clean exit clears the handle without recreation; panics and fault
	/// returns feed the bounded recovery path; aborts were requested by us.
	fn spawn_monitor(self: &Arc<Self>, task: JoinHandle<std::result::Result<(), WorkerFault>>, generation: u64) {
		let inner = Arc::clone(self);
		tokio::spawn(async move {
			match task.await {
				Ok(Ok(())) => {
					info!(generation, "Worker exited cleanly");
					let mut lc = inner.lifecycle_guard();
					if lc.worker.as_ref().is_some_and(|w| w.generation == generation) {
						lc.worker = None;
						lc.consecutive_failures = 0;
						lc.busy = false;
					}
				}
				Ok(Err(fault)) => inner.worker_fault(Some(generation), &fault.to_string()),
				Err(join_error) if join_error.is_cancelled() => {
					debug!(generation, "Worker task cancelled");
				}
				Err(join_error) => inner.worker_fault(Some(generation), &format!("worker task panicked: {join_error}")),
			}
		});
	}
}

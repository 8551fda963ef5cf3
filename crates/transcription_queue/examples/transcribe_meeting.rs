// Submit one mix-and-transcribe job and stream its lifecycle to the console.
// Run with: cargo run --example transcribe_meeting -- <event-id> <system.wav> <mic.wav>
//
// The engine and ffmpeg binaries are resolved through the standard layout;
// point SCRIBE_ENGINE_PATH / SCRIBE_FFMPEG_PATH / SCRIBE_MODELS_DIR at your
// installation if they live elsewhere.

use anyhow::{bail, Result};
use transcription_queue::{JobStatus, PipelineConfig, QueueEvent, QueueManager};

#[tokio::main]
async fn main() -> Result<()> {
	tracing_subscriber::fmt()
		.with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
		.init();

	let mut args = std::env::args().skip(1);
	let (Some(event_id), Some(system_audio), Some(mic_audio)) = (args.next(), args.next(), args.next()) else {
		bail!("usage: transcribe_meeting <event-id> <system.wav> <mic.wav>");
	};

	let config = PipelineConfig::default();
	config.validate().map_err(|e| anyhow::anyhow!(e))?;

	let manager = QueueManager::with_default_runtime(config, None);
	let mut events = manager.subscribe();

	let job = manager.submit(event_id, system_audio, mic_audio, None);
	println!("queued job {} for event {}", job.id, job.event_id);

	loop {
		match events.recv().await? {
			QueueEvent::Updated(snapshot) if snapshot.id == job.id => match snapshot.status {
				JobStatus::Mixing => println!("mixing..."),
				JobStatus::Transcribing => println!("transcribing... {}%", snapshot.progress.unwrap_or(0)),
				JobStatus::Completed => {
					println!("\n{}", snapshot.transcript.unwrap_or_default());
					break;
				}
				JobStatus::Failed => {
					manager.shutdown();
					bail!("transcription failed: {}", snapshot.error.unwrap_or_default());
				}
				JobStatus::Queued => {}
			},
			_ => {}
		}
	}

	manager.shutdown();
	Ok(())
}

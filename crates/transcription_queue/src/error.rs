use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
	#[error("{artifact} not found at {path}")]
	ArtifactMissing { artifact: String, path: String },

	#[error("Failed to launch {binary}: {source}")]
	Spawn {
		binary: String,
		#[source]
		source: std::io::Error,
	},

	#[error("{binary} exited with code {code}: {diagnostics}")]
	NonZeroExit { binary: String, code: i32, diagnostics: String },

	#[error("No retryable job for event {event_id}")]
	NoRetryableJob { event_id: String },

	#[error("Input audio missing: {path}")]
	InputMissing { path: String },

	#[error("Storage error: {0}")]
	Store(String),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}

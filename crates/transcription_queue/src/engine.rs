use crate::error::{PipelineError, Result};
use crate::paths::ArtifactPaths;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Stderr lines retained for failure diagnostics
const DIAGNOSTIC_TAIL_LINES: usize = 20;

/// Matches the engine's progress callback output, e.g.
/// `whisper_print_progress_callback: progress =  42%`
static PROGRESS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"progress\s*=\s*(\d{1,3})%").expect("progress pattern is valid"));

/// Extract the integer percentage from an engine progress line
#[must_use]
pub fn parse_progress(line: &str) -> Option<u8> {
	let caps = PROGRESS_RE.captures(line)?;
	caps[1].parse().ok()
}

/// Speech-to-text over a mixed audio file
///
/// Progress percentages stream through `progress_tx` while the engine runs;
/// values are not required to be monotonic. The transcript is the return
/// value.
#[async_trait]
pub trait SttEngine: Send + Sync {
	/// # Errors
	/// Returns an error when the engine cannot be launched or exits non-zero
	async fn transcribe(&self, model: &Path, audio: &Path, progress_tx: mpsc::Sender<u8>) -> Result<String>;
}

/// Drives the whisper.cpp command-line engine
///
/// Contract: transcript text on stdout, diagnostics and progress lines on
/// stderr, exit code zero on success. Both pipes are drained concurrently so
/// the child never stalls on a full pipe.
pub struct WhisperCliEngine {
	paths: Arc<dyn ArtifactPaths>,
	language: String,
}

impl WhisperCliEngine {
	#[must_use]
	pub fn new(paths: Arc<dyn ArtifactPaths>, language: String) -> Self {
		Self { paths, language }
	}
}

#[async_trait]
impl SttEngine for WhisperCliEngine {
	async fn transcribe(&self, model: &Path, audio: &Path, progress_tx: mpsc::Sender<u8>) -> Result<String> {
		let binary = self.paths.engine_binary();
		debug!(engine = %binary.display(), model = %model.display(), audio = %audio.display(), "Launching transcription engine");

		let mut child = Command::new(&binary)
			.arg("-m")
			.arg(model)
			.arg("-f")
			.arg(audio)
			.arg("-l")
			.arg(&self.language)
			.arg("--no-timestamps")
			.arg("--print-progress")
			.stdin(Stdio::null())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.spawn()
			.map_err(|source| PipelineError::Spawn {
				binary: binary.display().to_string(),
				source,
			})?;

		let stderr = child.stderr.take().expect("stderr was piped");
		let mut stdout = child.stdout.take().expect("stdout was piped");

		let stderr_task = tokio::spawn(async move {
			let mut tail: VecDeque<String> = VecDeque::with_capacity(DIAGNOSTIC_TAIL_LINES);
			let mut lines = BufReader::new(stderr).lines();

			while let Ok(Some(line)) = lines.next_line().await {
				if let Some(pct) = parse_progress(&line) {
					if progress_tx.send(pct).await.is_err() {
						trace!("Progress receiver dropped, still draining stderr");
					}
				}

				if tail.len() == DIAGNOSTIC_TAIL_LINES {
					tail.pop_front();
				}
				tail.push_back(line);
			}

			tail.into_iter().collect::<Vec<_>>().join("\n")
		});

		let mut transcript = String::new();
		stdout.read_to_string(&mut transcript).await?;

		let status = child.wait().await?;
		let diagnostics = stderr_task.await.unwrap_or_default();

		if !status.success() {
			let code = status.code().unwrap_or(-1);
			return Err(PipelineError::NonZeroExit {
				binary: binary.display().to_string(),
				code,
				diagnostics,
			});
		}

		debug!(chars = transcript.len(), "Engine transcription complete");
		Ok(transcript.trim_end().to_string())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::paths::StaticPaths;
	use std::path::PathBuf;

	#[test]
	fn parses_engine_progress_lines() {
		assert_eq!(parse_progress("whisper_print_progress_callback: progress =  42%"), Some(42));
		assert_eq!(parse_progress("progress = 42%"), Some(42));
		assert_eq!(parse_progress("progress = 100%"), Some(100));
		assert_eq!(parse_progress("progress=7%"), Some(7));
	}

	#[test]
	fn ignores_non_progress_lines() {
		assert_eq!(parse_progress("whisper_init_from_file_with_params_no_state: loading model"), None);
		assert_eq!(parse_progress("progress = unknown"), None);
		assert_eq!(parse_progress(""), None);
	}

	#[cfg(unix)]
	fn write_script(dir: &Path, body: &str) -> PathBuf {
		use std::os::unix::fs::PermissionsExt;

		let path = dir.join("whisper-cli");
		std::fs::write(&path, body).unwrap();
		let mut perms = std::fs::metadata(&path).unwrap().permissions();
		perms.set_mode(0o755);
		std::fs::set_permissions(&path, perms).unwrap();
		path
	}

	#[cfg(unix)]
	fn engine_for(script: PathBuf, models_dir: PathBuf) -> WhisperCliEngine {
		WhisperCliEngine::new(
			Arc::new(StaticPaths {
				engine: script,
				ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
				models_dir,
			}),
			"en".to_string(),
		)
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn collects_stdout_and_streams_progress() {
		let dir = tempfile::tempdir().unwrap();
		let script = write_script(
			dir.path(),
			"#!/bin/sh\necho 'whisper_print_progress_callback: progress =  50%' >&2\necho 'progress = 100%' >&2\necho 'hello world'\n",
		);

		let engine = engine_for(script, dir.path().to_path_buf());
		let (tx, mut rx) = mpsc::channel(8);
		let transcript = engine
			.transcribe(Path::new("ggml-base.en.bin"), Path::new("audio.wav"), tx)
			.await
			.unwrap();

		assert_eq!(transcript, "hello world");
		assert_eq!(rx.recv().await, Some(50));
		assert_eq!(rx.recv().await, Some(100));
		assert_eq!(rx.recv().await, None);
	}

	#[cfg(unix)]
	#[tokio::test]
	async fn nonzero_exit_carries_code_and_diagnostics() {
		let dir = tempfile::tempdir().unwrap();
		let script = write_script(dir.path(), "#!/bin/sh\necho 'failed to load model' >&2\nexit 3\n");

		let engine = engine_for(script, dir.path().to_path_buf());
		let (tx, _rx) = mpsc::channel(8);
		let err = engine
			.transcribe(Path::new("ggml-base.en.bin"), Path::new("audio.wav"), tx)
			.await
			.unwrap_err();

		match err {
			PipelineError::NonZeroExit { code, diagnostics, .. } => {
				assert_eq!(code, 3);
				assert!(diagnostics.contains("failed to load model"));
			}
			other => panic!("unexpected error: {other}"),
		}
	}

	#[tokio::test]
	async fn unlaunchable_engine_is_a_spawn_error() {
		let engine = WhisperCliEngine::new(
			Arc::new(StaticPaths {
				engine: PathBuf::from("/nonexistent/whisper-cli"),
				ffmpeg: PathBuf::from("/nonexistent/ffmpeg"),
				models_dir: PathBuf::from("/nonexistent/models"),
			}),
			"en".to_string(),
		);

		let (tx, _rx) = mpsc::channel(8);
		let err = engine.transcribe(Path::new("model.bin"), Path::new("audio.wav"), tx).await.unwrap_err();
		assert!(matches!(err, PipelineError::Spawn { .. }), "unexpected error: {err}");
	}
}

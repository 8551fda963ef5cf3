use crate::error::{PipelineError, Result};
use crate::paths::ArtifactPaths;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, warn};

/// Combines the system and microphone tracks into one file the engine accepts
#[async_trait]
pub trait AudioMixer: Send + Sync {
	/// # Errors
	/// Returns an error when either input is unreadable or the mix itself fails
	async fn mix(&self, system_audio: &Path, mic_audio: &Path, output: &Path) -> Result<PathBuf>;
}

/// ffmpeg-backed mixer
///
/// Downmixes both tracks with `amix` into 16 kHz mono 16-bit PCM, the input
/// format the transcription engine expects.
pub struct FfmpegMixer {
	paths: Arc<dyn ArtifactPaths>,
}

impl FfmpegMixer {
	#[must_use]
	pub fn new(paths: Arc<dyn ArtifactPaths>) -> Self {
		Self { paths }
	}

	fn args(system_audio: &Path, mic_audio: &Path, output: &Path) -> Vec<OsString> {
		let mut args: Vec<OsString> = Vec::with_capacity(16);
		args.push("-hide_banner".into());
		args.push("-nostdin".into());
		args.push("-i".into());
		args.push(system_audio.into());
		args.push("-i".into());
		args.push(mic_audio.into());
		args.push("-filter_complex".into());
		args.push("amix=inputs=2:duration=longest:dropout_transition=2".into());
		args.push("-ar".into());
		args.push("16000".into());
		args.push("-ac".into());
		args.push("1".into());
		args.push("-c:a".into());
		args.push("pcm_s16le".into());
		args.push("-y".into());
		args.push(output.into());
		args
	}
}

#[async_trait]
impl AudioMixer for FfmpegMixer {
	async fn mix(&self, system_audio: &Path, mic_audio: &Path, output: &Path) -> Result<PathBuf> {
		let binary = self.paths.ffmpeg_binary();
		debug!(ffmpeg = %binary.display(), output = %output.display(), "Mixing audio tracks");

		let out = Command::new(&binary)
			.args(Self::args(system_audio, mic_audio, output))
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.stderr(Stdio::piped())
			.output()
			.await
			.map_err(|source| PipelineError::Spawn {
				binary: binary.display().to_string(),
				source,
			})?;

		if !out.status.success() {
			let code = out.status.code().unwrap_or(-1);
			let diagnostics = stderr_tail(&out.stderr);
			warn!(code, "ffmpeg mix failed");
			return Err(PipelineError::NonZeroExit {
				binary: FFMPEG_DISPLAY_NAME.to_string(),
				code,
				diagnostics,
			});
		}

		Ok(output.to_path_buf())
	}
}

const FFMPEG_DISPLAY_NAME: &str = "ffmpeg";

/// Last non-empty stderr line - ffmpeg prints the actual failure there
fn stderr_tail(bytes: &[u8]) -> String {
	String::from_utf8_lossy(bytes)
		.lines()
		.rev()
		.map(str::trim)
		.find(|line| !line.is_empty())
		.unwrap_or("no diagnostic output")
		.to_string()
}

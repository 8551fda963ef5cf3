use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Clone, Debug, Serialize, Deserialize)]
#[command(author, version, about = "Transcription pipeline configuration", long_about = None)]
pub struct PipelineConfig {
	#[arg(long, env = "SCRIBE_DEFAULT_MODEL", default_value = "base.en", help = "Model used when a job carries no override")]
	pub default_model: String,

	#[arg(long, env = "SCRIBE_LANGUAGE", default_value = "en", help = "Language hint passed to the transcription engine")]
	pub language: String,

	#[arg(long, env = "SCRIBE_SCRATCH_DIR", help = "Directory for mixed audio output (defaults to the system temp dir)")]
	pub scratch_dir: Option<PathBuf>,

	#[arg(long, env = "SCRIBE_MAX_WORKER_RESTARTS", default_value = "5", help = "Consecutive worker failures tolerated before recreation stops")]
	pub max_worker_restarts: u32,

	#[arg(
        long,
        env = "SCRIBE_RESTART_DELAY_SECS",
        default_value = "2",
        value_parser = parse_duration,
        help = "Delay before a worker recreation attempt in seconds"
    )]
	pub restart_delay: Duration,

	#[arg(long, env = "SCRIBE_EVENT_CAPACITY", default_value = "64", help = "Buffered capacity of the UI notification channel")]
	pub event_capacity: usize,
}

impl PipelineConfig {
	pub fn new() -> Self {
		Self::parse()
	}

	/// Directory where per-job mixed audio files are written
	#[must_use]
	pub fn scratch_dir(&self) -> PathBuf {
		self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
	}

	/// Validate configuration values
	///
	/// # Errors
	/// Returns a description of the first invalid value found
	pub fn validate(&self) -> Result<(), String> {
		if self.default_model.is_empty() {
			return Err("default_model must not be empty".to_string());
		}

		if self.language.is_empty() {
			return Err("language must not be empty".to_string());
		}

		if self.max_worker_restarts == 0 {
			return Err("max_worker_restarts must be at least 1".to_string());
		}

		if self.event_capacity == 0 {
			return Err("event_capacity must be greater than 0".to_string());
		}

		Ok(())
	}

	#[cfg(test)]
	pub fn test(scratch_dir: PathBuf) -> Self {
		Self {
			default_model: "base.en".to_string(),
			language: "en".to_string(),
			scratch_dir: Some(scratch_dir),
			max_worker_restarts: 5,
			restart_delay: Duration::from_millis(25),
			event_capacity: 64,
		}
	}
}

impl Default for PipelineConfig {
	fn default() -> Self {
		Self {
			default_model: "base.en".to_string(),
			language: "en".to_string(),
			scratch_dir: None,
			max_worker_restarts: 5,
			restart_delay: Duration::from_secs(2),
			event_capacity: 64,
		}
	}
}

fn parse_duration(s: &str) -> Result<Duration, std::num::ParseIntError> {
	s.parse::<u64>().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_config() {
		let config = PipelineConfig::default();
		assert_eq!(config.default_model, "base.en");
		assert_eq!(config.language, "en");
		assert_eq!(config.max_worker_restarts, 5);
		assert_eq!(config.restart_delay, Duration::from_secs(2));
		assert!(config.validate().is_ok());
	}

	#[test]
	fn test_parse_duration() {
		assert_eq!(parse_duration("2").unwrap(), Duration::from_secs(2));
		assert!(parse_duration("invalid").is_err());
	}

	#[test]
	fn test_config_parser() {
		let args = vec![
			"program",
			"--default-model",
			"large-v3",
			"--language",
			"de",
			"--max-worker-restarts",
			"3",
			"--restart-delay-secs",
			"10",
		];

		let config = PipelineConfig::try_parse_from(args).unwrap();
		assert_eq!(config.default_model, "large-v3");
		assert_eq!(config.language, "de");
		assert_eq!(config.max_worker_restarts, 3);
		assert_eq!(config.restart_delay, Duration::from_secs(10));
	}

	#[test]
	fn test_validation_rejects_empty_model() {
		let config = PipelineConfig {
			default_model: String::new(),
			..PipelineConfig::default()
		};
		assert!(config.validate().is_err());
	}
}

//! Durable single-concurrency transcription pipeline.
//!
//! A [`QueueManager`] owns the job list and exactly one background worker.
//! Jobs flow manager → worker → ffmpeg mix → speech-to-text CLI; status flows
//! back worker → manager → persistent store + UI notification channel. The
//! worker is recreated after faults a bounded number of times; past the
//! ceiling the queue stalls until [`QueueManager::resume`] is called.

pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod manager;
pub mod mixer;
pub mod paths;
pub mod store;
pub mod worker;

pub use config::PipelineConfig;
pub use engine::{parse_progress, SttEngine, WhisperCliEngine};
pub use error::{PipelineError, Result};
pub use job::{JobStatus, TranscriptionJob};
pub use manager::{QueueEvent, QueueManager, QueueStats};
pub use mixer::{AudioMixer, FfmpegMixer};
pub use paths::{ArtifactPaths, LayoutPaths, StaticPaths};
pub use store::{ResultRecord, TranscriptStore};
pub use worker::{JobAssignment, StatusUpdate, WorkerEvent};

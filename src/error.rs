use std::time::Duration;
use thiserror::Error;

pub type VolumeResult<T> = Result<T, VolumeError>;

/// Failure taxonomy for the mount pass. Every variant is recovered locally:
/// nothing here propagates out of a coordinator run, failures resolve to a
/// `Skipped` decision instead.
#[derive(Error, Debug)]
pub enum VolumeError {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
	#[error("discovery mechanism {0} failed: {1}")]
	Discovery(&'static str, String),
	#[error("elevated execution unavailable: {0}")]
	ElevatedUnavailable(String),
	#[error("elevated command timed out after {0:?}")]
	ElevatedTimeout(Duration),
	#[error("volume {0} processing exceeded the per-volume deadline")]
	DeadlineExceeded(String),
	#[error("no candidate path for volume {0} survived the write probe")]
	Rejected(String),
	#[error("storage sink rejected mount: {0}")]
	Sink(String),
}

//! Empirical write-access probing.
//!
//! Permission bits lie on overlay mounts: affected platform releases allow
//! file creation and writing yet silently reject rename. The only verdict
//! this crate trusts is a live create -> write -> rename -> delete sequence
//! on a uniquely named temporary entry.

use crate::types::{ProbeResult, ProbeStage, WriteVerdict};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

const PROBE_PAYLOAD: &[u8] = b"volmount write probe\n";

/// Process-wide counter so concurrent probes on distinct volumes never
/// collide on file names.
static PROBE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Filesystem operations behind the probe, as a seam for fault injection in
/// tests. The production implementation is plain async filesystem I/O.
#[async_trait]
pub trait ProbeOps: Send + Sync {
	async fn is_dir(&self, path: &Path) -> bool;
	async fn create_new(&self, path: &Path) -> std::io::Result<()>;
	async fn write_payload(&self, path: &Path, payload: &[u8]) -> std::io::Result<()>;
	async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()>;
	async fn remove(&self, path: &Path) -> std::io::Result<()>;
}

pub struct RealProbeOps;

#[async_trait]
impl ProbeOps for RealProbeOps {
	async fn is_dir(&self, path: &Path) -> bool {
		tokio::fs::metadata(path)
			.await
			.map(|m| m.is_dir())
			.unwrap_or(false)
	}

	async fn create_new(&self, path: &Path) -> std::io::Result<()> {
		tokio::fs::OpenOptions::new()
			.write(true)
			.create_new(true)
			.open(path)
			.await
			.map(drop)
	}

	async fn write_payload(&self, path: &Path, payload: &[u8]) -> std::io::Result<()> {
		tokio::fs::write(path, payload).await
	}

	async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
		tokio::fs::rename(from, to).await
	}

	async fn remove(&self, path: &Path) -> std::io::Result<()> {
		tokio::fs::remove_file(path).await
	}
}

pub struct WriteAccessProber {
	ops: Arc<dyn ProbeOps>,
}

impl Default for WriteAccessProber {
	fn default() -> Self {
		Self::new()
	}
}

impl WriteAccessProber {
	pub fn new() -> Self {
		Self::with_ops(Arc::new(RealProbeOps))
	}

	pub fn with_ops(ops: Arc<dyn ProbeOps>) -> Self {
		Self { ops }
	}

	/// Probe one path. Probes of distinct paths may run concurrently; the
	/// caller must not probe the same path twice at once, that would corrupt
	/// the temp-file dance.
	pub async fn probe(&self, path: &Path) -> ProbeResult {
		let mut result = ProbeResult {
			path: path.to_path_buf(),
			created: false,
			wrote: false,
			renamed: false,
			deleted: false,
			verdict: WriteVerdict::Inaccessible,
			failure_stage: None,
		};

		if !self.ops.is_dir(path).await {
			debug!(path = %path.display(), "probe target is not an accessible directory");
			result.failure_stage = Some(ProbeStage::Create);
			return result;
		}

		let token = unique_token();
		let entry = path.join(format!(".volmount_probe_{token}.tmp"));
		let renamed = path.join(format!(".volmount_probe_{token}.renamed"));

		if let Err(e) = self.ops.create_new(&entry).await {
			debug!(path = %path.display(), %e, "probe create failed");
			result.failure_stage = Some(ProbeStage::Create);
			self.cleanup(&entry, &renamed).await;
			return result;
		}
		result.created = true;

		if let Err(e) = self.ops.write_payload(&entry, PROBE_PAYLOAD).await {
			debug!(path = %path.display(), %e, "probe write failed");
			result.verdict = WriteVerdict::ReadOnly;
			result.failure_stage = Some(ProbeStage::Write);
			self.cleanup(&entry, &renamed).await;
			return result;
		}
		result.wrote = true;

		if let Err(e) = self.ops.rename(&entry, &renamed).await {
			// The definitive overlay signal: create/write succeeded but the
			// filesystem refuses rename. Never treat this path as writable.
			warn!(path = %path.display(), %e, "probe rename rejected, path is effectively read-only");
			result.verdict = WriteVerdict::ReadOnly;
			result.failure_stage = Some(ProbeStage::Rename);
			self.cleanup(&entry, &renamed).await;
			return result;
		}
		result.renamed = true;

		match self.ops.remove(&renamed).await {
			Ok(()) => {
				result.deleted = true;
				result.verdict = WriteVerdict::Writable;
			}
			Err(e) => {
				// Create/write/rename already demonstrated the capability the
				// serving collaborator needs; a stuck final delete is a soft
				// warning, not a downgrade.
				warn!(path = %path.display(), %e, "probe delete failed after successful rename");
				result.verdict = WriteVerdict::Writable;
				result.failure_stage = Some(ProbeStage::Delete);
				self.cleanup(&entry, &renamed).await;
			}
		}
		result
	}

	/// Best-effort removal of both temp names. Idempotent against partial
	/// state: either entry may be absent already.
	async fn cleanup(&self, entry: &Path, renamed: &Path) {
		let _ = self.ops.remove(entry).await;
		let _ = self.ops.remove(renamed).await;
	}
}

fn unique_token() -> String {
	let millis = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis())
		.unwrap_or(0);
	let seq = PROBE_SEQ.fetch_add(1, Ordering::Relaxed);
	let nonce: u16 = rand::random();
	format!("{millis}_{seq}_{nonce:04x}")
}

//! Operator-facing mount diagnosis and the capped in-process diagnostic log.
//!
//! Everything here observes, nothing decides: the accept/reject decision is
//! made by the probe verdict alone, the reporter only explains a `Skipped`
//! volume to whoever reads the logs.

use crate::config::MountConfig;
use crate::types::{ProbeResult, ProbeStage, WriteVerdict};
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::timeout;
use tracing::debug;

const TRUNCATION_MARKER: &str = "... [older log content discarded] ...\n";

/// Append-only, byte-capped ring buffer shared by every call site that wants
/// its output visible in the host UI. One writer at a time; once the ceiling
/// is exceeded the oldest content is discarded and a marker inserted.
pub struct DiagnosticLog {
	inner: Mutex<LogBuffer>,
}

struct LogBuffer {
	data: String,
	capacity: usize,
}

impl DiagnosticLog {
	pub fn new(capacity_bytes: usize) -> Self {
		Self {
			inner: Mutex::new(LogBuffer {
				data: String::new(),
				capacity: capacity_bytes.max(TRUNCATION_MARKER.len()),
			}),
		}
	}

	pub fn append(&self, entry: &str) {
		let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
		let mut buffer = self.inner.lock();
		buffer.data.push_str(&format!("[{stamp}] {entry}\n"));
		if buffer.data.len() > buffer.capacity {
			// Keep the newest 80% and mark the cut, like the host log view
			// expects.
			let keep = buffer.capacity * 4 / 5;
			let mut cut = buffer.data.len() - keep;
			while !buffer.data.is_char_boundary(cut) {
				cut += 1;
			}
			buffer.data.drain(..cut);
			buffer.data.insert_str(0, TRUNCATION_MARKER);
		}
	}

	pub fn snapshot(&self) -> String {
		self.inner.lock().data.clone()
	}

	pub fn len_bytes(&self) -> usize {
		self.inner.lock().data.len()
	}
}

/// Structured aggregation of the raw signals behind a mount failure.
#[derive(Debug, Clone)]
pub struct DiagnosisReport {
	pub path: PathBuf,
	pub exists: bool,
	pub readable: bool,
	/// Permission-bit writability. Informative only, never authoritative.
	pub writable_flag: bool,
	pub mount_entries: Vec<String>,
	pub mount_read_only: Option<bool>,
	/// Mandatory-access-control enforcement mode, "unknown" when undetectable.
	pub mac_mode: String,
	pub permission_string: String,
	pub probe_verdict: Option<WriteVerdict>,
	pub probe_stage: Option<ProbeStage>,
}

impl fmt::Display for DiagnosisReport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		writeln!(f, "========== storage mount diagnosis ==========")?;
		writeln!(f, "path: {}", self.path.display())?;
		writeln!(f, "[access bits]")?;
		writeln!(
			f,
			"exists: {}  readable: {}  writable flag: {}",
			self.exists, self.readable, self.writable_flag
		)?;
		writeln!(f, "[mount table]")?;
		if self.mount_entries.is_empty() {
			writeln!(f, "no matching mount entry")?;
		} else {
			for entry in &self.mount_entries {
				writeln!(f, "{entry}")?;
			}
		}
		let mount_mode = match self.mount_read_only {
			Some(true) => "read-only",
			Some(false) => "read-write",
			None => "unknown",
		};
		writeln!(f, "mount mode: {mount_mode}")?;
		writeln!(f, "[mac enforcement]")?;
		writeln!(f, "{}", self.mac_mode)?;
		writeln!(f, "[directory permissions]")?;
		writeln!(f, "{}", self.permission_string)?;
		writeln!(f, "[write probe]")?;
		match self.probe_verdict {
			Some(verdict) => {
				let stage = self
					.probe_stage
					.map(|s| s.to_string())
					.unwrap_or_else(|| "none".to_string());
				writeln!(f, "verdict: {verdict}  failure stage: {stage}")?;
			}
			None => writeln!(f, "no probe performed")?,
		}
		write!(f, "=============================================")
	}
}

/// Gathers diagnosis signals for a path. Pure read/observe: it never mutates
/// state and never fails, absent signals come back as "unknown".
pub struct MountDiagnosticReporter {
	log: Arc<DiagnosticLog>,
	config: MountConfig,
	table_path: PathBuf,
}

impl MountDiagnosticReporter {
	pub fn new(log: Arc<DiagnosticLog>, config: MountConfig) -> Self {
		Self {
			log,
			config,
			table_path: PathBuf::from("/proc/mounts"),
		}
	}

	pub async fn diagnose(&self, path: &Path, probe: Option<&ProbeResult>) -> DiagnosisReport {
		let metadata = std::fs::metadata(path).ok();
		let (mount_entries, mount_read_only) = self.mount_table_excerpt(path).await;
		let report = DiagnosisReport {
			path: path.to_path_buf(),
			exists: metadata.is_some(),
			readable: std::fs::read_dir(path).is_ok(),
			writable_flag: metadata
				.as_ref()
				.map(|m| !m.permissions().readonly())
				.unwrap_or(false),
			mount_entries,
			mount_read_only,
			mac_mode: self.mac_enforcement_mode().await,
			permission_string: permission_string(metadata.as_ref()),
			probe_verdict: probe.map(|p| p.verdict),
			probe_stage: probe.and_then(|p| p.failure_stage),
		};
		self.log.append(&report.to_string());
		report
	}

	/// Mount-table lines relevant to the path or the configured storage roots,
	/// plus whether the closest match carries the read-only flag.
	async fn mount_table_excerpt(&self, path: &Path) -> (Vec<String>, Option<bool>) {
		let Ok(table) = tokio::fs::read_to_string(&self.table_path).await else {
			return (Vec::new(), None);
		};
		let needle = path.to_string_lossy();
		let overlay = self.config.overlay_root.to_string_lossy();
		let raw_name = self
			.config
			.raw_mount_root
			.file_name()
			.map(|n| n.to_string_lossy().into_owned())
			.unwrap_or_default();
		let mut entries = Vec::new();
		let mut read_only = None;
		for line in table.lines() {
			let interesting = line.contains(needle.as_ref())
				|| (!raw_name.is_empty() && line.contains(&raw_name))
				|| line.contains(overlay.as_ref());
			if !interesting {
				continue;
			}
			entries.push(line.to_string());
			if line.contains(needle.as_ref()) {
				let options = line.split_whitespace().nth(3).unwrap_or("");
				read_only = Some(options.split(',').any(|o| o == "ro"));
			}
		}
		(entries, read_only)
	}

	async fn mac_enforcement_mode(&self) -> String {
		let probe = timeout(
			self.config.command_timeout,
			tokio::process::Command::new("getenforce")
				.kill_on_drop(true)
				.output(),
		)
		.await;
		if let Ok(Ok(output)) = probe {
			let mode = String::from_utf8_lossy(&output.stdout).trim().to_string();
			if !mode.is_empty() {
				return mode;
			}
		}
		// Command unavailable: try the sysfs enforce node directly.
		match tokio::fs::read_to_string("/sys/fs/selinux/enforce").await {
			Ok(raw) => match raw.trim() {
				"1" => "Enforcing".to_string(),
				"0" => "Permissive".to_string(),
				other => {
					debug!(value = other, "unexpected enforce node content");
					"unknown".to_string()
				}
			},
			Err(_) => "unknown".to_string(),
		}
	}
}

#[cfg(unix)]
fn permission_string(metadata: Option<&std::fs::Metadata>) -> String {
	use crate::utils::format_mode;
	use std::os::unix::fs::MetadataExt;
	match metadata {
		Some(m) => format!("{} uid={} gid={}", format_mode(m.mode()), m.uid(), m.gid()),
		None => "unknown".to_string(),
	}
}

#[cfg(not(unix))]
fn permission_string(_metadata: Option<&std::fs::Metadata>) -> String {
	"unknown".to_string()
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use tempfile::TempDir;

	#[test]
	fn log_discards_oldest_content_once_over_capacity() {
		let log = DiagnosticLog::new(400);
		for i in 0..40 {
			log.append(&format!("entry number {i:03}"));
		}
		let contents = log.snapshot();
		assert!(log.len_bytes() <= 400 + TRUNCATION_MARKER.len());
		assert!(contents.starts_with(TRUNCATION_MARKER));
		assert!(contents.contains("entry number 039"));
		assert!(!contents.contains("entry number 000"));
	}

	#[test]
	fn log_keeps_everything_below_capacity() {
		let log = DiagnosticLog::new(10_000);
		log.append("first");
		log.append("second");
		let contents = log.snapshot();
		assert!(contents.contains("first"));
		assert!(contents.contains("second"));
		assert!(!contents.contains(TRUNCATION_MARKER.trim()));
	}

	#[tokio::test]
	async fn diagnose_reports_existing_directory_signals() {
		let dir = TempDir::new().unwrap();
		let log = Arc::new(DiagnosticLog::new(100_000));
		let reporter = MountDiagnosticReporter::new(log.clone(), MountConfig::default());

		let report = reporter.diagnose(dir.path(), None).await;
		assert!(report.exists);
		assert!(report.readable);
		assert_eq!(report.probe_verdict, None);

		let rendered = report.to_string();
		assert!(rendered.contains("[access bits]"));
		assert!(rendered.contains("[write probe]"));
		assert!(log.snapshot().contains("storage mount diagnosis"));
	}

	#[tokio::test]
	async fn diagnose_never_fails_on_a_missing_path() {
		let dir = TempDir::new().unwrap();
		let log = Arc::new(DiagnosticLog::new(100_000));
		let reporter = MountDiagnosticReporter::new(log, MountConfig::default());

		let report = reporter.diagnose(&dir.path().join("gone"), None).await;
		assert!(!report.exists);
		assert!(!report.readable);
		assert_eq!(report.permission_string, "unknown");
	}

	#[tokio::test]
	async fn mount_excerpt_follows_the_configured_storage_roots() {
		let dir = TempDir::new().unwrap();
		let table = dir.path().join("mounts");
		std::fs::write(
			&table,
			"/dev/sda1 /x/rawmedia/CARD vfat rw,nosuid 0 0\n\
			 /dev/sda2 /elsewhere ext4 rw 0 0\n",
		)
		.unwrap();
		let config = MountConfig {
			overlay_root: PathBuf::from("/x/view"),
			raw_mount_root: PathBuf::from("/x/rawmedia"),
			..MountConfig::default()
		};
		let mut reporter =
			MountDiagnosticReporter::new(Arc::new(DiagnosticLog::new(100_000)), config);
		reporter.table_path = table;

		let (entries, read_only) = reporter
			.mount_table_excerpt(Path::new("/x/view/CARD"))
			.await;
		assert_eq!(entries.len(), 1);
		assert!(entries[0].contains("rawmedia"));
		assert_eq!(read_only, None);
	}
}

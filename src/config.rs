//! Mount-pass configuration, supplied by the host's persisted settings.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration consumed by one mount pass. The host owns persistence; this
/// crate never mutates it. `elevated_enabled` is the single operator switch
/// for privileged repair, elevated access is never attempted implicitly.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct MountConfig {
	/// Canonical primary-storage mount path
	pub primary_path: PathBuf,
	/// Mount label handed to the serving collaborator for primary storage
	pub primary_label: String,
	/// Root of the supervised, per-process-filtered view of removable media
	pub overlay_root: PathBuf,
	/// Root of the raw, unfiltered mount points for the same media
	pub raw_mount_root: PathBuf,
	/// Well-known mount roots scanned by the last-resort discovery mechanism
	pub scan_roots: Vec<PathBuf>,
	/// Whether operator configuration allows privileged repair commands
	pub elevated_enabled: bool,
	/// Upper bound for a single discovery mechanism
	pub discovery_timeout: Duration,
	/// Upper bound for processing one volume end to end
	pub volume_deadline: Duration,
	/// Upper bound for one external command (elevated repair, diagnostics)
	pub command_timeout: Duration,
	/// Byte ceiling for the in-process diagnostic log
	pub log_capacity_bytes: usize,
}

impl Default for MountConfig {
	fn default() -> Self {
		Self {
			primary_path: PathBuf::from("/storage/emulated/0"),
			primary_label: "local".to_string(),
			overlay_root: PathBuf::from("/storage"),
			raw_mount_root: PathBuf::from("/mnt/media_rw"),
			scan_roots: [
				"/mnt/media_rw",
				"/storage",
				"/mnt/sdcard",
				"/mnt/extSdCard",
				"/storage/sdcard1",
				"/storage/extSdCard",
			]
			.into_iter()
			.map(PathBuf::from)
			.collect(),
			elevated_enabled: false,
			discovery_timeout: Duration::from_secs(5),
			volume_deadline: Duration::from_secs(5),
			command_timeout: Duration::from_secs(10),
			log_capacity_bytes: 500_000,
		}
	}
}

impl MountConfig {
	/// Parse host-persisted settings. Missing fields fall back to defaults so
	/// older settings files keep working.
	pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
		serde_json::from_str(raw)
	}
}

//! Core data types for volume discovery, probing and mount decisions.

use crate::utils::normalize_path;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use strum::Display;

/// A distinct storage device or partition visible to the host process
/// (built-in flash, SD card, OTG drive). Immutable after discovery; identity
/// is the normalized advertised path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Volume {
	/// Normalized advertised path, used as the volume identity
	pub id: String,
	/// Human-readable volume name
	pub display_name: String,
	/// Path the platform advertises for this volume
	pub advertised_path: PathBuf,
	/// Whether this is the primary (built-in) storage
	pub is_primary: bool,
	/// Whether the volume is removable media (SD card, OTG)
	pub is_removable: bool,
	/// Whether the volume is an emulated view of internal storage
	pub is_emulated: bool,
}

impl Volume {
	pub fn new(
		display_name: impl Into<String>,
		advertised_path: PathBuf,
		is_primary: bool,
		is_removable: bool,
		is_emulated: bool,
	) -> Self {
		let id = normalize_path(&advertised_path)
			.to_string_lossy()
			.into_owned();
		Self {
			id,
			display_name: display_name.into(),
			advertised_path,
			is_primary,
			is_removable,
			is_emulated,
		}
	}
}

/// One physical path that might grant write access to a volume, with the
/// reason it was generated. Candidates are ordered by likelihood of real
/// write capability and never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathCandidate {
	pub path: PathBuf,
	pub rationale: &'static str,
}

impl PathCandidate {
	pub fn new(path: PathBuf, rationale: &'static str) -> Self {
		Self { path, rationale }
	}
}

/// Authoritative outcome of an empirical write probe.
#[derive(Serialize, Deserialize, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum WriteVerdict {
	Writable,
	ReadOnly,
	Inaccessible,
}

/// The probe step at which a failure occurred.
#[derive(Serialize, Deserialize, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum ProbeStage {
	Create,
	Write,
	Rename,
	Delete,
}

/// Result of a single create/write/rename/delete probe sequence on one path.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
	pub path: PathBuf,
	pub created: bool,
	pub wrote: bool,
	pub renamed: bool,
	pub deleted: bool,
	pub verdict: WriteVerdict,
	pub failure_stage: Option<ProbeStage>,
}

#[derive(Serialize, Deserialize, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum MountStatus {
	Mounted,
	Skipped,
}

/// Terminal record for a volume within one mount pass. `Mounted` decisions
/// are handed to the external serving collaborator, `Skipped` ones carry an
/// operator-facing diagnosis. Not retained across passes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MountDecision {
	pub volume: Volume,
	pub chosen_path: Option<PathBuf>,
	pub label: String,
	pub status: MountStatus,
	pub diagnosis: Option<String>,
}

impl MountDecision {
	pub fn mounted(volume: Volume, chosen_path: PathBuf, label: impl Into<String>) -> Self {
		Self {
			volume,
			chosen_path: Some(chosen_path),
			label: label.into(),
			status: MountStatus::Mounted,
			diagnosis: None,
		}
	}

	pub fn skipped(volume: Volume, label: impl Into<String>, diagnosis: String) -> Self {
		Self {
			volume,
			chosen_path: None,
			label: label.into(),
			status: MountStatus::Skipped,
			diagnosis: Some(diagnosis),
		}
	}

	pub fn is_mounted(&self) -> bool {
		self.status == MountStatus::Mounted
	}
}

/// Outcome of an elevated permission-repair attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixResult {
	pub attempted: bool,
	pub succeeded: bool,
	pub detail: Vec<String>,
}

impl FixResult {
	pub fn not_attempted(reason: impl Into<String>) -> Self {
		Self {
			attempted: false,
			succeeded: false,
			detail: vec![reason.into()],
		}
	}
}

/// Check if a path is a readable directory without touching its contents.
pub(crate) fn is_readable_dir(path: &Path) -> bool {
	std::fs::read_dir(path).is_ok()
}

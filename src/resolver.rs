//! Candidate physical-path derivation for a discovered volume.
//!
//! The platform advertises removable media through an overlay mount that may
//! silently reject rename/delete even when create/write succeed. When the raw
//! mount point for the same device exists, it is tried first.

use crate::{
	config::MountConfig,
	types::{is_readable_dir, PathCandidate, Volume},
};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct PathResolver {
	config: MountConfig,
}

impl PathResolver {
	pub fn new(config: MountConfig) -> Self {
		Self { config }
	}

	/// Ordered candidate paths for a volume, most likely writable first.
	pub fn resolve(&self, volume: &Volume) -> Vec<PathCandidate> {
		// Primary storage gets no alternatives: swapping in raw system
		// mounts risks corrupting them for no gain.
		if volume.is_primary {
			return vec![PathCandidate::new(
				self.config.primary_path.clone(),
				"canonical primary storage mount",
			)];
		}

		if volume.is_removable {
			if let Some(raw) = self.raw_alias(&volume.advertised_path) {
				if is_readable_dir(&raw) {
					return vec![
						PathCandidate::new(raw, "raw media mount, bypasses overlay restrictions"),
						PathCandidate::new(
							volume.advertised_path.clone(),
							"overlay view advertised by the platform",
						),
					];
				}
				// A missing or unreadable raw alias is dropped outright,
				// probing it would only burn an I/O round trip.
				debug!(
					volume = %volume.id,
					raw = %raw.display(),
					"raw mount alias not accessible, keeping advertised path only"
				);
			}
		}

		vec![PathCandidate::new(
			volume.advertised_path.clone(),
			"advertised mount path",
		)]
	}

	/// Substitute the overlay root for the raw-mount root, keeping the
	/// device-identifying suffix: `/storage/XXXX-XXXX` -> `/mnt/media_rw/XXXX-XXXX`.
	fn raw_alias(&self, advertised: &Path) -> Option<PathBuf> {
		let suffix = advertised.strip_prefix(&self.config.overlay_root).ok()?;
		if suffix.as_os_str().is_empty() || suffix.starts_with("emulated") {
			return None;
		}
		let raw = self.config.raw_mount_root.join(suffix);
		(raw != advertised).then_some(raw)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use pretty_assertions::assert_eq;
	use tempfile::TempDir;

	fn fixture() -> (TempDir, MountConfig) {
		let root = TempDir::new().unwrap();
		let config = MountConfig {
			primary_path: root.path().join("emulated/0"),
			overlay_root: root.path().join("storage"),
			raw_mount_root: root.path().join("media_rw"),
			..MountConfig::default()
		};
		(root, config)
	}

	#[test]
	fn primary_volume_has_exactly_the_canonical_candidate() {
		let (_root, config) = fixture();
		let resolver = PathResolver::new(config.clone());
		let volume = Volume::new("Internal Storage", config.primary_path.clone(), true, false, true);

		let candidates = resolver.resolve(&volume);
		assert_eq!(candidates.len(), 1);
		assert_eq!(candidates[0].path, config.primary_path);
	}

	#[test]
	fn existing_raw_alias_is_ordered_before_the_advertised_path() {
		let (root, config) = fixture();
		std::fs::create_dir_all(root.path().join("media_rw/1234-5678")).unwrap();
		std::fs::create_dir_all(root.path().join("storage/1234-5678")).unwrap();
		let resolver = PathResolver::new(config.clone());
		let volume = Volume::new(
			"SD Card",
			root.path().join("storage/1234-5678"),
			false,
			true,
			false,
		);

		let candidates = resolver.resolve(&volume);
		assert_eq!(candidates.len(), 2);
		assert_eq!(candidates[0].path, root.path().join("media_rw/1234-5678"));
		assert_eq!(candidates[1].path, root.path().join("storage/1234-5678"));
	}

	#[test]
	fn missing_raw_alias_is_dropped_not_probed() {
		let (root, config) = fixture();
		std::fs::create_dir_all(root.path().join("storage/1234-5678")).unwrap();
		let resolver = PathResolver::new(config);
		let volume = Volume::new(
			"SD Card",
			root.path().join("storage/1234-5678"),
			false,
			true,
			false,
		);

		let candidates = resolver.resolve(&volume);
		assert_eq!(candidates.len(), 1);
		assert_eq!(candidates[0].path, root.path().join("storage/1234-5678"));
	}

	#[test]
	fn paths_outside_the_overlay_keep_the_advertised_path_only() {
		let (root, config) = fixture();
		let resolver = PathResolver::new(config);
		let volume = Volume::new("OTG", root.path().join("otg/usb0"), false, true, false);

		let candidates = resolver.resolve(&volume);
		assert_eq!(candidates.len(), 1);
		assert_eq!(candidates[0].path, root.path().join("otg/usb0"));
		assert_eq!(candidates[0].rationale, "advertised mount path");
	}
}

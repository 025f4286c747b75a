//! Volume discovery: an ordered chain of strategies, each tried under a
//! bounded timeout, falling through on failure. The path-scanning strategy is
//! the only mechanism guaranteed available everywhere and always runs last.

use crate::{
	config::MountConfig,
	error::{VolumeError, VolumeResult},
	types::Volume,
	utils::volume_identity,
};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::{task, time::timeout};
use tracing::{debug, info, warn};

/// One discovery mechanism. `is_available` is the capability predicate,
/// evaluated before every pass; `discover` is a pure listing operation.
#[async_trait]
pub trait DiscoveryStrategy: Send + Sync {
	fn name(&self) -> &'static str;

	fn is_available(&self) -> bool {
		true
	}

	async fn discover(&self) -> VolumeResult<Vec<Volume>>;
}

fn is_virtual_filesystem(fs: &str) -> bool {
	matches!(
		fs.to_lowercase().as_str(),
		"devfs" | "sysfs" | "proc" | "procfs" | "tmpfs" | "ramfs" | "devtmpfs" | "cgroup"
			| "cgroup2" | "overlay" | "squashfs" | "binfmt_misc" | "debugfs" | "tracefs"
			| "securityfs" | "pstore" | "configfs" | "fusectl" | "selinuxfs" | "functionfs"
	)
}

fn is_emulated_path(config: &MountConfig, path: &Path) -> bool {
	path.starts_with(config.overlay_root.join("emulated"))
}

/// Structured, capability-rich discovery via the system disk list.
pub struct SystemInfoStrategy {
	config: MountConfig,
}

impl SystemInfoStrategy {
	pub fn new(config: MountConfig) -> Self {
		Self { config }
	}
}

#[async_trait]
impl DiscoveryStrategy for SystemInfoStrategy {
	fn name(&self) -> &'static str {
		"sysinfo"
	}

	async fn discover(&self) -> VolumeResult<Vec<Volume>> {
		// Collect plain data in a blocking context, build volumes after.
		let disk_info: Vec<(String, PathBuf, String, bool)> = task::spawn_blocking(|| {
			sysinfo::Disks::new_with_refreshed_list()
				.list()
				.iter()
				.map(|disk| {
					(
						disk.name().to_string_lossy().into_owned(),
						disk.mount_point().to_path_buf(),
						disk.file_system().to_string_lossy().into_owned(),
						disk.is_removable(),
					)
				})
				.collect()
		})
		.await
		.map_err(|e| VolumeError::Discovery("sysinfo", format!("task join error: {e}")))?;

		let primary = volume_identity(&self.config.primary_path);
		let mut volumes = Vec::new();
		for (name, mount_point, file_system, removable) in disk_info {
			if is_virtual_filesystem(&file_system) || !mount_point.exists() {
				continue;
			}
			let is_primary = volume_identity(&mount_point) == primary;
			let display_name = if name.is_empty() {
				mount_point.to_string_lossy().into_owned()
			} else {
				name
			};
			let is_emulated = is_emulated_path(&self.config, &mount_point);
			volumes.push(Volume::new(
				display_name,
				mount_point,
				is_primary,
				removable && !is_primary,
				is_emulated,
			));
		}
		Ok(volumes)
	}
}

/// Legacy discovery via the kernel mount table. Only reports entries under
/// the storage roots this crate cares about.
pub struct MountTableStrategy {
	config: MountConfig,
	table_path: PathBuf,
}

impl MountTableStrategy {
	pub fn new(config: MountConfig) -> Self {
		Self {
			config,
			table_path: PathBuf::from("/proc/mounts"),
		}
	}

	fn parse(&self, table: &str) -> Vec<Volume> {
		let primary = volume_identity(&self.config.primary_path);
		let mut volumes = Vec::new();
		for line in table.lines() {
			let mut fields = line.split_whitespace();
			let (Some(device), Some(raw_mount_point), Some(fs_type)) =
				(fields.next(), fields.next(), fields.next())
			else {
				continue;
			};
			if device == "none" || is_virtual_filesystem(fs_type) {
				continue;
			}
			// The mount table octal-escapes spaces in mount points.
			let mount_point = PathBuf::from(raw_mount_point.replace("\\040", " "));
			let is_primary = volume_identity(&mount_point) == primary;
			let under_storage_root = mount_point.starts_with(&self.config.overlay_root)
				|| mount_point.starts_with(&self.config.raw_mount_root);
			if !is_primary && !under_storage_root {
				continue;
			}
			let display_name = mount_point
				.file_name()
				.map(|n| n.to_string_lossy().into_owned())
				.unwrap_or_else(|| mount_point.to_string_lossy().into_owned());
			let is_emulated = is_emulated_path(&self.config, &mount_point);
			volumes.push(Volume::new(
				display_name,
				mount_point,
				is_primary,
				!is_primary && !is_emulated,
				is_emulated,
			));
		}
		volumes
	}
}

#[async_trait]
impl DiscoveryStrategy for MountTableStrategy {
	fn name(&self) -> &'static str {
		"mount-table"
	}

	fn is_available(&self) -> bool {
		self.table_path.exists()
	}

	async fn discover(&self) -> VolumeResult<Vec<Volume>> {
		let table = tokio::fs::read_to_string(&self.table_path)
			.await
			.map_err(|e| VolumeError::Discovery("mount-table", e.to_string()))?;
		Ok(self.parse(&table))
	}
}

/// Last-resort discovery: list direct subdirectories of a fixed set of
/// well-known mount roots and treat each as a candidate volume.
pub struct PathScanStrategy {
	config: MountConfig,
}

impl PathScanStrategy {
	pub fn new(config: MountConfig) -> Self {
		Self { config }
	}
}

#[async_trait]
impl DiscoveryStrategy for PathScanStrategy {
	fn name(&self) -> &'static str {
		"path-scan"
	}

	async fn discover(&self) -> VolumeResult<Vec<Volume>> {
		let config = self.config.clone();
		task::spawn_blocking(move || {
			let mut volumes = Vec::new();
			let primary = volume_identity(&config.primary_path);

			if config.primary_path.is_dir() {
				volumes.push(Volume::new(
					"Internal Storage",
					config.primary_path.clone(),
					true,
					false,
					true,
				));
			}

			for root in &config.scan_roots {
				let Ok(entries) = std::fs::read_dir(root) else {
					continue;
				};
				for entry in entries.flatten() {
					let path = entry.path();
					if !path.is_dir() {
						continue;
					}
					let name = entry.file_name().to_string_lossy().into_owned();
					// The emulated subtree and the primary path are already
					// covered by the primary volume above.
					if name == "emulated" || name == "self" || volume_identity(&path) == primary {
						continue;
					}
					// Unreadable entries cannot be served, skip them here.
					if std::fs::read_dir(&path).is_err() {
						continue;
					}
					volumes.push(Volume::new(
						format!("External Storage ({name})"),
						path,
						false,
						true,
						false,
					));
				}
			}
			Ok(volumes)
		})
		.await
		.map_err(|e| VolumeError::Discovery("path-scan", format!("task join error: {e}")))?
	}
}

/// Runs the strategy chain and returns the first non-empty, deduplicated
/// volume set. Never fails: if every mechanism errors or yields nothing, the
/// result is simply empty and the coordinator falls back to the primary
/// default.
pub struct VolumeEnumerator {
	config: MountConfig,
	strategies: Vec<Arc<dyn DiscoveryStrategy>>,
}

impl VolumeEnumerator {
	pub fn new(config: MountConfig) -> Self {
		let strategies: Vec<Arc<dyn DiscoveryStrategy>> = vec![
			Arc::new(SystemInfoStrategy::new(config.clone())),
			Arc::new(MountTableStrategy::new(config.clone())),
			Arc::new(PathScanStrategy::new(config.clone())),
		];
		Self { config, strategies }
	}

	pub fn with_strategies(
		config: MountConfig,
		strategies: Vec<Arc<dyn DiscoveryStrategy>>,
	) -> Self {
		Self { config, strategies }
	}

	pub async fn enumerate(&self) -> Vec<Volume> {
		for strategy in &self.strategies {
			if !strategy.is_available() {
				debug!(mechanism = strategy.name(), "discovery mechanism unavailable");
				continue;
			}
			match timeout(self.config.discovery_timeout, strategy.discover()).await {
				Ok(Ok(volumes)) if !volumes.is_empty() => {
					let volumes = dedup_by_identity(volumes);
					info!(
						mechanism = strategy.name(),
						count = volumes.len(),
						"discovered volumes"
					);
					return volumes;
				}
				Ok(Ok(_)) => {
					debug!(mechanism = strategy.name(), "discovery yielded no volumes");
				}
				Ok(Err(e)) => {
					warn!(mechanism = strategy.name(), %e, "discovery mechanism failed");
				}
				Err(_) => {
					warn!(mechanism = strategy.name(), "discovery mechanism timed out");
				}
			}
		}
		warn!("all discovery mechanisms yielded nothing");
		Vec::new()
	}
}

fn dedup_by_identity(volumes: Vec<Volume>) -> Vec<Volume> {
	let mut seen = HashSet::new();
	volumes
		.into_iter()
		.filter(|v| seen.insert(volume_identity(&v.advertised_path)))
		.collect()
}

//! End-to-end mount pass scenarios against a temp-directory storage layout.

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use volmount::{
	CommandOutput, ElevatedExecutor, MountConfig, MountStatus, ProbeOps, RealProbeOps,
	StorageSink, Volume, VolumeError, VolumeMountCoordinator, VolumeResult,
};

/// Records every mount handed to the serving collaborator.
#[derive(Default)]
struct RecordingSink {
	mounts: Mutex<Vec<(PathBuf, String)>>,
}

#[async_trait]
impl StorageSink for RecordingSink {
	async fn add_storage_mount(&self, path: &Path, label: &str) -> VolumeResult<()> {
		self.mounts.lock().push((path.to_path_buf(), label.to_string()));
		Ok(())
	}
}

struct RejectingSink;

#[async_trait]
impl StorageSink for RejectingSink {
	async fn add_storage_mount(&self, _path: &Path, _label: &str) -> VolumeResult<()> {
		Err(VolumeError::Sink("server not ready".to_string()))
	}
}

/// Real filesystem ops, except rename is rejected under the given prefixes
/// while the shared fault flag is set. Models an overlay mount that allows
/// create/write but rejects rename.
struct RenameBlockingOps {
	real: RealProbeOps,
	blocked_prefixes: Vec<PathBuf>,
	fault_active: Arc<AtomicBool>,
}

#[async_trait]
impl ProbeOps for RenameBlockingOps {
	async fn is_dir(&self, path: &Path) -> bool {
		self.real.is_dir(path).await
	}
	async fn create_new(&self, path: &Path) -> std::io::Result<()> {
		self.real.create_new(path).await
	}
	async fn write_payload(&self, path: &Path, payload: &[u8]) -> std::io::Result<()> {
		self.real.write_payload(path, payload).await
	}
	async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
		if self.fault_active.load(Ordering::SeqCst)
			&& self.blocked_prefixes.iter().any(|p| from.starts_with(p))
		{
			return Err(std::io::Error::new(
				std::io::ErrorKind::PermissionDenied,
				"overlay rejected rename",
			));
		}
		self.real.rename(from, to).await
	}
	async fn remove(&self, path: &Path) -> std::io::Result<()> {
		self.real.remove(path).await
	}
}

/// Real filesystem ops, except any probe under the given prefixes stalls
/// far past the per-volume deadline.
struct StallingOps {
	real: RealProbeOps,
	stalled_prefixes: Vec<PathBuf>,
}

#[async_trait]
impl ProbeOps for StallingOps {
	async fn is_dir(&self, path: &Path) -> bool {
		if self.stalled_prefixes.iter().any(|p| path.starts_with(p)) {
			tokio::time::sleep(std::time::Duration::from_secs(60)).await;
		}
		self.real.is_dir(path).await
	}
	async fn create_new(&self, path: &Path) -> std::io::Result<()> {
		self.real.create_new(path).await
	}
	async fn write_payload(&self, path: &Path, payload: &[u8]) -> std::io::Result<()> {
		self.real.write_payload(path, payload).await
	}
	async fn rename(&self, from: &Path, to: &Path) -> std::io::Result<()> {
		self.real.rename(from, to).await
	}
	async fn remove(&self, path: &Path) -> std::io::Result<()> {
		self.real.remove(path).await
	}
}

/// Fake superuser helper: clears the injected rename fault, as if the repair
/// sequence had fixed the raw mount, and records the commands it was given.
struct UnblockingExecutor {
	fault_active: Arc<AtomicBool>,
	commands: Mutex<Vec<String>>,
}

#[async_trait]
impl ElevatedExecutor for UnblockingExecutor {
	fn is_available(&self) -> bool {
		true
	}
	async fn execute(&self, command: &str) -> VolumeResult<CommandOutput> {
		self.commands.lock().push(command.to_string());
		self.fault_active.store(false, Ordering::SeqCst);
		Ok(CommandOutput {
			stdout: String::new(),
			stderr: String::new(),
			status: 0,
		})
	}
}

struct Fixture {
	_root: TempDir,
	config: MountConfig,
	primary: Volume,
	removable: Volume,
	advertised: PathBuf,
	raw_alias: PathBuf,
}

fn fixture() -> Fixture {
	let root = TempDir::new().unwrap();
	let primary_path = root.path().join("emulated/0");
	let advertised = root.path().join("storage/1234-5678");
	let raw_alias = root.path().join("media_rw/1234-5678");
	std::fs::create_dir_all(&primary_path).unwrap();
	std::fs::create_dir_all(&advertised).unwrap();
	std::fs::create_dir_all(&raw_alias).unwrap();

	let config = MountConfig {
		primary_path: primary_path.clone(),
		overlay_root: root.path().join("storage"),
		raw_mount_root: root.path().join("media_rw"),
		scan_roots: vec![root.path().join("storage"), root.path().join("media_rw")],
		..MountConfig::default()
	};
	let primary = Volume::new("Internal Storage", primary_path, true, false, true);
	let removable = Volume::new("SD Card", advertised.clone(), false, true, false);
	Fixture {
		_root: root,
		config,
		primary,
		removable,
		advertised,
		raw_alias,
	}
}

fn blocking_ops(fixture: &Fixture, fault_active: Arc<AtomicBool>) -> Arc<RenameBlockingOps> {
	Arc::new(RenameBlockingOps {
		real: RealProbeOps,
		blocked_prefixes: vec![fixture.advertised.clone(), fixture.raw_alias.clone()],
		fault_active,
	})
}

/// Scenario A: writable primary, removable whose every candidate rejects
/// rename, no elevated access. Primary mounts, removable is skipped with a
/// diagnosis naming the rename failure.
#[tokio::test]
async fn rename_rejection_skips_the_removable_volume() {
	let fixture = fixture();
	let sink = Arc::new(RecordingSink::default());
	let fault = Arc::new(AtomicBool::new(true));
	let coordinator = VolumeMountCoordinator::new(fixture.config.clone(), sink.clone())
		.with_probe_ops(blocking_ops(&fixture, fault));

	let decisions = coordinator
		.mount_volumes(vec![fixture.primary.clone(), fixture.removable.clone()])
		.await;

	assert_eq!(decisions.len(), 2);
	assert_eq!(decisions[0].status, MountStatus::Mounted);
	assert_eq!(decisions[0].chosen_path.as_ref(), Some(&fixture.config.primary_path));
	assert_eq!(decisions[0].label, "local");

	assert_eq!(decisions[1].status, MountStatus::Skipped);
	let diagnosis = decisions[1].diagnosis.as_ref().unwrap();
	assert!(diagnosis.contains("rename"), "diagnosis was: {diagnosis}");

	let mounts = sink.mounts.lock();
	assert_eq!(mounts.len(), 1);
	assert_eq!(mounts[0].0, fixture.config.primary_path);
}

/// Scenario B: same as A, but elevated access is enabled and the repair
/// sequence makes the raw alias writable. The removable volume mounts via
/// the raw alias, not the advertised path.
#[tokio::test]
async fn privileged_repair_recovers_the_raw_alias() {
	let mut fixture = fixture();
	fixture.config.elevated_enabled = true;
	let sink = Arc::new(RecordingSink::default());
	let fault = Arc::new(AtomicBool::new(true));
	let executor = Arc::new(UnblockingExecutor {
		fault_active: fault.clone(),
		commands: Mutex::new(Vec::new()),
	});
	let coordinator = VolumeMountCoordinator::new(fixture.config.clone(), sink.clone())
		.with_probe_ops(blocking_ops(&fixture, fault))
		.with_elevated_executor(executor.clone());

	let decisions = coordinator
		.mount_volumes(vec![fixture.primary.clone(), fixture.removable.clone()])
		.await;

	assert_eq!(decisions[1].status, MountStatus::Mounted);
	assert_eq!(decisions[1].chosen_path.as_ref(), Some(&fixture.raw_alias));
	assert_eq!(decisions[1].label, "SD Card");

	// The full repair sequence ran against the raw alias.
	let commands = executor.commands.lock();
	assert_eq!(commands.len(), 3);
	assert!(commands[0].starts_with("chmod -R 777"));
	assert!(commands[0].contains("media_rw/1234-5678"));

	let mounts = sink.mounts.lock();
	assert_eq!(mounts.len(), 2);
}

/// Scenario C: every discovery mechanism yields nothing. The coordinator
/// still offers the primary-storage default, without probing it.
#[tokio::test]
async fn empty_discovery_falls_back_to_the_primary_default() {
	let root = TempDir::new().unwrap();
	let config = MountConfig {
		// Deliberately nonexistent: the default is offered unprobed.
		primary_path: root.path().join("emulated/0"),
		scan_roots: vec![root.path().join("nothing-here")],
		..MountConfig::default()
	};
	let sink = Arc::new(RecordingSink::default());
	let coordinator =
		VolumeMountCoordinator::new(config.clone(), sink.clone()).with_strategies(vec![]);

	let decisions = coordinator.run().await;

	assert_eq!(decisions.len(), 1);
	assert_eq!(decisions[0].status, MountStatus::Mounted);
	assert_eq!(decisions[0].chosen_path.as_ref(), Some(&config.primary_path));
	assert_eq!(decisions[0].label, "local");

	let mounts = sink.mounts.lock();
	assert_eq!(mounts.len(), 1);
}

/// A volume whose device stalls mid-probe hits the per-volume deadline and
/// is skipped; the healthy volume still mounts in the same pass.
#[tokio::test]
async fn stalled_volume_hits_the_deadline_without_blocking_others() {
	let mut fixture = fixture();
	fixture.config.volume_deadline = std::time::Duration::from_millis(200);
	let sink = Arc::new(RecordingSink::default());
	let coordinator = VolumeMountCoordinator::new(fixture.config.clone(), sink.clone())
		.with_probe_ops(Arc::new(StallingOps {
			real: RealProbeOps,
			stalled_prefixes: vec![fixture.advertised.clone(), fixture.raw_alias.clone()],
		}));

	let decisions = coordinator
		.mount_volumes(vec![fixture.primary.clone(), fixture.removable.clone()])
		.await;

	assert_eq!(decisions[0].status, MountStatus::Mounted);
	assert_eq!(decisions[1].status, MountStatus::Skipped);
	let diagnosis = decisions[1].diagnosis.as_ref().unwrap();
	assert!(diagnosis.contains("deadline"), "diagnosis was: {diagnosis}");

	let mounts = sink.mounts.lock();
	assert_eq!(mounts.len(), 1);
	assert_eq!(mounts[0].0, fixture.config.primary_path);
}

/// Two passes over an unchanged filesystem make identical decisions.
#[tokio::test]
async fn repeated_passes_are_idempotent() {
	let fixture = fixture();
	let sink = Arc::new(RecordingSink::default());
	let fault = Arc::new(AtomicBool::new(true));
	let coordinator = VolumeMountCoordinator::new(fixture.config.clone(), sink)
		.with_probe_ops(blocking_ops(&fixture, fault));

	let volumes = vec![fixture.primary.clone(), fixture.removable.clone()];
	let first = coordinator.mount_volumes(volumes.clone()).await;
	let second = coordinator.mount_volumes(volumes).await;

	let summarize = |decisions: &[volmount::MountDecision]| {
		decisions
			.iter()
			.map(|d| (d.volume.id.clone(), d.status, d.chosen_path.clone()))
			.collect::<Vec<_>>()
	};
	assert_eq!(summarize(&first), summarize(&second));
}

/// A sink failure is logged but never rolls back a mounted decision.
#[tokio::test]
async fn sink_rejection_does_not_roll_back_the_decision() {
	let fixture = fixture();
	let coordinator =
		VolumeMountCoordinator::new(fixture.config.clone(), Arc::new(RejectingSink));

	let decisions = coordinator.mount_volumes(vec![fixture.primary.clone()]).await;

	assert_eq!(decisions[0].status, MountStatus::Mounted);
	assert!(coordinator
		.diagnostic_log()
		.snapshot()
		.contains("storage sink rejected mount"));
}

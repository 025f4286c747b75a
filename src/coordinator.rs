//! Per-volume mount orchestration.
//!
//! One pass runs at service startup, recomputes everything from scratch and
//! hands each accepted `(path, label)` pair to the external serving
//! collaborator. A volume moves through `Discovered -> CandidatesGenerated ->
//! Probing -> {Accepted | FixAttempt -> Reprobing -> {Accepted | Rejected} |
//! Rejected}`; failures never leave the volume they belong to.

use crate::{
	config::MountConfig,
	diagnostic::{DiagnosticLog, MountDiagnosticReporter},
	discovery::{DiscoveryStrategy, VolumeEnumerator},
	elevated::{default_executor, ElevatedExecutor, PrivilegedFixer},
	error::{VolumeError, VolumeResult},
	probe::{ProbeOps, WriteAccessProber},
	resolver::PathResolver,
	types::{MountDecision, Volume, WriteVerdict},
};
use async_trait::async_trait;
use futures::future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strum::Display;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// The external file-server collaborator. Mount hand-off failures are logged
/// and never roll back the pass.
#[async_trait]
pub trait StorageSink: Send + Sync {
	async fn add_storage_mount(&self, path: &Path, label: &str) -> VolumeResult<()>;
}

#[derive(Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "kebab-case")]
enum MountState {
	Discovered,
	CandidatesGenerated,
	Probing,
	FixAttempt,
	Reprobing,
	Accepted,
	Rejected,
}

pub struct VolumeMountCoordinator {
	config: MountConfig,
	enumerator: VolumeEnumerator,
	resolver: PathResolver,
	prober: WriteAccessProber,
	fixer: PrivilegedFixer,
	reporter: MountDiagnosticReporter,
	log: Arc<DiagnosticLog>,
	sink: Arc<dyn StorageSink>,
}

impl VolumeMountCoordinator {
	pub fn new(config: MountConfig, sink: Arc<dyn StorageSink>) -> Self {
		let log = Arc::new(DiagnosticLog::new(config.log_capacity_bytes));
		Self {
			enumerator: VolumeEnumerator::new(config.clone()),
			resolver: PathResolver::new(config.clone()),
			prober: WriteAccessProber::new(),
			fixer: PrivilegedFixer::new(default_executor(&config)),
			reporter: MountDiagnosticReporter::new(log.clone(), config.clone()),
			log,
			config,
			sink,
		}
	}

	/// Substitute the elevated-execution capability, e.g. with a fake in
	/// tests or a different helper on devices without `su`.
	pub fn with_elevated_executor(mut self, executor: Arc<dyn ElevatedExecutor>) -> Self {
		self.fixer = PrivilegedFixer::new(executor);
		self
	}

	pub fn with_probe_ops(mut self, ops: Arc<dyn ProbeOps>) -> Self {
		self.prober = WriteAccessProber::with_ops(ops);
		self
	}

	pub fn with_strategies(mut self, strategies: Vec<Arc<dyn DiscoveryStrategy>>) -> Self {
		self.enumerator = VolumeEnumerator::with_strategies(self.config.clone(), strategies);
		self
	}

	/// The capped log holding every diagnosis produced by this coordinator,
	/// for the host's log view.
	pub fn diagnostic_log(&self) -> Arc<DiagnosticLog> {
		self.log.clone()
	}

	/// Run one full mount pass: discover, then decide per volume.
	pub async fn run(&self) -> Vec<MountDecision> {
		let volumes = self.enumerator.enumerate().await;
		self.mount_volumes(volumes).await
	}

	/// Decide every volume and hand accepted mounts to the sink. Volumes are
	/// processed concurrently (disjoint filesystem subtrees); candidates of a
	/// single volume stay sequential so no path is probed twice at once.
	pub async fn mount_volumes(&self, volumes: Vec<Volume>) -> Vec<MountDecision> {
		if volumes.is_empty() {
			warn!("no volumes discovered, offering primary storage default");
			self.log
				.append("no volumes discovered, offering primary storage default");
			let decision = self.primary_default();
			self.hand_off(&decision).await;
			return vec![decision];
		}

		let total = volumes.len();
		let mut decisions = future::join_all(volumes.into_iter().map(|v| self.decide(v))).await;

		for decision in decisions.iter().filter(|d| d.is_mounted()) {
			self.hand_off(decision).await;
		}

		let mounted = decisions.iter().filter(|d| d.is_mounted()).count();
		let skipped = total - mounted;
		info!(total, mounted, skipped, "mount pass complete");
		self.log.append(&format!(
			"mount pass complete: {mounted}/{total} mounted, {skipped} skipped"
		));

		// The serving collaborator always gets at least one mount target.
		if mounted == 0 {
			warn!("no volume accepted, falling back to primary storage default");
			let decision = self.primary_default();
			self.hand_off(&decision).await;
			decisions.push(decision);
		}
		decisions
	}

	/// Per-volume deadline so a misbehaving storage device cannot stall
	/// service startup.
	async fn decide(&self, volume: Volume) -> MountDecision {
		match timeout(self.config.volume_deadline, self.process_volume(&volume)).await {
			Ok(decision) => decision,
			Err(_) => {
				let err = VolumeError::DeadlineExceeded(volume.id.clone());
				warn!(volume = %volume.id, %err, "volume processing timed out");
				self.log.append(&err.to_string());
				let label = self.label(&volume);
				MountDecision::skipped(volume, label, err.to_string())
			}
		}
	}

	async fn process_volume(&self, volume: &Volume) -> MountDecision {
		debug!(
			volume = %volume.id,
			state = %MountState::Discovered,
			primary = volume.is_primary,
			removable = volume.is_removable,
			"processing volume"
		);

		let candidates = self.resolver.resolve(volume);
		debug!(
			volume = %volume.id,
			state = %MountState::CandidatesGenerated,
			count = candidates.len(),
			"derived path candidates"
		);

		let mut last_probe = None;
		for candidate in &candidates {
			debug!(
				volume = %volume.id,
				state = %MountState::Probing,
				path = %candidate.path.display(),
				rationale = candidate.rationale,
				"probing candidate"
			);
			let result = self.prober.probe(&candidate.path).await;
			if result.verdict == WriteVerdict::Writable {
				return self.accept(volume, candidate.path.clone());
			}
			last_probe = Some(result);
		}

		// Last resort: elevated repair of the most promising candidate, then
		// exactly one re-probe. Requires the operator switch; availability is
		// checked by the fixer itself.
		if self.config.elevated_enabled {
			if let Some(target) = candidates.first().map(|c| c.path.clone()) {
				debug!(
					volume = %volume.id,
					state = %MountState::FixAttempt,
					path = %target.display(),
					"attempting privileged repair"
				);
				let fix = self.fixer.attempt_fix(&target).await;
				for line in &fix.detail {
					self.log.append(line);
				}
				if fix.attempted {
					debug!(volume = %volume.id, state = %MountState::Reprobing, "re-probing after repair");
					let result = self.prober.probe(&target).await;
					if result.verdict == WriteVerdict::Writable {
						return self.accept(volume, target);
					}
					last_probe = Some(result);
				}
			}
		}

		let probed_path = last_probe
			.as_ref()
			.map(|p| p.path.clone())
			.unwrap_or_else(|| volume.advertised_path.clone());
		let report = self.reporter.diagnose(&probed_path, last_probe.as_ref()).await;
		let diagnosis = format!(
			"{}\n{report}",
			VolumeError::Rejected(volume.display_name.clone())
		);
		warn!(volume = %volume.id, state = %MountState::Rejected, "volume skipped");
		MountDecision::skipped(volume.clone(), self.label(volume), diagnosis)
	}

	fn accept(&self, volume: &Volume, chosen_path: PathBuf) -> MountDecision {
		info!(
			volume = %volume.id,
			state = %MountState::Accepted,
			path = %chosen_path.display(),
			"volume accepted"
		);
		self.log.append(&format!(
			"mounted {} at {}",
			volume.display_name,
			chosen_path.display()
		));
		MountDecision::mounted(volume.clone(), chosen_path, self.label(volume))
	}

	fn label(&self, volume: &Volume) -> String {
		if volume.is_primary {
			self.config.primary_label.clone()
		} else {
			volume.display_name.clone()
		}
	}

	/// Best-effort default when nothing was accepted: the primary-storage
	/// candidate, offered without probing so the serving collaborator is
	/// never left without a mount target.
	fn primary_default(&self) -> MountDecision {
		let volume = Volume::new(
			"Internal Storage",
			self.config.primary_path.clone(),
			true,
			false,
			true,
		);
		let label = self.config.primary_label.clone();
		MountDecision::mounted(volume, self.config.primary_path.clone(), label)
	}

	async fn hand_off(&self, decision: &MountDecision) {
		let Some(path) = &decision.chosen_path else {
			return;
		};
		match self.sink.add_storage_mount(path, &decision.label).await {
			Ok(()) => {
				info!(label = %decision.label, path = %path.display(), "storage mount handed to server");
			}
			Err(e) => {
				// The decision stands; the server may pick the mount up on a
				// later restart.
				error!(label = %decision.label, %e, "storage sink rejected mount");
				self.log.append(&format!(
					"storage sink rejected mount {}: {e}",
					decision.label
				));
			}
		}
	}
}

//! Privileged command execution and last-resort permission repair.
//!
//! Elevated access is a narrow capability: callers hand a single command line
//! to an [`ElevatedExecutor`] and get output plus an exit status back. The
//! production executor shells out to the superuser helper; tests substitute a
//! fake without touching real privilege escalation.

use crate::{
	config::MountConfig,
	error::{VolumeError, VolumeResult},
	types::FixResult,
};
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Well-known superuser helper locations, checked once per process.
const HELPER_PATHS: &[&str] = &[
	"/sbin/su",
	"/system/bin/su",
	"/system/xbin/su",
	"/system/sd/xbin/su",
	"/system/bin/failsafe/su",
	"/data/local/su",
	"/data/local/bin/su",
	"/data/local/xbin/su",
	"/su/bin/su",
];

static HELPER_PRESENT: OnceCell<bool> = OnceCell::new();

#[derive(Debug, Clone)]
pub struct CommandOutput {
	pub stdout: String,
	pub stderr: String,
	pub status: i32,
}

impl CommandOutput {
	pub fn succeeded(&self) -> bool {
		self.status == 0
	}
}

#[async_trait]
pub trait ElevatedExecutor: Send + Sync {
	/// Whether elevated execution can be attempted on this device at all.
	fn is_available(&self) -> bool;

	/// Run one command elevated. A non-zero exit status is reported through
	/// `CommandOutput`, not as an error; errors mean the command never ran to
	/// completion (helper missing, spawn failure, timeout).
	async fn execute(&self, command: &str) -> VolumeResult<CommandOutput>;
}

/// Shells out to the `su` helper with a bounded timeout so a hung elevated
/// process cannot stall the mount pass.
pub struct SuExecutor {
	command_timeout: Duration,
}

impl SuExecutor {
	pub fn new(command_timeout: Duration) -> Self {
		Self { command_timeout }
	}
}

#[async_trait]
impl ElevatedExecutor for SuExecutor {
	fn is_available(&self) -> bool {
		*HELPER_PRESENT
			.get_or_init(|| HELPER_PATHS.iter().any(|p| Path::new(p).exists()))
	}

	async fn execute(&self, command: &str) -> VolumeResult<CommandOutput> {
		if !self.is_available() {
			return Err(VolumeError::ElevatedUnavailable(
				"no superuser helper found".to_string(),
			));
		}
		debug!(command, "running elevated command");
		let output = timeout(
			self.command_timeout,
			tokio::process::Command::new("su")
				.arg("-c")
				.arg(command)
				.kill_on_drop(true)
				.output(),
		)
		.await
		.map_err(|_| VolumeError::ElevatedTimeout(self.command_timeout))??;

		Ok(CommandOutput {
			stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
			stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
			status: output.status.code().unwrap_or(-1),
		})
	}
}

/// Last-resort permission repair for a path no candidate probe accepted.
/// Issues a bounded command sequence, each step independent of the others;
/// the coordinator re-probes exactly once afterwards.
pub struct PrivilegedFixer {
	executor: Arc<dyn ElevatedExecutor>,
}

impl PrivilegedFixer {
	pub fn new(executor: Arc<dyn ElevatedExecutor>) -> Self {
		Self { executor }
	}

	pub async fn attempt_fix(&self, path: &Path) -> FixResult {
		if !self.executor.is_available() {
			debug!(path = %path.display(), "skipping fix, elevated execution unavailable");
			return FixResult::not_attempted("elevated execution unavailable on this device");
		}

		info!(path = %path.display(), "attempting elevated permission repair");
		let mut detail = Vec::new();
		let mut any_succeeded = false;
		for command in repair_commands(path) {
			match self.executor.execute(&command).await {
				Ok(output) if output.succeeded() => {
					detail.push(format!("ok: {command}"));
					any_succeeded = true;
				}
				Ok(output) => {
					let stderr = output.stderr.trim();
					detail.push(format!("exit {}: {command} ({stderr})", output.status));
					warn!(command, status = output.status, stderr, "repair command failed");
				}
				Err(e) => {
					detail.push(format!("error: {command} ({e})"));
					warn!(command, %e, "repair command did not complete");
				}
			}
		}
		FixResult {
			attempted: true,
			succeeded: any_succeeded,
			detail,
		}
	}
}

/// Permission relaxation, ownership realignment to the serving process, then
/// security-label realignment for the raw media context.
fn repair_commands(path: &Path) -> Vec<String> {
	let target = path.display();
	vec![
		format!("chmod -R 777 '{target}'"),
		format!("chown -R {}:media_rw '{target}'", effective_uid()),
		format!("chcon -R u:object_r:media_rw_data_file:s0 '{target}'"),
	]
}

#[cfg(unix)]
fn effective_uid() -> u32 {
	// Safety: geteuid has no failure modes and touches no memory.
	unsafe { libc::geteuid() }
}

#[cfg(not(unix))]
fn effective_uid() -> u32 {
	0
}

/// Convenience constructor wired from operator configuration.
pub fn default_executor(config: &MountConfig) -> Arc<dyn ElevatedExecutor> {
	Arc::new(SuExecutor::new(config.command_timeout))
}

//! Storage volume resolution and write-access verification.
//!
//! Discovers every mass-storage volume visible to the host process, works out
//! which physical path actually grants write access despite overlay-mount
//! restrictions, verifies that access with live filesystem probes instead of
//! permission bits, and falls back to operator-authorized privileged repair
//! when ordinary access fails. Accepted `(path, label)` pairs are handed to
//! an external file-serving collaborator through [`StorageSink`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use volmount::{MountConfig, StorageSink, VolumeMountCoordinator, VolumeResult};
//!
//! struct Server;
//!
//! #[async_trait::async_trait]
//! impl StorageSink for Server {
//! 	async fn add_storage_mount(&self, path: &std::path::Path, label: &str) -> VolumeResult<()> {
//! 		println!("mount {label} -> {}", path.display());
//! 		Ok(())
//! 	}
//! }
//!
//! # async fn first_run() {
//! let coordinator = VolumeMountCoordinator::new(MountConfig::default(), Arc::new(Server));
//! let _decisions = coordinator.run().await;
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod diagnostic;
pub mod discovery;
pub mod elevated;
pub mod error;
pub mod probe;
pub mod resolver;
pub mod types;
pub mod utils;

pub use config::MountConfig;
pub use coordinator::{StorageSink, VolumeMountCoordinator};
pub use diagnostic::{DiagnosisReport, DiagnosticLog, MountDiagnosticReporter};
pub use discovery::{
	DiscoveryStrategy, MountTableStrategy, PathScanStrategy, SystemInfoStrategy, VolumeEnumerator,
};
pub use elevated::{CommandOutput, ElevatedExecutor, PrivilegedFixer, SuExecutor};
pub use error::{VolumeError, VolumeResult};
pub use probe::{ProbeOps, RealProbeOps, WriteAccessProber};
pub use resolver::PathResolver;
pub use types::{
	FixResult, MountDecision, MountStatus, PathCandidate, ProbeResult, ProbeStage, Volume,
	WriteVerdict,
};

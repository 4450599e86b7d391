//! Video pipeline module
//!
//! This module implements the supervised two-process capture pipeline:
//! - LogRing bounded diagnostic buffers, one per child process
//! - Pipeline wiring the capture process into the transcode process
//! - StreamSupervisor owning lifecycle, liveness monitoring, and restarts

pub mod logring;
pub mod process;
pub mod supervisor;

pub use logring::LogRing;
pub use process::{CameraPipelineLauncher, Pipeline, PipelineError, PipelineLauncher};
pub use supervisor::{StreamSupervisor, SupervisorStatus};

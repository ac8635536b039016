//! Utility modules for ilm-ingest

pub mod process;
pub mod retry;
pub mod temp_artifact;

pub use process::{CommandRunner, ProcessError, ProcessOutput, ProcessSpec, TokioCommandRunner};
pub use retry::run_with_retry;
pub use temp_artifact::TempArtifact;

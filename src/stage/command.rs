//! External-program stage.
//!
//! Runs `program [args...] <unit>` as a child process. Captured stdout is
//! logged at debug level, captured stderr at warn level. A non-zero exit or a
//! spawn failure is a [`UnitError::StageFailed`] carrying the exit status and
//! the captured output.

use super::{Stage, StageKind};
use crate::error::UnitError;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// A stage backed by an external program.
#[derive(Debug, Clone)]
pub struct CommandStage {
    kind: StageKind,
    program: String,
    args: Vec<String>,
}

impl CommandStage {
    pub fn new(kind: StageKind, program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            kind,
            program: program.into(),
            args,
        }
    }

    fn display_command(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Stage for CommandStage {
    fn kind(&self) -> StageKind {
        self.kind
    }

    async fn run(&self, unit: &Path) -> Result<(), UnitError> {
        info!(
            "Running {} stage: {} '{}'",
            self.kind,
            self.display_command(),
            unit.display()
        );

        // The child is killed if this future is dropped by a timeout.
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(unit)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| UnitError::StageFailed {
                stage: self.kind,
                unit: unit.to_path_buf(),
                status: "spawn failed".into(),
                detail: format!("could not start '{}': {}", self.program, e),
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !stdout.trim().is_empty() {
            debug!("{} stdout for '{}':\n{}", self.kind, unit.display(), stdout.trim_end());
        }
        if !stderr.trim().is_empty() {
            warn!("{} stderr for '{}':\n{}", self.kind, unit.display(), stderr.trim_end());
        }

        if output.status.success() {
            info!("{} stage succeeded for '{}'", self.kind, unit.display());
            return Ok(());
        }

        Err(UnitError::StageFailed {
            stage: self.kind,
            unit: unit.to_path_buf(),
            status: output.status.to_string(),
            detail: format!(
                "command: {}\nstderr: {}\nstdout: {}",
                self.display_command(),
                stderr.trim(),
                stdout.trim()
            ),
        })
    }
}

//! Errors surfaced by the upload pipeline.

use std::fmt;

use thiserror::Error;

use crate::command::CommandError;

use super::poll::PollError;
use super::state::UploadStep;

/// Errors raised while publishing one image.
#[derive(Debug, Error)]
pub enum UploadError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the region reports no usable availability zone.
    #[error("no availability zone is available in {region}")]
    NoAvailabilityZone {
        /// Region that was queried.
        region: String,
    },
    /// Raised when the volume import output carries no task id.
    #[error("volume import output did not contain a conversion task id: {output}")]
    TaskIdNotFound {
        /// Import command output.
        output: String,
    },
    /// Raised when a completed conversion task reports no volume id.
    #[error("conversion task {task_id} completed without a volume id: {output}")]
    MalformedStatus {
        /// Conversion task identifier.
        task_id: String,
        /// Status command output.
        output: String,
    },
    /// Raised when the converted volume is not listed by the provider.
    #[error("volume {volume_id} was not found in {region}")]
    VolumeNotFound {
        /// Volume identifier reported by the conversion task.
        volume_id: String,
        /// Region that was searched.
        region: String,
    },
    /// Raised when a snapshot disappears while waiting for completion.
    #[error("snapshot {snapshot_id} is no longer listed by the provider")]
    SnapshotNotFound {
        /// Snapshot identifier.
        snapshot_id: String,
    },
    /// Raised when the provider reports the snapshot as failed.
    #[error("snapshot {snapshot_id} entered the error state")]
    SnapshotFailed {
        /// Snapshot identifier.
        snapshot_id: String,
    },
    /// Raised when every candidate image name collides.
    #[error("image name {name} still collides after {attempts} attempts")]
    DuplicateNameExhausted {
        /// Last candidate name tried.
        name: String,
        /// Number of registration attempts made.
        attempts: u32,
    },
    /// Raised when removing a provider resource fails.
    #[error("failed to clean up {resource}: {source}")]
    CleanupFailed {
        /// Resource that could not be removed (for example `volume vol-1`).
        resource: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Raised when a provider call fails.
    #[error("failed to {operation}: {source}")]
    Provider {
        /// Operation that failed.
        operation: &'static str,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Raised when no driver can be resolved for the region.
    #[error("failed to resolve a driver for {region}: {source}")]
    Driver {
        /// Region the driver was requested for.
        region: String,
        /// Provider-specific error.
        #[source]
        source: E,
    },
    /// Raised when an external command exits with a non-zero status.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandExecutionFailed {
        /// Program that failed.
        program: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when an external command cannot be started.
    #[error("command could not be started: {0}")]
    Command(#[source] CommandError),
    /// Raised when a bounded wait runs out of attempts.
    #[error("{operation} did not finish after {attempts} attempts")]
    Timeout {
        /// Operation that was being waited on.
        operation: &'static str,
        /// Attempts made before giving up.
        attempts: u32,
    },
    /// Raised when the batch is cancelled.
    #[error("{operation} was cancelled")]
    Cancelled {
        /// Operation in progress when cancellation was observed.
        operation: &'static str,
    },
}

impl<E> From<CommandError> for UploadError<E>
where
    E: std::error::Error + 'static,
{
    fn from(value: CommandError) -> Self {
        match value {
            CommandError::Failure {
                program,
                status_text,
                stderr,
                ..
            } => Self::CommandExecutionFailed {
                program,
                status_text,
                stderr,
            },
            spawn @ CommandError::Spawn { .. } => Self::Command(spawn),
        }
    }
}

impl<E> UploadError<E>
where
    E: std::error::Error + 'static,
{
    /// Converts the outcome of a poll loop into an upload error.
    pub(crate) fn from_poll(error: PollError<Self>, operation: &'static str) -> Self {
        match error {
            PollError::Failed(inner) => inner,
            PollError::Exhausted { attempts } => Self::Timeout {
                operation,
                attempts,
            },
            PollError::Cancelled => Self::Cancelled { operation },
        }
    }
}

/// A failed job: the step it failed at, the error, and any cleanup failure.
#[derive(Debug)]
pub struct UploadFailure<E>
where
    E: std::error::Error + 'static,
{
    /// Step that was in progress when the job failed.
    pub step: UploadStep,
    /// Error that failed the job.
    pub error: UploadError<E>,
    /// Error raised by the cleanup routine, if cleanup also failed.
    pub cleanup_error: Option<UploadError<E>>,
}

impl<E> fmt::Display for UploadFailure<E>
where
    E: std::error::Error + 'static,
{
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} failed: {}", self.step, self.error)?;
        if let Some(cleanup) = &self.cleanup_error {
            write!(formatter, " (cleanup also failed: {cleanup})")?;
        }
        Ok(())
    }
}

impl<E> std::error::Error for UploadFailure<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{DriverOperation, ScriptedDriverError};
    use rstest::rstest;

    fn scripted(operation: DriverOperation, message: &str) -> ScriptedDriverError {
        ScriptedDriverError::Failed {
            operation,
            message: message.to_owned(),
        }
    }

    #[rstest]
    fn failure_names_step_and_cleanup_error() {
        let failure = UploadFailure {
            step: UploadStep::RegisterImage,
            error: UploadError::Provider {
                operation: "register image",
                source: scripted(DriverOperation::RegisterImage, "quota exceeded"),
            },
            cleanup_error: Some(UploadError::CleanupFailed {
                resource: String::from("image ami-1"),
                source: scripted(DriverOperation::DeleteImage, "image in use"),
            }),
        };

        let rendered = failure.to_string();

        assert!(rendered.starts_with("register image failed:"), "rendered: {rendered}");
        assert!(rendered.contains("quota exceeded"), "rendered: {rendered}");
        assert!(
            rendered.contains("cleanup also failed: failed to clean up image ami-1"),
            "rendered: {rendered}"
        );
    }

    #[rstest]
    fn failure_without_cleanup_error_has_no_note() {
        let failure: UploadFailure<ScriptedDriverError> = UploadFailure {
            step: UploadStep::ShareSnapshot,
            error: UploadError::Provider {
                operation: "make snapshot public",
                source: scripted(DriverOperation::ModifySnapshotAttribute, "access denied"),
            },
            cleanup_error: None,
        };

        assert!(!failure.to_string().contains("cleanup also failed"));
    }
}

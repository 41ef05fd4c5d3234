//! Batch dispatch: download each image once, then publish every variant.
//!
//! [`BatchDispatcher::dispatch`] expands each URL into one job per
//! virtualization and volume type, downloads every URL into a shared
//! temporary directory, and runs the jobs on a bounded pool. A failing job
//! never aborts its siblings; every job ends up in the [`BatchReport`].

use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};
use futures::stream::{self, StreamExt};
use thiserror::Error;

use crate::command::{CommandLine, CommandRunner};
use crate::config::{ConfigError, Ec2Config, PublishConfig};
use crate::driver::DriverFactory;
use crate::job::{JobError, UploadJob, VolumeType, jobs_for_url};
use crate::notify::Notifier;
use crate::upload::{ImageHandle, UploadOrchestrator, UploadStep};

/// Prefix of the per-batch download directory.
pub const WORKSPACE_PREFIX: &str = "ami-publish-";

/// Settings that shape a batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchSettings {
    /// Path to the download tool.
    pub download_bin: String,
    /// Region every job publishes to.
    pub region: String,
    /// Volume types each virtualization type is published with.
    pub volume_types: Vec<VolumeType>,
    /// Number of downloads or jobs run concurrently.
    pub workers: usize,
}

impl BatchSettings {
    /// Derives batch settings from loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when no region is configured or a volume type
    /// is unknown.
    pub fn from_config(ec2: &Ec2Config, publish: &PublishConfig) -> Result<Self, ConfigError> {
        let region = ec2.primary_region().ok_or_else(|| {
            ConfigError::MissingField(String::from(
                "missing target region: set AMI_PUBLISH_EC2_REGIONS or add regions to ami-publish.toml",
            ))
        })?;
        Ok(Self {
            download_bin: publish.download_bin.trim().to_owned(),
            region: region.to_owned(),
            volume_types: ec2.volume_types()?,
            workers: publish.workers.max(1),
        })
    }
}

/// Errors that stop a batch before any job runs.
#[derive(Debug, Error)]
pub enum BatchError {
    /// Raised when a URL cannot be turned into jobs.
    #[error("cannot publish {url}: {source}")]
    InvalidJob {
        /// Offending URL.
        url: String,
        /// Underlying validation error.
        #[source]
        source: JobError,
    },
    /// Raised when the download directory cannot be created.
    #[error("failed to create download directory: {0}")]
    Workspace(#[source] std::io::Error),
    /// Raised when the download directory path is not valid UTF-8.
    #[error("download directory {} is not valid UTF-8", path.display())]
    NonUtf8Workspace {
        /// Path returned by the operating system.
        path: PathBuf,
    },
}

/// Final state of one job.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum JobOutcome {
    /// The image was registered.
    Published(ImageHandle),
    /// The job failed at `step`.
    Failed {
        /// Step that was in progress.
        step: UploadStep,
        /// Human readable failure, including any cleanup failure.
        message: String,
    },
}

/// Outcome of one job within a batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct JobReport {
    /// The job that ran.
    pub job: UploadJob,
    /// How it ended.
    pub outcome: JobOutcome,
}

impl JobReport {
    /// Whether the job published an image.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Published(_))
    }
}

/// Per-job outcomes of a batch, in planning order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BatchReport {
    jobs: Vec<JobReport>,
}

impl BatchReport {
    /// Every job report.
    #[must_use]
    pub fn jobs(&self) -> &[JobReport] {
        &self.jobs
    }

    /// Number of jobs that published an image.
    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.jobs.iter().filter(|report| report.is_success()).count()
    }

    /// Number of jobs that failed.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.jobs.len() - self.succeeded()
    }

    /// Whether every job published an image.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.jobs.iter().all(JobReport::is_success)
    }
}

impl FromIterator<JobReport> for BatchReport {
    fn from_iter<I: IntoIterator<Item = JobReport>>(iter: I) -> Self {
        Self {
            jobs: iter.into_iter().collect(),
        }
    }
}

struct PlannedUrl {
    url: String,
    jobs: Vec<(usize, UploadJob)>,
}

/// Runs batches of image URLs through an [`UploadOrchestrator`].
#[derive(Debug)]
pub struct BatchDispatcher<F, R, N>
where
    F: DriverFactory,
    R: CommandRunner,
    N: Notifier,
{
    orchestrator: UploadOrchestrator<F, R, N>,
    runner: R,
    settings: BatchSettings,
}

impl<F, R, N> BatchDispatcher<F, R, N>
where
    F: DriverFactory,
    R: CommandRunner,
    N: Notifier,
{
    /// Creates a dispatcher; `runner` executes the download tool.
    #[must_use]
    pub const fn new(
        orchestrator: UploadOrchestrator<F, R, N>,
        runner: R,
        settings: BatchSettings,
    ) -> Self {
        Self {
            orchestrator,
            runner,
            settings,
        }
    }

    /// Orchestrator used for each job.
    #[must_use]
    pub const fn orchestrator(&self) -> &UploadOrchestrator<F, R, N> {
        &self.orchestrator
    }

    /// Downloads and publishes every URL, returning one report per job.
    ///
    /// The download directory is removed once every job has finished.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError`] when a URL is unusable or the download
    /// directory cannot be prepared. Job failures are reported, not raised.
    pub async fn dispatch(&self, urls: &[String]) -> Result<BatchReport, BatchError> {
        let workspace = tempfile::Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir()
            .map_err(BatchError::Workspace)?;
        let working_dir = Utf8PathBuf::from_path_buf(workspace.path().to_path_buf())
            .map_err(|path| BatchError::NonUtf8Workspace { path })?;

        let dir = working_dir.as_path();
        let plan = self.plan(urls, dir)?;
        tracing::info!(
            urls = plan.len(),
            jobs = plan.iter().map(|planned| planned.jobs.len()).sum::<usize>(),
            workers = self.settings.workers,
            region = %self.settings.region,
            "dispatching batch"
        );

        let downloads = stream::iter(&plan)
            .map(|planned| async move {
                let result = self.download(&planned.url, dir).await;
                (planned, result)
            })
            .buffer_unordered(self.settings.workers)
            .collect::<Vec<_>>()
            .await;

        let mut reports = Vec::new();
        let mut runnable = Vec::new();
        for (planned, result) in downloads {
            match result {
                Ok(()) => runnable.extend(planned.jobs.iter().cloned()),
                Err(message) => reports.extend(planned.jobs.iter().map(|(index, job)| {
                    (
                        *index,
                        JobReport {
                            job: job.clone(),
                            outcome: JobOutcome::Failed {
                                step: UploadStep::Download,
                                message: message.clone(),
                            },
                        },
                    )
                })),
            }
        }

        let published = stream::iter(runnable)
            .map(|(index, job)| async move { (index, self.run_job(job).await) })
            .buffer_unordered(self.settings.workers)
            .collect::<Vec<_>>()
            .await;
        reports.extend(published);
        reports.sort_by_key(|(index, _)| *index);

        if let Err(err) = workspace.close() {
            tracing::warn!(path = %working_dir, error = %err, "failed to remove download directory");
        }

        let report = reports
            .into_iter()
            .map(|(_, job_report)| job_report)
            .collect::<BatchReport>();
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            "batch finished"
        );
        Ok(report)
    }

    fn plan(&self, urls: &[String], working_dir: &Utf8Path) -> Result<Vec<PlannedUrl>, BatchError> {
        let mut next_index = 0_usize;
        let mut plan = Vec::with_capacity(urls.len());
        for url in urls {
            let jobs = jobs_for_url(
                url,
                working_dir,
                &self.settings.region,
                &self.settings.volume_types,
            )
            .map_err(|source| BatchError::InvalidJob {
                url: url.clone(),
                source,
            })?;
            let indexed = jobs
                .into_iter()
                .map(|job| {
                    let index = next_index;
                    next_index += 1;
                    (index, job)
                })
                .collect();
            plan.push(PlannedUrl {
                url: url.trim().to_owned(),
                jobs: indexed,
            });
        }
        Ok(plan)
    }

    async fn download(&self, url: &str, working_dir: &Utf8Path) -> Result<(), String> {
        let command = CommandLine::new(self.settings.download_bin.as_str())
            .arg(url)
            .arg("-P")
            .arg(working_dir.as_str());
        tracing::info!(url, dir = %working_dir, "downloading image");
        self.runner
            .run(&command)
            .await
            .and_then(|output| output.into_success(command.program()))
            .map(|_| ())
            .map_err(|err| {
                tracing::error!(url, error = %err, "download failed");
                format!("download of {url} failed: {err}")
            })
    }

    async fn run_job(&self, job: UploadJob) -> JobReport {
        let outcome = match self.orchestrator.execute(&job).await {
            Ok(handle) => JobOutcome::Published(handle),
            Err(failure) => JobOutcome::Failed {
                step: failure.step,
                message: failure.to_string(),
            },
        };
        JobReport { job, outcome }
    }
}

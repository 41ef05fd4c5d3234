//! The per-job upload pipeline.
//!
//! [`UploadOrchestrator::run`] takes one downloaded image through volume
//! import, conversion, snapshotting, sharing, and image registration against
//! a single region. Each step is strictly sequential; failures trigger the
//! configured cleanup of whatever the job created so far.

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::command::CommandRunner;
use crate::config::{
    DEFAULT_CONVERSION_MAX_ATTEMPTS, DEFAULT_REGISTER_MAX_ATTEMPTS, DEFAULT_SNAPSHOT_MAX_ATTEMPTS,
    Ec2Config, PublishConfig,
};
use crate::driver::{CloudDriver, DriverFactory, FactoryError, SnapshotAttribute};
use crate::job::{UploadJob, VirtualizationType, VolumeType};
use crate::notify::{Notifier, UploadEvent};

mod cleanup;
mod commands;
mod conversion;
mod error;
mod naming;
mod poll;
mod register;
mod snapshot;
mod state;

pub use cleanup::cleanup;
pub use commands::{
    DEFAULT_DESCRIBE_CONVERSION_TASKS_BIN, DEFAULT_IMPORT_VOLUME_BIN, IMAGE_FORMAT, ImportTools,
};
pub use conversion::{
    CONVERSION_POLL_INTERVAL, ConversionPoller, ConversionStatus, ConversionTask,
    parse_conversion_status, parse_task_id,
};
pub use error::{UploadError, UploadFailure};
pub use naming::{SNAPSHOT_NAME_PREFIX, image_name, snapshot_name};
pub use poll::{Poll, PollError, PollPolicy, poll_until};
pub use register::{ImageRegistrar, next_candidate_name, registration_for};
pub use snapshot::{SNAPSHOT_POLL_INTERVAL, SnapshotWaiter};
pub use state::{UploadState, UploadStep};

/// Tunables shared by every job in a batch.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UploadSettings {
    /// Bucket name prefix; the bucket used is `{bucket_name}-{region}`.
    pub bucket_name: String,
    /// Size of the image root volume in GiB.
    pub volume_size_gb: u32,
    /// Whether to clean up provider resources when a job fails.
    pub clean_up_on_failure: bool,
    /// Whether cleanup also deregisters a registered image.
    pub delete_images_on_failure: bool,
    /// Polling discipline for conversion tasks.
    pub conversion_policy: PollPolicy,
    /// Polling discipline for snapshot completion.
    pub snapshot_policy: PollPolicy,
    /// Cap on registration attempts (`None` retries renames indefinitely).
    pub register_max_attempts: Option<u32>,
}

impl UploadSettings {
    /// Settings with the default polling intervals and caps.
    #[must_use]
    pub fn new(bucket_name: impl Into<String>, volume_size_gb: u32) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            volume_size_gb,
            clean_up_on_failure: true,
            delete_images_on_failure: true,
            conversion_policy: PollPolicy::new(
                CONVERSION_POLL_INTERVAL,
                Some(DEFAULT_CONVERSION_MAX_ATTEMPTS),
            ),
            snapshot_policy: PollPolicy::new(
                SNAPSHOT_POLL_INTERVAL,
                Some(DEFAULT_SNAPSHOT_MAX_ATTEMPTS),
            ),
            register_max_attempts: Some(DEFAULT_REGISTER_MAX_ATTEMPTS),
        }
    }

    /// Settings derived from loaded configuration.
    #[must_use]
    pub fn from_config(ec2: &Ec2Config, publish: &PublishConfig) -> Self {
        Self {
            bucket_name: ec2.bucket_name.trim().to_owned(),
            volume_size_gb: ec2.vol_size,
            clean_up_on_failure: publish.clean_up_on_failure,
            delete_images_on_failure: publish.delete_images_on_failure,
            conversion_policy: PollPolicy::from_config(
                CONVERSION_POLL_INTERVAL,
                publish.conversion_max_attempts,
            ),
            snapshot_policy: PollPolicy::from_config(
                SNAPSHOT_POLL_INTERVAL,
                publish.snapshot_max_attempts,
            ),
            register_max_attempts: (publish.register_max_attempts > 0)
                .then_some(publish.register_max_attempts),
        }
    }

    /// Bucket used for imports into `region`.
    #[must_use]
    pub fn bucket_for_region(&self, region: &str) -> String {
        format!("{}-{region}", self.bucket_name)
    }
}

/// A published image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageHandle {
    /// Provider image id.
    pub image_id: String,
    /// Final image name.
    pub image_name: String,
    /// Region the image was registered in.
    pub region: String,
    /// Virtualization type of the image.
    pub virtualization_type: VirtualizationType,
    /// Volume type of the image.
    pub volume_type: VolumeType,
}

type JobError<F> = UploadError<FactoryError<F>>;

/// Drives one [`UploadJob`] through the pipeline.
#[derive(Debug)]
pub struct UploadOrchestrator<F, R, N>
where
    F: DriverFactory,
    R: CommandRunner,
    N: Notifier,
{
    factory: F,
    runner: R,
    tools: ImportTools,
    notifier: N,
    settings: UploadSettings,
    cancel: CancellationToken,
    compose: Option<Value>,
}

impl<F, R, N> UploadOrchestrator<F, R, N>
where
    F: DriverFactory,
    R: CommandRunner,
    N: Notifier,
{
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(
        factory: F,
        runner: R,
        tools: ImportTools,
        notifier: N,
        settings: UploadSettings,
    ) -> Self {
        Self {
            factory,
            runner,
            tools,
            notifier,
            settings,
            cancel: CancellationToken::new(),
            compose: None,
        }
    }

    /// Uses `cancel` to abort waits and pending steps.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Attaches compose metadata to every notification.
    #[must_use]
    pub fn with_compose(mut self, compose: Option<Value>) -> Self {
        self.compose = compose;
        self
    }

    /// Settings the orchestrator runs with.
    #[must_use]
    pub const fn settings(&self) -> &UploadSettings {
        &self.settings
    }

    /// Cancellation token observed by the orchestrator.
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Publishes `job` and returns the registered image.
    ///
    /// # Errors
    ///
    /// Returns the [`UploadError`] that failed the job. A cleanup failure is
    /// logged and never replaces it; use [`Self::execute`] to inspect both.
    pub async fn run(&self, job: &UploadJob) -> Result<ImageHandle, JobError<F>> {
        self.execute(job).await.map_err(|failure| failure.error)
    }

    /// Publishes `job`, reporting the failing step and any cleanup failure.
    ///
    /// # Errors
    ///
    /// Returns an [`UploadFailure`] naming the step that failed.
    pub async fn execute(
        &self,
        job: &UploadJob,
    ) -> Result<ImageHandle, UploadFailure<FactoryError<F>>> {
        self.notifier
            .publish(&UploadEvent::upload_started(job, self.compose.as_ref()));

        let mut state = UploadState::new();
        let driver = match self.factory.driver_for_region(job.region()) {
            Ok(driver) => driver,
            Err(source) => {
                let error = UploadError::Driver {
                    region: job.region().to_owned(),
                    source,
                };
                log_failure(job, state.step(), &error);
                return Err(UploadFailure {
                    step: state.step(),
                    error,
                    cleanup_error: None,
                });
            }
        };

        match self.publish(&driver, job, &mut state).await {
            Ok(handle) => Ok(handle),
            Err(error) => Err(self.fail(&driver, job, &mut state, error).await),
        }
    }

    async fn publish(
        &self,
        driver: &F::Driver,
        job: &UploadJob,
        state: &mut UploadState,
    ) -> Result<ImageHandle, JobError<F>> {
        state.advance(UploadStep::ImportVolume);
        self.ensure_not_cancelled("volume import")?;
        let task = self.import_volume(driver, job).await?;

        state.advance(UploadStep::AwaitConversion);
        let volume_id = ConversionPoller::new(
            &self.runner,
            &self.tools,
            self.settings.conversion_policy,
            &self.cancel,
        )
        .poll::<FactoryError<F>>(&task)
        .await?;

        state.advance(UploadStep::LocateVolume);
        let volume = driver
            .list_volumes()
            .await
            .map_err(|source| UploadError::Provider {
                operation: "list volumes",
                source,
            })?
            .into_iter()
            .find(|candidate| candidate.id == volume_id)
            .ok_or_else(|| UploadError::VolumeNotFound {
                volume_id: volume_id.clone(),
                region: job.region().to_owned(),
            })?;
        state.record_volume(volume.clone());

        state.advance(UploadStep::Snapshot);
        let mut snapshot = driver
            .create_volume_snapshot(&volume, &snapshot_name(job.build_name()))
            .await
            .map_err(|source| UploadError::Provider {
                operation: "create snapshot",
                source,
            })?;
        state.record_snapshot(snapshot.clone());
        tracing::info!(snapshot_id = %snapshot.id, volume_id = %volume.id, "waiting for snapshot");
        SnapshotWaiter::new(driver, self.settings.snapshot_policy, &self.cancel)
            .wait(&mut snapshot)
            .await?;
        state.record_snapshot(snapshot.clone());

        state.advance(UploadStep::ShareSnapshot);
        driver
            .modify_snapshot_attribute(&snapshot, &SnapshotAttribute::public())
            .await
            .map_err(|source| UploadError::Provider {
                operation: "make snapshot public",
                source,
            })?;

        state.advance(UploadStep::DestroyVolume);
        tracing::info!(volume_id = %volume.id, "destroying staging volume");
        driver
            .destroy_volume(&volume)
            .await
            .map_err(|source| UploadError::CleanupFailed {
                resource: format!("volume {}", volume.id),
                source,
            })?;
        state.clear_volume();

        state.advance(UploadStep::RegisterImage);
        self.ensure_not_cancelled("image registration")?;
        let request = registration_for(job, &snapshot, self.settings.volume_size_gb);
        let image = ImageRegistrar::new(driver, self.settings.register_max_attempts)
            .register(request)
            .await?;
        state.record_image(image.clone());

        state.advance(UploadStep::Notify);
        self.notifier.publish(&UploadEvent::image_created(
            job,
            &image.id,
            self.compose.as_ref(),
        ));

        Ok(ImageHandle {
            image_id: image.id,
            image_name: image.name,
            region: job.region().to_owned(),
            virtualization_type: job.virtualization_type(),
            volume_type: job.volume_type(),
        })
    }

    async fn import_volume(
        &self,
        driver: &F::Driver,
        job: &UploadJob,
    ) -> Result<ConversionTask, JobError<F>> {
        let zone = driver
            .list_availability_zones(true)
            .await
            .map_err(|source| UploadError::Provider {
                operation: "list availability zones",
                source,
            })?
            .into_iter()
            .next()
            .ok_or_else(|| UploadError::NoAvailabilityZone {
                region: job.region().to_owned(),
            })?;

        let bucket = self.settings.bucket_for_region(job.region());
        let command = self.tools.import_volume(job, &bucket, &zone.name);
        tracing::info!(
            url = job.url(),
            region = job.region(),
            zone = %zone.name,
            bucket = %bucket,
            "importing volume"
        );
        let output = self
            .runner
            .run(&command)
            .await?
            .into_success(command.program())?;
        let task_id = parse_task_id(&output.stdout).ok_or_else(|| UploadError::TaskIdNotFound {
            output: output.stdout.trim().to_owned(),
        })?;
        tracing::info!(task_id = %task_id, region = job.region(), "volume import submitted");
        Ok(ConversionTask {
            task_id,
            region: job.region().to_owned(),
        })
    }

    fn ensure_not_cancelled(&self, operation: &'static str) -> Result<(), JobError<F>> {
        if self.cancel.is_cancelled() {
            return Err(UploadError::Cancelled { operation });
        }
        Ok(())
    }

    async fn fail(
        &self,
        driver: &F::Driver,
        job: &UploadJob,
        state: &mut UploadState,
        error: JobError<F>,
    ) -> UploadFailure<FactoryError<F>> {
        let step = state.step();
        log_failure(job, step, &error);
        let cleanup_error = if self.settings.clean_up_on_failure {
            cleanup(driver, state, self.settings.delete_images_on_failure)
                .await
                .err()
        } else {
            None
        };
        if let Some(cleanup_failure) = &cleanup_error {
            tracing::warn!(
                url = job.url(),
                step = %step,
                error = %cleanup_failure,
                "cleanup after failed upload also failed"
            );
        }
        UploadFailure {
            step,
            error,
            cleanup_error,
        }
    }
}

fn log_failure<E>(job: &UploadJob, step: UploadStep, error: &UploadError<E>)
where
    E: std::error::Error + 'static,
{
    tracing::error!(
        url = job.url(),
        region = job.region(),
        virtualization_type = %job.virtualization_type(),
        volume_type = %job.volume_type(),
        step = %step,
        error = %error,
        "upload failed"
    );
}

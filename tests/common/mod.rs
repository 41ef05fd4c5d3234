//! Shared fixtures for the upload pipeline integration tests.

use std::time::Duration;

use ami_publish::test_support::{
    RecordingNotifier, ScriptedDriver, ScriptedDriverFactory, ScriptedRunner,
    conversion_completed_output, import_volume_output,
};
use ami_publish::upload::PollPolicy;
use ami_publish::{
    Ec2Credentials, ImportTools, UploadJob, UploadOrchestrator, UploadSettings,
    VirtualizationType, VolumeType,
};

pub const REGION: &str = "us-east-1";
pub const TASK_ID: &str = "import-vol-ffx1e2a3";
pub const VOLUME_ID: &str = "vol-0123456789abcdef0";
pub const IMAGE_URL: &str =
    "https://kojipkgs.example.org/compose/Fedora-Cloud-Base-27-1.6.x86_64.raw.xz";

pub type TestOrchestrator =
    UploadOrchestrator<ScriptedDriverFactory, ScriptedRunner, RecordingNotifier>;

/// Scripted collaborators with handles kept for assertions.
pub struct Pipeline {
    pub runner: ScriptedRunner,
    pub driver: ScriptedDriver,
    pub factory: ScriptedDriverFactory,
    pub notifier: RecordingNotifier,
    pub settings: UploadSettings,
}

impl Pipeline {
    /// A pipeline whose import and conversion succeed immediately and whose
    /// converted volume exists.
    pub fn happy() -> Self {
        let runner = ScriptedRunner::new();
        runner.always_succeed("euca-import-volume", import_volume_output(TASK_ID));
        runner.always_succeed(
            "euca-describe-conversion-tasks",
            conversion_completed_output(TASK_ID, VOLUME_ID),
        );
        let driver = ScriptedDriver::new(REGION);
        driver.add_volume(VOLUME_ID);
        let mut settings = UploadSettings::new("fedimg", 7);
        settings.conversion_policy = PollPolicy::new(Duration::from_millis(1), Some(5));
        settings.snapshot_policy = PollPolicy::new(Duration::from_millis(1), Some(5));
        Self {
            runner,
            factory: ScriptedDriverFactory::new(driver.clone()),
            driver,
            notifier: RecordingNotifier::new(),
            settings,
        }
    }

    /// A pipeline with only the driver primed; command output is left to the test.
    pub fn unscripted() -> Self {
        let driver = ScriptedDriver::new(REGION);
        driver.add_volume(VOLUME_ID);
        let mut settings = UploadSettings::new("fedimg", 7);
        settings.conversion_policy = PollPolicy::new(Duration::from_millis(1), Some(3));
        settings.snapshot_policy = PollPolicy::new(Duration::from_millis(1), Some(3));
        Self {
            runner: ScriptedRunner::new(),
            factory: ScriptedDriverFactory::new(driver.clone()),
            driver,
            notifier: RecordingNotifier::new(),
            settings,
        }
    }

    pub fn orchestrator(&self) -> TestOrchestrator {
        UploadOrchestrator::new(
            self.factory.clone(),
            self.runner.clone(),
            ImportTools::new(
                "euca-import-volume",
                "euca-describe-conversion-tasks",
                Ec2Credentials::new("AKIDEXAMPLE", "secret"),
            ),
            self.notifier.clone(),
            self.settings.clone(),
        )
    }
}

pub fn job(virtualization_type: VirtualizationType, volume_type: VolumeType) -> UploadJob {
    UploadJob::new(
        IMAGE_URL,
        "/var/tmp/ami-publish-test",
        virtualization_type,
        volume_type,
        REGION,
    )
    .expect("job should build")
}

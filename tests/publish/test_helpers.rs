//! Shared fixtures for publish BDD scenarios.

use std::time::Duration;

use ami_publish::test_support::{
    RecordingNotifier, ScriptedDriver, ScriptedDriverFactory, ScriptedRunner,
    conversion_completed_output, import_volume_output,
};
use ami_publish::upload::PollPolicy;
use ami_publish::{
    BatchDispatcher, BatchReport, BatchSettings, Ec2Credentials, ImportTools,
    UploadOrchestrator, UploadSettings, VolumeType,
};
use rstest::fixture;

pub const TASK_ID: &str = "import-vol-ffx1e2a3";
pub const VOLUME_ID: &str = "vol-0123456789abcdef0";

pub type ScriptedDispatcher =
    BatchDispatcher<ScriptedDriverFactory, ScriptedRunner, RecordingNotifier>;

#[derive(Clone, Debug)]
pub struct PublishContext {
    pub runner: ScriptedRunner,
    pub driver: ScriptedDriver,
    pub notifier: RecordingNotifier,
    pub region: String,
    pub volume_types: Vec<VolumeType>,
    pub report: Option<BatchReport>,
}

impl PublishContext {
    /// Builds a dispatcher over the scripted collaborators.
    pub fn dispatcher(&self) -> ScriptedDispatcher {
        let mut settings = UploadSettings::new("fedimg", 7);
        settings.conversion_policy = PollPolicy::new(Duration::from_millis(1), Some(5));
        settings.snapshot_policy = PollPolicy::new(Duration::from_millis(1), Some(5));
        let orchestrator = UploadOrchestrator::new(
            ScriptedDriverFactory::new(self.driver.clone()),
            self.runner.clone(),
            ImportTools::new(
                "euca-import-volume",
                "euca-describe-conversion-tasks",
                Ec2Credentials::new("AKIDEXAMPLE", "secret"),
            ),
            self.notifier.clone(),
            settings,
        );
        BatchDispatcher::new(
            orchestrator,
            self.runner.clone(),
            BatchSettings {
                download_bin: String::from("wget"),
                region: self.region.clone(),
                volume_types: self.volume_types.clone(),
                workers: 2,
            },
        )
    }
}

#[fixture]
pub fn publish_context() -> PublishContext {
    let runner = ScriptedRunner::new();
    runner.always_succeed("wget", "");
    runner.always_succeed("euca-import-volume", import_volume_output(TASK_ID));
    runner.always_succeed(
        "euca-describe-conversion-tasks",
        conversion_completed_output(TASK_ID, VOLUME_ID),
    );
    PublishContext {
        runner,
        driver: ScriptedDriver::new("us-east-1"),
        notifier: RecordingNotifier::new(),
        region: String::from("us-east-1"),
        volume_types: VolumeType::ALL.to_vec(),
        report: None,
    }
}

/// Turns a pipe-separated list of build names into image URLs.
pub fn image_urls(builds: &str) -> Vec<String> {
    builds
        .split('|')
        .map(str::trim)
        .filter(|build| !build.is_empty())
        .map(|build| format!("https://kojipkgs.example.org/compose/{build}.raw.xz"))
        .collect()
}

//! Core library for the `ami-publish` image publishing tool.
//!
//! The crate turns raw disk images into EC2 machine images: each image URL is
//! expanded into upload jobs (one per virtualization and volume type), the
//! image is imported as a volume, snapshotted, shared, and registered, and
//! every job's outcome is reported. Provider access goes through the
//! [`CloudDriver`] abstraction, with an `aws` CLI implementation in [`ec2`].

pub mod batch;
pub mod command;
pub mod config;
pub mod driver;
pub mod ec2;
pub mod job;
pub mod notify;
pub mod test_support;
pub mod upload;

pub use batch::{BatchDispatcher, BatchError, BatchReport, BatchSettings, JobOutcome, JobReport};
pub use command::{
    CommandError, CommandLine, CommandOutput, CommandRunner, ProcessCommandRunner,
};
pub use config::{ConfigError, Ec2Config, PublishConfig};
pub use driver::{
    AvailabilityZone, CloudDriver, DriverErrorKind, DriverFactory, Image, ImageRegistration,
    Snapshot, SnapshotState, Volume,
};
pub use ec2::{Ec2Credentials, Ec2Driver, Ec2DriverError, Ec2DriverFactory};
pub use job::{Architecture, JobError, UploadJob, VirtualizationType, VolumeType};
pub use notify::{EventTopic, Notifier, TracingNotifier, UploadEvent};
pub use upload::{
    ImageHandle, ImportTools, UploadError, UploadFailure, UploadOrchestrator, UploadSettings,
    UploadStep,
};

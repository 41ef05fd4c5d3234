//! Per-run bookkeeping of live provider resources.

use std::fmt;

use crate::driver::{Image, Snapshot, Volume};

/// Pipeline steps, in execution order.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum UploadStep {
    /// Fetching the image into the working directory.
    Download,
    /// Resolving a driver for the target region.
    ResolveDriver,
    /// Selecting a zone and submitting the volume import.
    ImportVolume,
    /// Waiting for the conversion task to produce a volume.
    AwaitConversion,
    /// Looking up the converted volume.
    LocateVolume,
    /// Creating the snapshot and waiting for it to complete.
    Snapshot,
    /// Granting public create-volume permission on the snapshot.
    ShareSnapshot,
    /// Removing the staging volume.
    DestroyVolume,
    /// Registering the machine image.
    RegisterImage,
    /// Publishing the completion event.
    Notify,
}

impl UploadStep {
    /// Short human readable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::ResolveDriver => "resolve driver",
            Self::ImportVolume => "import volume",
            Self::AwaitConversion => "await conversion",
            Self::LocateVolume => "locate volume",
            Self::Snapshot => "snapshot volume",
            Self::ShareSnapshot => "make snapshot public",
            Self::DestroyVolume => "destroy volume",
            Self::RegisterImage => "register image",
            Self::Notify => "notify",
        }
    }
}

impl fmt::Display for UploadStep {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Live resources held by one job execution.
///
/// Holds at most one volume, snapshot, and image. Cleared references are
/// never cleaned up again.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UploadState {
    step: UploadStep,
    volume: Option<Volume>,
    snapshot: Option<Snapshot>,
    image: Option<Image>,
}

impl Default for UploadState {
    fn default() -> Self {
        Self::new()
    }
}

impl UploadState {
    /// Fresh state positioned at driver resolution.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            step: UploadStep::ResolveDriver,
            volume: None,
            snapshot: None,
            image: None,
        }
    }

    /// Step currently in progress.
    #[must_use]
    pub const fn step(&self) -> UploadStep {
        self.step
    }

    /// Moves to `step`.
    pub const fn advance(&mut self, step: UploadStep) {
        self.step = step;
    }

    /// Live staging volume, if any.
    #[must_use]
    pub const fn volume(&self) -> Option<&Volume> {
        self.volume.as_ref()
    }

    /// Live snapshot, if any.
    #[must_use]
    pub const fn snapshot(&self) -> Option<&Snapshot> {
        self.snapshot.as_ref()
    }

    /// Registered image, if any.
    #[must_use]
    pub const fn image(&self) -> Option<&Image> {
        self.image.as_ref()
    }

    /// Records the staging volume.
    pub fn record_volume(&mut self, volume: Volume) {
        self.volume = Some(volume);
    }

    /// Records the snapshot, replacing any earlier view of it.
    pub fn record_snapshot(&mut self, snapshot: Snapshot) {
        self.snapshot = Some(snapshot);
    }

    /// Records the registered image.
    pub fn record_image(&mut self, image: Image) {
        self.image = Some(image);
    }

    /// Forgets the volume after it has been destroyed.
    pub fn clear_volume(&mut self) {
        self.volume = None;
    }

    /// Forgets the snapshot after it has been destroyed.
    pub fn clear_snapshot(&mut self) {
        self.snapshot = None;
    }

    /// Forgets the image after it has been deregistered.
    pub fn clear_image(&mut self) {
        self.image = None;
    }
}

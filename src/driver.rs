//! Cloud driver abstraction used by the upload pipeline.
//!
//! A driver is bound to one region of one provider. The pipeline only talks
//! to the [`CloudDriver`] trait, so providers can be swapped without touching
//! the orchestration logic.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use crate::job::{Architecture, VirtualizationType, VolumeType};

/// Block storage volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    /// Provider identifier (for example `vol-0123456789abcdef0`).
    pub id: String,
    /// Provider state string.
    pub state: String,
    /// Availability zone holding the volume.
    pub availability_zone: String,
}

/// Snapshot lifecycle states the pipeline distinguishes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SnapshotState {
    /// Snapshot is still being taken.
    Pending,
    /// Snapshot is durable and usable.
    Completed,
    /// Provider reported a terminal failure.
    Error,
    /// Any other provider-specific state.
    Other(String),
}

impl SnapshotState {
    /// Maps a provider state string to a [`SnapshotState`].
    #[must_use]
    pub fn from_provider(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            "error" => Self::Error,
            other => Self::Other(other.to_owned()),
        }
    }

    /// Provider spelling of the state.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Other(other) => other,
        }
    }
}

impl fmt::Display for SnapshotState {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Point-in-time copy of a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Snapshot {
    /// Provider identifier (for example `snap-0123456789abcdef0`).
    pub id: String,
    /// Current lifecycle state.
    pub state: SnapshotState,
}

/// Registered machine image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Image {
    /// Provider identifier (for example `ami-0123456789abcdef0`).
    pub id: String,
    /// Image name, unique within a region.
    pub name: String,
}

/// Availability zone within a region.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AvailabilityZone {
    /// Zone name (for example `us-east-1a`).
    pub name: String,
    /// Provider state string (`available` when usable).
    pub state: String,
}

/// Snapshot attribute changes supported by the pipeline.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SnapshotAttribute {
    /// Adds a create-volume permission for the named group.
    AddCreateVolumePermission {
        /// Group granted the permission (`all` makes the snapshot public).
        group: String,
    },
}

impl SnapshotAttribute {
    /// Permission that lets every account create volumes from the snapshot.
    #[must_use]
    pub fn public() -> Self {
        Self::AddCreateVolumePermission {
            group: String::from("all"),
        }
    }
}

/// Binds a device name to a snapshot-backed volume in a new image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BlockDeviceMapping {
    /// Device name inside the guest (for example `/dev/sda1`).
    pub device_name: String,
    /// Snapshot the volume is created from.
    pub snapshot_id: String,
    /// Volume size in GiB.
    pub volume_size_gb: u32,
    /// Storage class of the volume.
    pub volume_type: VolumeType,
    /// Whether the volume is deleted when the instance terminates.
    pub delete_on_termination: bool,
}

/// Parameters for registering a machine image.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageRegistration {
    /// Requested image name.
    pub name: String,
    /// Human readable description.
    pub description: String,
    /// Root device the image boots from.
    pub root_device_name: String,
    /// Block devices attached to instances launched from the image.
    pub block_device_mappings: Vec<BlockDeviceMapping>,
    /// Boot mode of the image.
    pub virtualization_type: VirtualizationType,
    /// CPU architecture of the image.
    pub architecture: Architecture,
}

/// Classification hooks the pipeline needs from driver errors.
pub trait DriverErrorKind {
    /// Returns `true` when registration failed because an image with the same
    /// name already exists in the region.
    fn is_duplicate_name(&self) -> bool;
}

/// Future returned by driver operations.
pub type DriverFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Capability set of a provider client bound to one region.
pub trait CloudDriver: Send + Sync {
    /// Provider specific error type returned by the driver.
    type Error: std::error::Error + DriverErrorKind + Send + Sync + 'static;

    /// Region this driver operates in.
    fn region(&self) -> &str;

    /// Lists volumes visible to the account.
    fn list_volumes(&self) -> DriverFuture<'_, Vec<Volume>, Self::Error>;

    /// Starts a snapshot of `volume`.
    fn create_volume_snapshot<'a>(
        &'a self,
        volume: &'a Volume,
        name: &'a str,
    ) -> DriverFuture<'a, Snapshot, Self::Error>;

    /// Lists snapshots owned by the account.
    fn list_snapshots(&self) -> DriverFuture<'_, Vec<Snapshot>, Self::Error>;

    /// Applies an attribute change to a snapshot.
    fn modify_snapshot_attribute<'a>(
        &'a self,
        snapshot: &'a Snapshot,
        attribute: &'a SnapshotAttribute,
    ) -> DriverFuture<'a, (), Self::Error>;

    /// Deletes a volume.
    fn destroy_volume<'a>(&'a self, volume: &'a Volume) -> DriverFuture<'a, (), Self::Error>;

    /// Deletes a snapshot.
    fn destroy_volume_snapshot<'a>(
        &'a self,
        snapshot: &'a Snapshot,
    ) -> DriverFuture<'a, (), Self::Error>;

    /// Deregisters an image.
    fn delete_image<'a>(&'a self, image: &'a Image) -> DriverFuture<'a, (), Self::Error>;

    /// Lists availability zones, optionally only those currently available.
    fn list_availability_zones(
        &self,
        only_available: bool,
    ) -> DriverFuture<'_, Vec<AvailabilityZone>, Self::Error>;

    /// Registers a machine image.
    fn register_image<'a>(
        &'a self,
        request: &'a ImageRegistration,
    ) -> DriverFuture<'a, Image, Self::Error>;
}

/// Resolves a driver for a region using externally supplied credentials.
pub trait DriverFactory: Send + Sync {
    /// Driver produced by this factory.
    type Driver: CloudDriver;

    /// Builds a driver bound to `region`.
    ///
    /// # Errors
    ///
    /// Returns the driver's error type when the region cannot be served.
    fn driver_for_region(
        &self,
        region: &str,
    ) -> Result<Self::Driver, <Self::Driver as CloudDriver>::Error>;
}

/// Error type of the drivers produced by a factory.
pub type FactoryError<F> = <<F as DriverFactory>::Driver as CloudDriver>::Error;

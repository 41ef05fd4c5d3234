//! Wire types for `aws ec2 ... --output json` responses and request payloads.

use serde::{Deserialize, Serialize};

use crate::driver::{AvailabilityZone, BlockDeviceMapping, Snapshot, SnapshotState, Volume};

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeVolumesResponse {
    #[serde(default)]
    pub(super) volumes: Vec<Ec2Volume>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Ec2Volume {
    pub(super) volume_id: String,
    pub(super) state: String,
    #[serde(default)]
    pub(super) availability_zone: String,
}

impl From<Ec2Volume> for Volume {
    fn from(value: Ec2Volume) -> Self {
        Self {
            id: value.volume_id,
            state: value.state,
            availability_zone: value.availability_zone,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeSnapshotsResponse {
    #[serde(default)]
    pub(super) snapshots: Vec<Ec2Snapshot>,
}

/// Shape shared by `create-snapshot` and the `describe-snapshots` entries.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Ec2Snapshot {
    pub(super) snapshot_id: String,
    pub(super) state: String,
}

impl From<Ec2Snapshot> for Snapshot {
    fn from(value: Ec2Snapshot) -> Self {
        Self {
            id: value.snapshot_id,
            state: SnapshotState::from_provider(&value.state),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeAvailabilityZonesResponse {
    #[serde(default)]
    pub(super) availability_zones: Vec<Ec2AvailabilityZone>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Ec2AvailabilityZone {
    pub(super) zone_name: String,
    pub(super) state: String,
}

impl From<Ec2AvailabilityZone> for AvailabilityZone {
    fn from(value: Ec2AvailabilityZone) -> Self {
        Self {
            name: value.zone_name,
            state: value.state,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct RegisterImageResponse {
    pub(super) image_id: String,
}

#[derive(Clone, Debug, Serialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Ec2BlockDeviceMapping<'a> {
    pub(super) device_name: &'a str,
    pub(super) ebs: Ec2EbsBlockDevice<'a>,
}

#[derive(Clone, Debug, Serialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct Ec2EbsBlockDevice<'a> {
    pub(super) snapshot_id: &'a str,
    pub(super) volume_size: u32,
    pub(super) volume_type: &'static str,
    pub(super) delete_on_termination: bool,
}

impl<'a> From<&'a BlockDeviceMapping> for Ec2BlockDeviceMapping<'a> {
    fn from(value: &'a BlockDeviceMapping) -> Self {
        Self {
            device_name: &value.device_name,
            ebs: Ec2EbsBlockDevice {
                snapshot_id: &value.snapshot_id,
                volume_size: value.volume_size_gb,
                volume_type: value.volume_type.as_str(),
                delete_on_termination: value.delete_on_termination,
            },
        }
    }
}

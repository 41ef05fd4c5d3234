//! Names given to provider resources.

use crate::job::UploadJob;

/// Prefix of snapshot names.
pub const SNAPSHOT_NAME_PREFIX: &str = "fedimg-snap-";

/// First candidate image name: `{build}-{region}-{PV|HVM}-{volume type}-0`.
#[must_use]
pub fn image_name(job: &UploadJob) -> String {
    format!(
        "{}-{}-{}-{}-0",
        job.build_name(),
        job.region(),
        job.virtualization_type().name_tag(),
        job.volume_type()
    )
}

/// Snapshot name for a build.
#[must_use]
pub fn snapshot_name(build_name: &str) -> String {
    format!("{SNAPSHOT_NAME_PREFIX}{build_name}")
}

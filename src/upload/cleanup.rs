//! Removal of resources left behind by a failed job.

use crate::driver::CloudDriver;

use super::error::UploadError;
use super::state::UploadState;

/// Deregisters the image (when `delete_images` is set) and destroys the
/// snapshot held by `state`, clearing each reference once removed.
///
/// The snapshot is only destroyed when an image was registered from it; a
/// job that failed earlier keeps its completed snapshot. Both removals are
/// attempted even when the first fails. Running again after success does
/// nothing. The staging volume is not touched here.
///
/// # Errors
///
/// Returns the first [`UploadError::CleanupFailed`] encountered.
pub async fn cleanup<D: CloudDriver>(
    driver: &D,
    state: &mut UploadState,
    delete_images: bool,
) -> Result<(), UploadError<D::Error>> {
    let mut first_error = None;
    let image_registered = state.image().is_some();

    if delete_images && let Some(image) = state.image().cloned() {
        tracing::info!(image_id = %image.id, region = driver.region(), "deregistering image");
        match driver.delete_image(&image).await {
            Ok(()) => state.clear_image(),
            Err(source) => {
                tracing::warn!(image_id = %image.id, error = %source, "failed to deregister image");
                first_error = Some(UploadError::CleanupFailed {
                    resource: format!("image {}", image.id),
                    source,
                });
            }
        }
    }

    if image_registered && let Some(snapshot) = state.snapshot().cloned() {
        tracing::info!(snapshot_id = %snapshot.id, region = driver.region(), "destroying snapshot");
        match driver.destroy_volume_snapshot(&snapshot).await {
            Ok(()) => state.clear_snapshot(),
            Err(source) => {
                tracing::warn!(snapshot_id = %snapshot.id, error = %source, "failed to destroy snapshot");
                first_error.get_or_insert(UploadError::CleanupFailed {
                    resource: format!("snapshot {}", snapshot.id),
                    source,
                });
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Image, Snapshot, SnapshotState};
    use crate::test_support::{DriverCall, DriverOperation, ScriptedDriver};
    use rstest::{fixture, rstest};

    #[fixture]
    fn state() -> UploadState {
        let mut state = UploadState::new();
        state.record_snapshot(Snapshot {
            id: String::from("snap-1"),
            state: SnapshotState::Completed,
        });
        state.record_image(Image {
            id: String::from("ami-1"),
            name: String::from("build-us-east-1-HVM-gp2-0"),
        });
        state
    }

    #[rstest]
    #[tokio::test]
    async fn removes_image_and_snapshot_then_is_idempotent(mut state: UploadState) {
        let driver = ScriptedDriver::new("us-east-1");

        cleanup(&driver, &mut state, true).await.expect("first cleanup");
        cleanup(&driver, &mut state, true).await.expect("second cleanup");

        assert_eq!(
            driver.calls(),
            vec![
                DriverCall::DeleteImage {
                    image_id: String::from("ami-1")
                },
                DriverCall::DestroySnapshot {
                    snapshot_id: String::from("snap-1")
                },
            ]
        );
        assert!(state.image().is_none());
        assert!(state.snapshot().is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn keeps_image_when_image_deletion_disabled(mut state: UploadState) {
        let driver = ScriptedDriver::new("us-east-1");

        cleanup(&driver, &mut state, false).await.expect("cleanup");

        assert_eq!(
            driver.calls(),
            vec![DriverCall::DestroySnapshot {
                snapshot_id: String::from("snap-1")
            }]
        );
        assert!(state.image().is_some());
    }

    #[rstest]
    #[tokio::test]
    async fn snapshot_is_destroyed_even_if_image_deletion_fails(mut state: UploadState) {
        let driver = ScriptedDriver::new("us-east-1");
        driver.fail_on(DriverOperation::DeleteImage, "in use");

        let err = cleanup(&driver, &mut state, true)
            .await
            .expect_err("image deletion failure");

        assert!(matches!(
            err,
            UploadError::CleanupFailed { ref resource, .. } if resource == "image ami-1"
        ));
        assert!(state.image().is_some());
        assert!(state.snapshot().is_none());
    }

    #[rstest]
    #[tokio::test]
    async fn snapshot_without_image_is_kept() {
        let driver = ScriptedDriver::new("us-east-1");
        let mut state = UploadState::new();
        state.record_snapshot(Snapshot {
            id: String::from("snap-1"),
            state: SnapshotState::Completed,
        });

        cleanup(&driver, &mut state, true).await.expect("cleanup");
        cleanup(&driver, &mut state, true).await.expect("second cleanup");

        assert!(driver.calls().is_empty());
        assert!(state.snapshot().is_some());
    }

    #[rstest]
    #[tokio::test]
    async fn empty_state_is_a_no_op() {
        let driver = ScriptedDriver::new("us-east-1");
        let mut state = UploadState::new();

        cleanup(&driver, &mut state, true).await.expect("cleanup");

        assert!(driver.calls().is_empty());
    }
}

//! Waiting for snapshots to complete.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::driver::{CloudDriver, Snapshot, SnapshotState};

use super::error::UploadError;
use super::poll::{Poll, PollPolicy, poll_until};

/// Delay between snapshot state checks.
pub const SNAPSHOT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Re-fetches a snapshot until the provider reports it completed.
#[derive(Debug)]
pub struct SnapshotWaiter<'a, D: CloudDriver> {
    driver: &'a D,
    policy: PollPolicy,
    cancel: &'a CancellationToken,
}

impl<'a, D: CloudDriver> SnapshotWaiter<'a, D> {
    /// Creates a waiter.
    #[must_use]
    pub const fn new(driver: &'a D, policy: PollPolicy, cancel: &'a CancellationToken) -> Self {
        Self {
            driver,
            policy,
            cancel,
        }
    }

    /// Blocks until `snapshot` is completed, refreshing it in place.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::SnapshotFailed`] when the provider reports the
    /// `error` state, [`UploadError::SnapshotNotFound`] when the snapshot is
    /// no longer listed, [`UploadError::Provider`] when listing fails, and
    /// [`UploadError::Timeout`] or [`UploadError::Cancelled`] when the wait is
    /// cut short.
    pub async fn wait(&self, snapshot: &mut Snapshot) -> Result<(), UploadError<D::Error>> {
        let completed = poll_until(self.policy, self.cancel, snapshot.clone(), |current| {
            self.check(current)
        })
        .await
        .map_err(|err| UploadError::from_poll(err, "snapshot completion"))?;
        *snapshot = completed;
        Ok(())
    }

    async fn check(
        &self,
        current: Snapshot,
    ) -> Result<Poll<Snapshot, Snapshot>, UploadError<D::Error>> {
        match current.state {
            SnapshotState::Completed => return Ok(Poll::Ready(current)),
            SnapshotState::Error => {
                return Err(UploadError::SnapshotFailed {
                    snapshot_id: current.id,
                });
            }
            SnapshotState::Pending | SnapshotState::Other(_) => {}
        }

        tracing::debug!(snapshot_id = %current.id, state = %current.state, "snapshot not complete yet");
        let listed = self
            .driver
            .list_snapshots()
            .await
            .map_err(|source| UploadError::Provider {
                operation: "list snapshots",
                source,
            })?;
        listed
            .into_iter()
            .find(|candidate| candidate.id == current.id)
            .map(Poll::Pending)
            .ok_or(UploadError::SnapshotNotFound {
                snapshot_id: current.id,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::Volume;
    use crate::test_support::{DriverCall, DriverOperation, ScriptedDriver};
    use rstest::{fixture, rstest};

    const FAST: PollPolicy = PollPolicy::new(Duration::from_millis(1), Some(10));

    #[fixture]
    fn driver() -> ScriptedDriver {
        ScriptedDriver::new("us-east-1")
    }

    async fn pending_snapshot(driver: &ScriptedDriver) -> Snapshot {
        let volume = Volume {
            id: String::from("vol-0123456789abcdef0"),
            state: String::from("available"),
            availability_zone: String::from("us-east-1a"),
        };
        driver
            .create_volume_snapshot(&volume, "fedimg-snap-build")
            .await
            .expect("snapshot")
    }

    fn listings(driver: &ScriptedDriver) -> usize {
        driver
            .calls()
            .iter()
            .filter(|call| matches!(call, DriverCall::ListSnapshots))
            .count()
    }

    #[rstest]
    #[tokio::test]
    async fn refreshes_until_completed(driver: ScriptedDriver) {
        driver.queue_snapshot_states([SnapshotState::Pending, SnapshotState::Pending]);
        let mut snapshot = pending_snapshot(&driver).await;
        let cancel = CancellationToken::new();

        SnapshotWaiter::new(&driver, FAST, &cancel)
            .wait(&mut snapshot)
            .await
            .expect("completed");

        assert_eq!(snapshot.state, SnapshotState::Completed);
        assert_eq!(listings(&driver), 3);
    }

    #[rstest]
    #[tokio::test]
    async fn completed_snapshot_needs_no_listing(driver: ScriptedDriver) {
        let mut snapshot = Snapshot {
            id: String::from("snap-1"),
            state: SnapshotState::Completed,
        };
        let cancel = CancellationToken::new();

        SnapshotWaiter::new(&driver, FAST, &cancel)
            .wait(&mut snapshot)
            .await
            .expect("completed");

        assert_eq!(listings(&driver), 0);
    }

    #[rstest]
    #[tokio::test]
    async fn error_state_is_fatal(driver: ScriptedDriver) {
        driver.queue_snapshot_states([SnapshotState::Error]);
        let mut snapshot = pending_snapshot(&driver).await;
        let cancel = CancellationToken::new();

        let err = SnapshotWaiter::new(&driver, FAST, &cancel)
            .wait(&mut snapshot)
            .await
            .expect_err("error state");

        assert!(matches!(err, UploadError::SnapshotFailed { .. }));
    }

    #[rstest]
    #[tokio::test]
    async fn missing_snapshot_is_reported(driver: ScriptedDriver) {
        let mut snapshot = Snapshot {
            id: String::from("snap-unknown"),
            state: SnapshotState::Pending,
        };
        let cancel = CancellationToken::new();

        let err = SnapshotWaiter::new(&driver, FAST, &cancel)
            .wait(&mut snapshot)
            .await
            .expect_err("missing");

        assert!(matches!(
            err,
            UploadError::SnapshotNotFound { ref snapshot_id } if snapshot_id == "snap-unknown"
        ));
    }

    #[rstest]
    #[tokio::test]
    async fn listing_failure_is_a_provider_error(driver: ScriptedDriver) {
        let mut snapshot = pending_snapshot(&driver).await;
        driver.fail_on(DriverOperation::ListSnapshots, "throttled");
        let cancel = CancellationToken::new();

        let err = SnapshotWaiter::new(&driver, FAST, &cancel)
            .wait(&mut snapshot)
            .await
            .expect_err("listing failure");

        assert!(matches!(
            err,
            UploadError::Provider {
                operation: "list snapshots",
                ..
            }
        ));
    }
}

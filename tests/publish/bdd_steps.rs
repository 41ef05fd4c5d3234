//! BDD step definitions for the `ami-publish upload` workflow.

use ami_publish::test_support::{DriverCall, DriverOperation, ScriptedDriver};
use ami_publish::{JobOutcome, VolumeType};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{PublishContext, VOLUME_ID, image_urls};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn report(publish_context: &PublishContext) -> Result<&ami_publish::BatchReport, StepError> {
    publish_context
        .report
        .as_ref()
        .ok_or_else(|| StepError::Assertion(String::from("missing batch report")))
}

fn count_calls(publish_context: &PublishContext, matches: fn(&DriverCall) -> bool) -> usize {
    publish_context
        .driver
        .calls()
        .iter()
        .filter(|call| matches(call))
        .count()
}

#[given("a scripted EC2 region \"{region}\"")]
fn scripted_region(mut publish_context: PublishContext, region: String) -> PublishContext {
    let driver = ScriptedDriver::new(region.trim());
    driver.add_volume(VOLUME_ID);
    publish_context.driver = driver;
    publish_context.region = region.trim().to_owned();
    publish_context
}

#[given("volume types \"{types}\"")]
fn volume_types(
    mut publish_context: PublishContext,
    types: String,
) -> Result<PublishContext, StepError> {
    publish_context.volume_types = types
        .split('|')
        .map(|entry| {
            entry
                .parse::<VolumeType>()
                .map_err(|err| StepError::Assertion(err.to_string()))
        })
        .collect::<Result<_, _>>()?;
    Ok(publish_context)
}

#[given("registration fails for names containing \"{fragment}\"")]
fn registration_fails(publish_context: PublishContext, fragment: String) -> PublishContext {
    publish_context.driver.fail_register_containing(&fragment);
    publish_context
}

#[given("sharing snapshots fails")]
fn sharing_fails(publish_context: PublishContext) -> PublishContext {
    publish_context
        .driver
        .fail_on(DriverOperation::ModifySnapshotAttribute, "UnauthorizedOperation");
    publish_context
}

#[when("I publish the images \"{builds}\"")]
fn publish_images(
    mut publish_context: PublishContext,
    builds: String,
) -> Result<PublishContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let dispatcher = publish_context.dispatcher();
    let urls = image_urls(&builds);
    let outcome = runtime
        .block_on(async { dispatcher.dispatch(&urls).await })
        .map_err(|err| StepError::Assertion(err.to_string()))?;
    publish_context.report = Some(outcome);
    Ok(publish_context)
}

#[then("\"{count}\" jobs are reported")]
fn jobs_reported(publish_context: &PublishContext, count: usize) -> Result<(), StepError> {
    let actual = report(publish_context)?.jobs().len();
    if actual == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} job reports, got {actual}"
        )))
    }
}

#[then("\"{count}\" jobs are published")]
fn jobs_published(publish_context: &PublishContext, count: usize) -> Result<(), StepError> {
    let actual = report(publish_context)?.succeeded();
    if actual == count {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {count} published jobs, got {actual}"
        )))
    }
}

#[then("every failed job stopped at step \"{step}\"")]
fn failed_step(publish_context: &PublishContext, step: String) -> Result<(), StepError> {
    let batch = report(publish_context)?;
    let mut failures = 0_usize;
    for job_report in batch.jobs() {
        if let JobOutcome::Failed {
            step: actual,
            message,
        } = &job_report.outcome
        {
            failures += 1;
            if actual.as_str() != step {
                return Err(StepError::Assertion(format!(
                    "expected failure at {step}, got {actual}: {message}"
                )));
            }
        }
    }
    if failures == 0 {
        return Err(StepError::Assertion(String::from("no job failed")));
    }
    Ok(())
}

#[then("every published image uses \"{virtualization}\"")]
fn published_virtualization(
    publish_context: &PublishContext,
    virtualization: String,
) -> Result<(), StepError> {
    let batch = report(publish_context)?;
    for job_report in batch.jobs() {
        let JobOutcome::Published(handle) = &job_report.outcome else {
            return Err(StepError::Assertion(format!(
                "job for {} did not publish",
                job_report.job.url()
            )));
        };
        if handle.virtualization_type.as_str() != virtualization {
            return Err(StepError::Assertion(format!(
                "expected {virtualization}, got {}",
                handle.virtualization_type
            )));
        }
    }
    Ok(())
}

#[then("every snapshot created is kept")]
fn snapshots_kept(publish_context: &PublishContext) -> Result<(), StepError> {
    let created = count_calls(publish_context, |call| {
        matches!(call, DriverCall::CreateSnapshot { .. })
    });
    let destroyed = count_calls(publish_context, |call| {
        matches!(call, DriverCall::DestroySnapshot { .. })
    });
    if created > 0 && destroyed == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "created {created} snapshots and destroyed {destroyed}"
        )))
    }
}

#[then("no staging volume is destroyed")]
fn volumes_kept(publish_context: &PublishContext) -> Result<(), StepError> {
    let destroyed = count_calls(publish_context, |call| {
        matches!(call, DriverCall::DestroyVolume { .. })
    });
    if destroyed == 0 {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected no volume destruction, saw {destroyed}"
        )))
    }
}

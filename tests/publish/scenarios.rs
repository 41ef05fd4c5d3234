//! BDD scenarios for the publish workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{PublishContext, publish_context};

#[scenario(
    path = "tests/features/publish.feature",
    name = "Every variant of every image is published"
)]
fn scenario_publish_every_variant(publish_context: PublishContext) {
    let _ = publish_context;
}

#[scenario(
    path = "tests/features/publish.feature",
    name = "A failing registration does not stop sibling jobs"
)]
fn scenario_isolate_failing_job(publish_context: PublishContext) {
    let _ = publish_context;
}

#[scenario(
    path = "tests/features/publish.feature",
    name = "Atomic images are published as HVM only"
)]
fn scenario_atomic_images_hvm_only(publish_context: PublishContext) {
    let _ = publish_context;
}

#[scenario(
    path = "tests/features/publish.feature",
    name = "A sharing failure keeps the snapshot and the staging volume"
)]
fn scenario_sharing_failure_keeps_resources(publish_context: PublishContext) {
    let _ = publish_context;
}

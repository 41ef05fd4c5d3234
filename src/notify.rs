//! Progress events emitted while publishing images.

use serde::Serialize;
use serde_json::Value;

use crate::job::{UploadJob, VirtualizationType, VolumeType};

/// Topic an [`UploadEvent`] is published under.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
pub enum EventTopic {
    /// Upload of an image has started.
    #[serde(rename = "image.upload")]
    ImageUpload,
    /// A machine image has been registered.
    #[serde(rename = "image.create")]
    ImageCreate,
}

impl EventTopic {
    /// Dotted topic name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ImageUpload => "image.upload",
            Self::ImageCreate => "image.create",
        }
    }
}

/// Details attached to `image.create` events.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct ImageCreatedExtra {
    /// Registered image id.
    pub id: String,
    /// Virtualization type of the image.
    pub virt_type: VirtualizationType,
    /// Volume type of the image.
    pub vol_type: VolumeType,
    /// Region the image lives in.
    pub region: String,
}

/// A progress event for one upload job.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UploadEvent {
    /// Event topic.
    pub topic: EventTopic,
    /// Source image URL.
    pub image_url: String,
    /// Provider and region label, for example `EC2 (us-east-1)`.
    pub destination: String,
    /// Status word (`started`, `created`).
    pub status: String,
    /// Compose metadata forwarded from the caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compose: Option<Value>,
    /// Topic specific details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<ImageCreatedExtra>,
}

impl UploadEvent {
    /// `image.upload` / `started` event for `job`.
    #[must_use]
    pub fn upload_started(job: &UploadJob, compose: Option<&Value>) -> Self {
        Self {
            topic: EventTopic::ImageUpload,
            image_url: job.url().to_owned(),
            destination: job.destination(),
            status: String::from("started"),
            compose: compose.cloned(),
            extra: None,
        }
    }

    /// `image.create` / `created` event for `job` and the registered image.
    #[must_use]
    pub fn image_created(job: &UploadJob, image_id: &str, compose: Option<&Value>) -> Self {
        Self {
            topic: EventTopic::ImageCreate,
            image_url: job.url().to_owned(),
            destination: job.destination(),
            status: String::from("created"),
            compose: compose.cloned(),
            extra: Some(ImageCreatedExtra {
                id: image_id.to_owned(),
                virt_type: job.virtualization_type(),
                vol_type: job.volume_type(),
                region: job.region().to_owned(),
            }),
        }
    }
}

/// Sink for progress events.
pub trait Notifier: Send + Sync {
    /// Publishes `event`. Delivery failures are the notifier's concern and
    /// never fail the upload.
    fn publish(&self, event: &UploadEvent);
}

/// Notifier that writes events to the `tracing` log as JSON.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn publish(&self, event: &UploadEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => tracing::info!(
                topic = event.topic.as_str(),
                status = %event.status,
                payload = %payload,
                "upload event"
            ),
            Err(err) => tracing::warn!(
                topic = event.topic.as_str(),
                error = %err,
                "failed to serialise upload event"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn job() -> UploadJob {
        UploadJob::new(
            "https://example.org/Fedora-Cloud-Base-27.x86_64.raw.xz",
            "/tmp",
            VirtualizationType::Paravirtual,
            VolumeType::Gp2,
            "us-west-2",
        )
        .expect("job")
    }

    #[rstest]
    fn started_event_carries_compose_metadata() {
        let compose = json!({"id": "Fedora-27-20171105.0"});
        let event = UploadEvent::upload_started(&job(), Some(&compose));

        assert_eq!(
            serde_json::to_value(&event).expect("json"),
            json!({
                "topic": "image.upload",
                "image_url": "https://example.org/Fedora-Cloud-Base-27.x86_64.raw.xz",
                "destination": "EC2 (us-west-2)",
                "status": "started",
                "compose": {"id": "Fedora-27-20171105.0"}
            })
        );
    }

    #[rstest]
    fn created_event_describes_image() {
        let event = UploadEvent::image_created(&job(), "ami-1", None);

        assert_eq!(
            serde_json::to_value(&event).expect("json"),
            json!({
                "topic": "image.create",
                "image_url": "https://example.org/Fedora-Cloud-Base-27.x86_64.raw.xz",
                "destination": "EC2 (us-west-2)",
                "status": "created",
                "extra": {
                    "id": "ami-1",
                    "virt_type": "paravirtual",
                    "vol_type": "gp2",
                    "region": "us-west-2"
                }
            })
        );
    }
}

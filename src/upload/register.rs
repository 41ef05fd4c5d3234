//! Image registration with name-collision recovery.

use crate::driver::{
    BlockDeviceMapping, CloudDriver, DriverErrorKind, Image, ImageRegistration, Snapshot,
};
use crate::job::UploadJob;

use super::error::UploadError;
use super::naming::image_name;

/// Builds the registration request for `job` backed by `snapshot`.
#[must_use]
pub fn registration_for(
    job: &UploadJob,
    snapshot: &Snapshot,
    volume_size_gb: u32,
) -> ImageRegistration {
    let virtualization_type = job.virtualization_type();
    let root_device_name = virtualization_type.root_device_name().to_owned();
    ImageRegistration {
        name: image_name(job),
        description: job.description(),
        block_device_mappings: vec![BlockDeviceMapping {
            device_name: root_device_name.clone(),
            snapshot_id: snapshot.id.clone(),
            volume_size_gb,
            volume_type: job.volume_type(),
            delete_on_termination: true,
        }],
        root_device_name,
        virtualization_type,
        architecture: job.architecture(),
    }
}

/// Produces the next candidate name by incrementing the last run of digits.
///
/// `foo-9` becomes `foo-10` and `foo-19` becomes `foo-20`; earlier digit runs
/// are untouched. Leading zeros of the run are dropped (`foo-007` becomes
/// `foo-8`). A name without digits gains a `-1` suffix.
#[must_use]
pub fn next_candidate_name(name: &str) -> String {
    let chars = name.chars().collect::<Vec<_>>();
    let Some(run_end) = chars.iter().rposition(char::is_ascii_digit) else {
        return format!("{name}-1");
    };
    let run_start = chars
        .iter()
        .take(run_end)
        .rposition(|ch| !ch.is_ascii_digit())
        .map_or(0, |index| index + 1);

    let prefix = chars.iter().take(run_start).collect::<String>();
    let digits = chars
        .iter()
        .skip(run_start)
        .take(run_end + 1 - run_start)
        .copied()
        .collect::<Vec<_>>();
    let suffix = chars.iter().skip(run_end + 1).collect::<String>();
    format!("{prefix}{}{suffix}", increment_decimal(digits))
}

fn increment_decimal(mut digits: Vec<char>) -> String {
    let mut carry = true;
    for digit in digits.iter_mut().rev() {
        if !carry {
            break;
        }
        match digit.to_digit(10) {
            Some(9) => *digit = '0',
            Some(value) => {
                *digit = char::from_digit(value + 1, 10).unwrap_or('0');
                carry = false;
            }
            None => carry = false,
        }
    }
    let mut incremented = if carry {
        String::from("1")
    } else {
        String::new()
    };
    incremented.extend(digits);
    let trimmed = incremented.trim_start_matches('0');
    if trimmed.is_empty() {
        String::from("0")
    } else {
        trimmed.to_owned()
    }
}

/// Registers images, renaming on duplicate-name rejections.
#[derive(Debug)]
pub struct ImageRegistrar<'a, D: CloudDriver> {
    driver: &'a D,
    max_attempts: Option<u32>,
}

impl<'a, D: CloudDriver> ImageRegistrar<'a, D> {
    /// Creates a registrar; `max_attempts` of `None` retries indefinitely.
    #[must_use]
    pub const fn new(driver: &'a D, max_attempts: Option<u32>) -> Self {
        Self {
            driver,
            max_attempts,
        }
    }

    /// Registers `request`, mutating its name until the provider accepts it.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Provider`] for any non-duplicate failure and
    /// [`UploadError::DuplicateNameExhausted`] when the attempt cap is hit.
    pub async fn register(
        &self,
        mut request: ImageRegistration,
    ) -> Result<Image, UploadError<D::Error>> {
        let mut attempts: u32 = 0;
        loop {
            attempts = attempts.saturating_add(1);
            match self.driver.register_image(&request).await {
                Ok(image) => {
                    tracing::info!(
                        image_id = %image.id,
                        image_name = %image.name,
                        region = self.driver.region(),
                        "registered image"
                    );
                    return Ok(image);
                }
                Err(err) if err.is_duplicate_name() => {
                    if self.max_attempts.is_some_and(|max| attempts >= max) {
                        return Err(UploadError::DuplicateNameExhausted {
                            name: request.name,
                            attempts,
                        });
                    }
                    let candidate = next_candidate_name(&request.name);
                    tracing::debug!(
                        taken = %request.name,
                        candidate = %candidate,
                        "image name already in use; retrying"
                    );
                    request.name = candidate;
                }
                Err(source) => {
                    return Err(UploadError::Provider {
                        operation: "register image",
                        source,
                    });
                }
            }
        }
    }
}

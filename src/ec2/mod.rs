//! Amazon EC2 driver backed by the `aws` command-line tool.
//!
//! Each operation runs `aws ec2 <operation> ... --region <region> --output json`
//! through a [`CommandRunner`] and parses the JSON response with serde.
//! Credentials travel in the child environment only.

use std::fmt;

use serde::de::DeserializeOwned;

use crate::command::{CommandLine, CommandRunner};
use crate::driver::{
    AvailabilityZone, CloudDriver, DriverFactory, DriverFuture, Image, ImageRegistration,
    Snapshot, SnapshotAttribute, Volume,
};

mod error;
mod types;

pub use error::{DUPLICATE_IMAGE_NAME_CODE, Ec2DriverError};

use types::{
    DescribeAvailabilityZonesResponse, DescribeSnapshotsResponse, DescribeVolumesResponse,
    Ec2BlockDeviceMapping, Ec2Snapshot, RegisterImageResponse,
};

/// Default `aws` CLI binary name.
pub const DEFAULT_AWS_BIN: &str = "aws";

/// Environment variable carrying the access key id.
pub const ACCESS_KEY_ENV: &str = "AWS_ACCESS_KEY_ID";

/// Environment variable carrying the secret access key.
pub const SECRET_KEY_ENV: &str = "AWS_SECRET_ACCESS_KEY";

/// Access key pair passed to every EC2 tool invocation.
#[derive(Clone, Eq, PartialEq)]
pub struct Ec2Credentials {
    access_id: String,
    secret_key: String,
}

impl Ec2Credentials {
    /// Builds a credential pair.
    #[must_use]
    pub fn new(access_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_id: access_id.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Access key id.
    #[must_use]
    pub fn access_id(&self) -> &str {
        &self.access_id
    }

    /// Adds the credentials to the command's environment.
    #[must_use]
    pub fn apply(&self, command: CommandLine) -> CommandLine {
        command
            .env(ACCESS_KEY_ENV, &self.access_id)
            .env(SECRET_KEY_ENV, &self.secret_key)
    }
}

impl fmt::Debug for Ec2Credentials {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Ec2Credentials")
            .field("access_id", &self.access_id)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// [`CloudDriver`] bound to one EC2 region.
#[derive(Clone, Debug)]
pub struct Ec2Driver<R: CommandRunner> {
    runner: R,
    aws_bin: String,
    region: String,
    credentials: Ec2Credentials,
}

impl<R: CommandRunner> Ec2Driver<R> {
    /// Creates a driver for `region`.
    ///
    /// # Errors
    ///
    /// Returns [`Ec2DriverError::Config`] when the region or binary is blank.
    pub fn new(
        runner: R,
        aws_bin: impl Into<String>,
        region: impl Into<String>,
        credentials: Ec2Credentials,
    ) -> Result<Self, Ec2DriverError> {
        let trimmed_bin = aws_bin.into().trim().to_owned();
        let trimmed_region = region.into().trim().to_owned();
        if trimmed_bin.is_empty() {
            return Err(Ec2DriverError::Config {
                field: String::from("aws_bin"),
            });
        }
        if trimmed_region.is_empty() {
            return Err(Ec2DriverError::Config {
                field: String::from("region"),
            });
        }
        Ok(Self {
            runner,
            aws_bin: trimmed_bin,
            region: trimmed_region,
            credentials,
        })
    }

    /// Builds the full command line for an `aws ec2` operation.
    #[must_use]
    pub fn command<I, S>(&self, operation: &str, args: I) -> CommandLine
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = CommandLine::new(self.aws_bin.as_str())
            .args(["ec2", operation])
            .args(args)
            .args(["--region", self.region.as_str(), "--output", "json"]);
        self.credentials.apply(command)
    }

    async fn run_aws(&self, command: &CommandLine) -> Result<String, Ec2DriverError> {
        tracing::debug!(region = %self.region, command = %command, "calling EC2");
        let output = self.runner.run(command).await?;
        output
            .into_success(&self.aws_bin)
            .map(|success| success.stdout)
            .map_err(Ec2DriverError::from_failure)
    }

    async fn run_json<T>(&self, operation: &str, command: &CommandLine) -> Result<T, Ec2DriverError>
    where
        T: DeserializeOwned,
    {
        let stdout = self.run_aws(command).await?;
        serde_json::from_str::<T>(&stdout).map_err(|err| Ec2DriverError::Parse {
            operation: operation.to_owned(),
            message: err.to_string(),
        })
    }
}

impl<R: CommandRunner> CloudDriver for Ec2Driver<R> {
    type Error = Ec2DriverError;

    fn region(&self) -> &str {
        &self.region
    }

    fn list_volumes(&self) -> DriverFuture<'_, Vec<Volume>, Self::Error> {
        Box::pin(async move {
            let command = self.command("describe-volumes", Vec::<String>::new());
            let response: DescribeVolumesResponse =
                self.run_json("describe-volumes", &command).await?;
            Ok(response.volumes.into_iter().map(Volume::from).collect())
        })
    }

    fn create_volume_snapshot<'a>(
        &'a self,
        volume: &'a Volume,
        name: &'a str,
    ) -> DriverFuture<'a, Snapshot, Self::Error> {
        Box::pin(async move {
            let tags = format!("ResourceType=snapshot,Tags=[{{Key=Name,Value={name}}}]");
            let command = self.command(
                "create-snapshot",
                [
                    "--volume-id",
                    volume.id.as_str(),
                    "--description",
                    name,
                    "--tag-specifications",
                    tags.as_str(),
                ],
            );
            let snapshot: Ec2Snapshot = self.run_json("create-snapshot", &command).await?;
            Ok(Snapshot::from(snapshot))
        })
    }

    fn list_snapshots(&self) -> DriverFuture<'_, Vec<Snapshot>, Self::Error> {
        Box::pin(async move {
            let command = self.command("describe-snapshots", ["--owner-ids", "self"]);
            let response: DescribeSnapshotsResponse =
                self.run_json("describe-snapshots", &command).await?;
            Ok(response.snapshots.into_iter().map(Snapshot::from).collect())
        })
    }

    fn modify_snapshot_attribute<'a>(
        &'a self,
        snapshot: &'a Snapshot,
        attribute: &'a SnapshotAttribute,
    ) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let SnapshotAttribute::AddCreateVolumePermission { group } = attribute;
            let command = self.command(
                "modify-snapshot-attribute",
                [
                    "--snapshot-id",
                    snapshot.id.as_str(),
                    "--attribute",
                    "createVolumePermission",
                    "--operation-type",
                    "add",
                    "--group-names",
                    group.as_str(),
                ],
            );
            self.run_aws(&command).await.map(|_| ())
        })
    }

    fn destroy_volume<'a>(&'a self, volume: &'a Volume) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let command = self.command("delete-volume", ["--volume-id", volume.id.as_str()]);
            self.run_aws(&command).await.map(|_| ())
        })
    }

    fn destroy_volume_snapshot<'a>(
        &'a self,
        snapshot: &'a Snapshot,
    ) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let command = self.command("delete-snapshot", ["--snapshot-id", snapshot.id.as_str()]);
            self.run_aws(&command).await.map(|_| ())
        })
    }

    fn delete_image<'a>(&'a self, image: &'a Image) -> DriverFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let command = self.command("deregister-image", ["--image-id", image.id.as_str()]);
            self.run_aws(&command).await.map(|_| ())
        })
    }

    fn list_availability_zones(
        &self,
        only_available: bool,
    ) -> DriverFuture<'_, Vec<AvailabilityZone>, Self::Error> {
        Box::pin(async move {
            let filters = if only_available {
                vec!["--filters", "Name=state,Values=available"]
            } else {
                Vec::new()
            };
            let command = self.command("describe-availability-zones", filters);
            let response: DescribeAvailabilityZonesResponse =
                self.run_json("describe-availability-zones", &command).await?;
            Ok(response
                .availability_zones
                .into_iter()
                .map(AvailabilityZone::from)
                .collect())
        })
    }

    fn register_image<'a>(
        &'a self,
        request: &'a ImageRegistration,
    ) -> DriverFuture<'a, Image, Self::Error> {
        Box::pin(async move {
            let mappings = request
                .block_device_mappings
                .iter()
                .map(Ec2BlockDeviceMapping::from)
                .collect::<Vec<_>>();
            let mappings_json =
                serde_json::to_string(&mappings).map_err(|err| Ec2DriverError::Parse {
                    operation: String::from("register-image"),
                    message: err.to_string(),
                })?;
            let command = self.command(
                "register-image",
                [
                    "--name",
                    request.name.as_str(),
                    "--description",
                    request.description.as_str(),
                    "--virtualization-type",
                    request.virtualization_type.as_str(),
                    "--architecture",
                    request.architecture.as_str(),
                    "--root-device-name",
                    request.root_device_name.as_str(),
                    "--block-device-mappings",
                    mappings_json.as_str(),
                ],
            );
            let response: RegisterImageResponse =
                self.run_json("register-image", &command).await?;
            Ok(Image {
                id: response.image_id,
                name: request.name.clone(),
            })
        })
    }
}

/// Builds [`Ec2Driver`]s for any region from one runner and credential set.
#[derive(Clone, Debug)]
pub struct Ec2DriverFactory<R: CommandRunner + Clone> {
    runner: R,
    aws_bin: String,
    credentials: Ec2Credentials,
}

impl<R: CommandRunner + Clone> Ec2DriverFactory<R> {
    /// Creates a factory.
    #[must_use]
    pub fn new(runner: R, aws_bin: impl Into<String>, credentials: Ec2Credentials) -> Self {
        Self {
            runner,
            aws_bin: aws_bin.into(),
            credentials,
        }
    }
}

impl<R: CommandRunner + Clone> DriverFactory for Ec2DriverFactory<R> {
    type Driver = Ec2Driver<R>;

    fn driver_for_region(&self, region: &str) -> Result<Self::Driver, Ec2DriverError> {
        Ec2Driver::new(
            self.runner.clone(),
            self.aws_bin.as_str(),
            region,
            self.credentials.clone(),
        )
    }
}

//! Configuration loading via `ortho-config`.
//!
//! Values merge defaults, configuration files (`ami-publish.toml`,
//! `.ami-publish.toml`, or the file named by `AMI_PUBLISH_CONFIG_PATH`), and
//! environment variables, in that order of precedence.

use std::ffi::OsString;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::ec2::{DEFAULT_AWS_BIN, Ec2Credentials};
use crate::job::VolumeType;
use crate::upload::{DEFAULT_DESCRIBE_CONVERSION_TASKS_BIN, DEFAULT_IMPORT_VOLUME_BIN};

/// Configuration file name searched for in the working and home directories.
pub const CONFIG_FILE_NAME: &str = "ami-publish.toml";

/// Default cap on conversion status checks (one hour at 5 s intervals).
pub const DEFAULT_CONVERSION_MAX_ATTEMPTS: u32 = 720;

/// Default cap on snapshot state checks (one hour at 10 s intervals).
pub const DEFAULT_SNAPSHOT_MAX_ATTEMPTS: u32 = 360;

/// Default cap on image registration attempts.
pub const DEFAULT_REGISTER_MAX_ATTEMPTS: u32 = 100;

/// EC2 account and tooling settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "AMI_PUBLISH_EC2",
    discovery(
        app_name = "ami-publish",
        env_var = "AMI_PUBLISH_CONFIG_PATH",
        config_file_name = "ami-publish.toml",
        dotfile_name = ".ami-publish.toml",
        project_file_name = "ami-publish.toml"
    )
)]
pub struct Ec2Config {
    /// Access key id passed to the EC2 tools.
    pub access_id: String,
    /// Secret access key passed to the EC2 tools.
    pub secret_key: String,
    /// Pipe-separated region list; images are uploaded to the first entry.
    pub regions: String,
    /// Bucket name prefix; imports use `{bucket_name}-{region}`.
    pub bucket_name: String,
    /// Size of the image root volume in GiB.
    #[ortho_config(default = 7)]
    pub vol_size: u32,
    /// Pipe-separated volume types every image is published with.
    #[ortho_config(default = "standard|gp2".to_owned())]
    pub volume_types: String,
    /// Path to the `aws` CLI.
    #[ortho_config(default = DEFAULT_AWS_BIN.to_owned())]
    pub aws_bin: String,
    /// Path to the volume import tool.
    #[ortho_config(default = DEFAULT_IMPORT_VOLUME_BIN.to_owned())]
    pub import_volume_bin: String,
    /// Path to the conversion status tool.
    #[ortho_config(default = DEFAULT_DESCRIBE_CONVERSION_TASKS_BIN.to_owned())]
    pub describe_conversion_tasks_bin: String,
}

/// Pipeline behaviour settings.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "AMI_PUBLISH",
    discovery(
        app_name = "ami-publish",
        env_var = "AMI_PUBLISH_CONFIG_PATH",
        config_file_name = "ami-publish.toml",
        dotfile_name = ".ami-publish.toml",
        project_file_name = "ami-publish.toml"
    )
)]
pub struct PublishConfig {
    /// Whether to remove snapshots (and images) left by a failed job.
    #[ortho_config(default = true)]
    pub clean_up_on_failure: bool,
    /// Whether cleanup also deregisters images.
    #[ortho_config(default = true)]
    pub delete_images_on_failure: bool,
    /// Number of jobs run concurrently.
    #[ortho_config(default = 4)]
    pub workers: usize,
    /// Path to the download tool.
    #[ortho_config(default = "wget".to_owned())]
    pub download_bin: String,
    /// Cap on conversion status checks; `0` waits indefinitely.
    #[ortho_config(default = DEFAULT_CONVERSION_MAX_ATTEMPTS)]
    pub conversion_max_attempts: u32,
    /// Cap on snapshot state checks; `0` waits indefinitely.
    #[ortho_config(default = DEFAULT_SNAPSHOT_MAX_ATTEMPTS)]
    pub snapshot_max_attempts: u32,
    /// Cap on registration attempts; `0` retries renames indefinitely.
    #[ortho_config(default = DEFAULT_REGISTER_MAX_ATTEMPTS)]
    pub register_max_attempts: u32,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }
}

fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to {CONFIG_FILE_NAME}",
            metadata.description, metadata.env_var, metadata.toml_key
        )));
    }
    Ok(())
}

fn pipe_separated(value: &str) -> impl Iterator<Item = &str> {
    value
        .split('|')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
}

fn program_name() -> [OsString; 1] {
    [OsString::from("ami-publish")]
}

impl Ec2Config {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(program_name()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on required fields.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty
    /// and [`ConfigError::Invalid`] when a value cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.access_id,
            &FieldMetadata::new(
                "EC2 access key id",
                "AMI_PUBLISH_EC2_ACCESS_ID",
                "access_id",
            ),
        )?;
        require_field(
            &self.secret_key,
            &FieldMetadata::new(
                "EC2 secret access key",
                "AMI_PUBLISH_EC2_SECRET_KEY",
                "secret_key",
            ),
        )?;
        require_field(
            self.primary_region().unwrap_or_default(),
            &FieldMetadata::new("target region", "AMI_PUBLISH_EC2_REGIONS", "regions"),
        )?;
        require_field(
            &self.bucket_name,
            &FieldMetadata::new(
                "import bucket name",
                "AMI_PUBLISH_EC2_BUCKET_NAME",
                "bucket_name",
            ),
        )?;
        require_field(
            &self.aws_bin,
            &FieldMetadata::new("aws CLI path", "AMI_PUBLISH_EC2_AWS_BIN", "aws_bin"),
        )?;
        require_field(
            &self.import_volume_bin,
            &FieldMetadata::new(
                "volume import tool path",
                "AMI_PUBLISH_EC2_IMPORT_VOLUME_BIN",
                "import_volume_bin",
            ),
        )?;
        require_field(
            &self.describe_conversion_tasks_bin,
            &FieldMetadata::new(
                "conversion status tool path",
                "AMI_PUBLISH_EC2_DESCRIBE_CONVERSION_TASKS_BIN",
                "describe_conversion_tasks_bin",
            ),
        )?;
        if self.vol_size == 0 {
            return Err(ConfigError::Invalid(String::from(
                "vol_size must be at least 1 GiB",
            )));
        }
        if self.volume_types()?.is_empty() {
            return Err(ConfigError::Invalid(String::from(
                "volume_types must name at least one volume type",
            )));
        }
        Ok(())
    }

    /// Region images are uploaded to: the first entry of `regions`.
    #[must_use]
    pub fn primary_region(&self) -> Option<&str> {
        pipe_separated(&self.regions).next()
    }

    /// Parsed `volume_types` list.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when an entry is not a known type.
    pub fn volume_types(&self) -> Result<Vec<VolumeType>, ConfigError> {
        pipe_separated(&self.volume_types)
            .map(|entry| {
                entry
                    .parse::<VolumeType>()
                    .map_err(|err| ConfigError::Invalid(err.to_string()))
            })
            .collect()
    }

    /// Credentials passed to the EC2 tools.
    #[must_use]
    pub fn credentials(&self) -> Ec2Credentials {
        Ec2Credentials::new(self.access_id.trim(), self.secret_key.trim())
    }
}

impl PublishConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter(program_name()).map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Validates pipeline settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when `workers` is zero and
    /// [`ConfigError::MissingField`] when the download tool is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid(String::from(
                "workers must be at least 1",
            )));
        }
        require_field(
            &self.download_bin,
            &FieldMetadata::new(
                "download tool path",
                "AMI_PUBLISH_DOWNLOAD_BIN",
                "download_bin",
            ),
        )
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configured value cannot be used.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

//! Upload jobs: one unit of work per image, virtualization type, and volume
//! type.

use std::fmt;
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use thiserror::Error;

const RAW_XZ_SUFFIX: &str = ".raw.xz";

/// Boot mode an image is registered with.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VirtualizationType {
    /// Paravirtual guests boot from `/dev/sda`.
    Paravirtual,
    /// Hardware virtual machines boot from `/dev/sda1`.
    Hvm,
}

impl VirtualizationType {
    /// Provider spelling of the virtualization type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Paravirtual => "paravirtual",
            Self::Hvm => "hvm",
        }
    }

    /// Tag used inside image names.
    #[must_use]
    pub const fn name_tag(self) -> &'static str {
        match self {
            Self::Paravirtual => "PV",
            Self::Hvm => "HVM",
        }
    }

    /// Root device the image boots from.
    #[must_use]
    pub const fn root_device_name(self) -> &'static str {
        match self {
            Self::Paravirtual => "/dev/sda",
            Self::Hvm => "/dev/sda1",
        }
    }
}

impl fmt::Display for VirtualizationType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Storage class of the image's root volume.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeType {
    /// Magnetic storage.
    Standard,
    /// General purpose SSD.
    Gp2,
}

impl VolumeType {
    /// Every supported volume type, in publishing order.
    pub const ALL: [Self; 2] = [Self::Standard, Self::Gp2];

    /// Provider spelling of the volume type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Gp2 => "gp2",
        }
    }
}

impl fmt::Display for VolumeType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl FromStr for VolumeType {
    type Err = JobError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "standard" => Ok(Self::Standard),
            "gp2" => Ok(Self::Gp2),
            other => Err(JobError::UnknownVolumeType(other.to_owned())),
        }
    }
}

/// CPU architecture of the image.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Architecture {
    /// 64-bit x86.
    X86_64,
    /// 64-bit ARM.
    Arm64,
    /// 32-bit x86.
    I386,
}

impl Architecture {
    /// Infers the architecture from an image file name, defaulting to
    /// `x86_64` when the name carries no architecture marker.
    #[must_use]
    pub fn from_file_name(file_name: &str) -> Self {
        if file_name.contains("aarch64") {
            Self::Arm64
        } else if file_name.contains("i386") || file_name.contains("i686") {
            Self::I386
        } else {
            Self::X86_64
        }
    }

    /// Provider spelling of the architecture.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Arm64 => "arm64",
            Self::I386 => "i386",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Virtualization types an image URL should be published as.
///
/// Atomic host images only boot as HVM.
#[must_use]
pub fn virtualization_types_for_url(url: &str) -> Vec<VirtualizationType> {
    if url.to_ascii_lowercase().contains("atomic") {
        vec![VirtualizationType::Hvm]
    } else {
        vec![VirtualizationType::Hvm, VirtualizationType::Paravirtual]
    }
}

/// Errors raised while building upload jobs.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum JobError {
    /// Raised when the URL has no file name component.
    #[error("image URL {0} does not name a file")]
    MissingFileName(String),
    /// Raised when the target region is blank.
    #[error("target region must not be empty")]
    EmptyRegion,
    /// Raised when a configured volume type is not recognised.
    #[error("unknown volume type '{0}'")]
    UnknownVolumeType(String),
}

/// One unit of publishing work. Immutable once created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UploadJob {
    url: String,
    working_dir: Utf8PathBuf,
    virtualization_type: VirtualizationType,
    volume_type: VolumeType,
    region: String,
    file_name: String,
    build_name: String,
    architecture: Architecture,
}

impl UploadJob {
    /// Builds a job, deriving the file and build names from the URL.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::MissingFileName`] when the URL ends in `/` and
    /// [`JobError::EmptyRegion`] when `region` is blank.
    pub fn new(
        url: impl Into<String>,
        working_dir: impl Into<Utf8PathBuf>,
        virtualization_type: VirtualizationType,
        volume_type: VolumeType,
        region: impl Into<String>,
    ) -> Result<Self, JobError> {
        let trimmed_url = url.into().trim().to_owned();
        let trimmed_region = region.into().trim().to_owned();
        if trimmed_region.is_empty() {
            return Err(JobError::EmptyRegion);
        }
        let file_name = file_name_from_url(&trimmed_url)
            .ok_or_else(|| JobError::MissingFileName(trimmed_url.clone()))?
            .to_owned();
        let build_name = build_name_from_file(&file_name).to_owned();
        let architecture = Architecture::from_file_name(&file_name);

        Ok(Self {
            url: trimmed_url,
            working_dir: working_dir.into(),
            virtualization_type,
            volume_type,
            region: trimmed_region,
            file_name,
            build_name,
            architecture,
        })
    }

    /// Source image URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Directory the image was downloaded into.
    #[must_use]
    pub fn working_dir(&self) -> &Utf8Path {
        &self.working_dir
    }

    /// Virtualization type to register.
    #[must_use]
    pub const fn virtualization_type(&self) -> VirtualizationType {
        self.virtualization_type
    }

    /// Volume type backing the image.
    #[must_use]
    pub const fn volume_type(&self) -> VolumeType {
        self.volume_type
    }

    /// Target region.
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Last path segment of the URL.
    #[must_use]
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// File name without its `.raw.xz` suffix.
    #[must_use]
    pub fn build_name(&self) -> &str {
        &self.build_name
    }

    /// Architecture inferred from the file name.
    #[must_use]
    pub const fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Description attached to the registered image.
    #[must_use]
    pub fn description(&self) -> String {
        format!("Created from build {}", self.build_name)
    }

    /// Label naming the provider and region in notifications.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("EC2 ({})", self.region)
    }
}

/// Expands one URL into jobs for each virtualization and volume type.
///
/// # Errors
///
/// Returns [`JobError`] when the URL or region is unusable.
pub fn jobs_for_url(
    url: &str,
    working_dir: &Utf8Path,
    region: &str,
    volume_types: &[VolumeType],
) -> Result<Vec<UploadJob>, JobError> {
    let mut jobs = Vec::new();
    for virtualization_type in virtualization_types_for_url(url) {
        for volume_type in volume_types {
            jobs.push(UploadJob::new(
                url,
                working_dir,
                virtualization_type,
                *volume_type,
                region,
            )?);
        }
    }
    Ok(jobs)
}

fn file_name_from_url(url: &str) -> Option<&str> {
    url.rsplit('/').next().filter(|name| !name.is_empty())
}

fn build_name_from_file(file_name: &str) -> &str {
    file_name.strip_suffix(RAW_XZ_SUFFIX).unwrap_or(file_name)
}

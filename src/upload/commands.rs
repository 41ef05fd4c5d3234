//! Command lines for the EC2 volume import tools.

use crate::command::CommandLine;
use crate::ec2::Ec2Credentials;
use crate::job::UploadJob;

use super::conversion::ConversionTask;

/// Format passed to the volume import tool.
pub const IMAGE_FORMAT: &str = "raw";

/// Default volume import binary.
pub const DEFAULT_IMPORT_VOLUME_BIN: &str = "euca-import-volume";

/// Default conversion status binary.
pub const DEFAULT_DESCRIBE_CONVERSION_TASKS_BIN: &str = "euca-describe-conversion-tasks";

/// Builds invocations of the volume import and conversion status tools.
#[derive(Clone, Debug)]
pub struct ImportTools {
    import_volume_bin: String,
    describe_conversion_tasks_bin: String,
    credentials: Ec2Credentials,
}

impl ImportTools {
    /// Creates the tool set.
    #[must_use]
    pub fn new(
        import_volume_bin: impl Into<String>,
        describe_conversion_tasks_bin: impl Into<String>,
        credentials: Ec2Credentials,
    ) -> Self {
        Self {
            import_volume_bin: import_volume_bin.into(),
            describe_conversion_tasks_bin: describe_conversion_tasks_bin.into(),
            credentials,
        }
    }

    /// `euca-import-volume {cwd}/{file} -f raw --region R -b BUCKET -z ZONE`.
    #[must_use]
    pub fn import_volume(&self, job: &UploadJob, bucket: &str, zone: &str) -> CommandLine {
        let source = format!("{}/{}", job.working_dir(), job.file_name());
        let command = CommandLine::new(self.import_volume_bin.as_str()).args([
            source.as_str(),
            "-f",
            IMAGE_FORMAT,
            "--region",
            job.region(),
            "-b",
            bucket,
            "-z",
            zone,
        ]);
        self.credentials.apply(command)
    }

    /// `euca-describe-conversion-tasks {task_id} --region R`.
    #[must_use]
    pub fn describe_conversion_tasks(&self, task: &ConversionTask) -> CommandLine {
        let command = CommandLine::new(self.describe_conversion_tasks_bin.as_str()).args([
            task.task_id.as_str(),
            "--region",
            task.region.as_str(),
        ]);
        self.credentials.apply(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{VirtualizationType, VolumeType};
    use rstest::rstest;

    fn tools() -> ImportTools {
        ImportTools::new(
            DEFAULT_IMPORT_VOLUME_BIN,
            DEFAULT_DESCRIBE_CONVERSION_TASKS_BIN,
            Ec2Credentials::new("AKID", "secret"),
        )
    }

    #[rstest]
    fn import_volume_matches_tool_syntax() {
        let job = UploadJob::new(
            "https://example.org/Fedora-Cloud-Base-27.x86_64.raw.xz",
            "/tmp/ami-publish",
            VirtualizationType::Hvm,
            VolumeType::Standard,
            "us-east-1",
        )
        .expect("job");

        let command = tools().import_volume(&job, "fedimg-us-east-1", "us-east-1a");

        assert_eq!(
            command.render(),
            "euca-import-volume /tmp/ami-publish/Fedora-Cloud-Base-27.x86_64.raw.xz -f raw \
             --region us-east-1 -b fedimg-us-east-1 -z us-east-1a"
        );
        assert!(
            command
                .environment()
                .iter()
                .any(|(key, value)| key == "AWS_SECRET_ACCESS_KEY" && value == "secret")
        );
    }

    #[rstest]
    fn describe_conversion_tasks_matches_tool_syntax() {
        let task = ConversionTask {
            task_id: String::from("import-vol-ffgx2hpn"),
            region: String::from("eu-west-1"),
        };

        assert_eq!(
            tools().describe_conversion_tasks(&task).render(),
            "euca-describe-conversion-tasks import-vol-ffgx2hpn --region eu-west-1"
        );
    }
}

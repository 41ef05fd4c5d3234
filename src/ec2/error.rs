//! Errors raised by the EC2 driver.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::command::CommandError;
use crate::driver::DriverErrorKind;

/// Provider error code returned when an image name is already taken.
pub const DUPLICATE_IMAGE_NAME_CODE: &str = "InvalidAMIName.Duplicate";

// Constant pattern; a unit test pins that it compiles.
static API_ERROR_PATTERN: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"An error occurred \(([^)]+)\) when calling the (\w+) operation: (.*)").ok()
});

/// Errors surfaced by [`super::Ec2Driver`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Ec2DriverError {
    /// Raised when the driver cannot be built from the supplied settings.
    #[error("invalid EC2 driver configuration: {field} must not be empty")]
    Config {
        /// Name of the missing setting.
        field: String,
    },
    /// Raised when the EC2 API rejects a request.
    #[error("{operation} failed with {code}: {message}")]
    Api {
        /// API operation name (for example `RegisterImage`).
        operation: String,
        /// Provider error code (for example `InvalidAMIName.Duplicate`).
        code: String,
        /// Provider error message.
        message: String,
    },
    /// Raised when the `aws` CLI fails without a recognisable API error.
    #[error("{program} exited with status {status_text}: {stderr}")]
    CommandFailure {
        /// Program that failed.
        program: String,
        /// Exit status reported by the OS.
        status: Option<i32>,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when JSON output from the CLI cannot be parsed.
    #[error("failed to parse {operation} output: {message}")]
    Parse {
        /// CLI operation whose output was parsed.
        operation: String,
        /// Parser error message.
        message: String,
    },
    /// Raised when the CLI process cannot be started.
    #[error(transparent)]
    Runner(#[from] CommandError),
}

impl Ec2DriverError {
    /// Classifies a failed `aws` invocation, preferring the structured API
    /// error when stderr carries one.
    pub(super) fn from_failure(error: CommandError) -> Self {
        match error {
            CommandError::Failure {
                program,
                status,
                status_text,
                stderr,
            } => parse_api_error(&stderr).unwrap_or(Self::CommandFailure {
                program,
                status,
                status_text,
                stderr,
            }),
            spawn @ CommandError::Spawn { .. } => Self::Runner(spawn),
        }
    }
}

impl DriverErrorKind for Ec2DriverError {
    fn is_duplicate_name(&self) -> bool {
        match self {
            Self::Api { code, message, .. } => {
                code == DUPLICATE_IMAGE_NAME_CODE || message.contains(DUPLICATE_IMAGE_NAME_CODE)
            }
            Self::CommandFailure { stderr, .. } => stderr.contains(DUPLICATE_IMAGE_NAME_CODE),
            Self::Config { .. } | Self::Parse { .. } | Self::Runner(_) => false,
        }
    }
}

fn parse_api_error(stderr: &str) -> Option<Ec2DriverError> {
    let pattern = API_ERROR_PATTERN.as_ref()?;
    let captures = pattern.captures(stderr)?;
    Some(Ec2DriverError::Api {
        code: captures.get(1)?.as_str().to_owned(),
        operation: captures.get(2)?.as_str().to_owned(),
        message: captures.get(3)?.as_str().trim().to_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn api_error_pattern_compiles() {
        assert!(API_ERROR_PATTERN.is_some());
    }

    #[rstest]
    fn api_error_is_parsed_from_cli_stderr() {
        let parsed = parse_api_error(
            "\nAn error occurred (InvalidAMIName.Duplicate) when calling the RegisterImage operation: AMI name x is already in use\n",
        );

        assert_eq!(
            parsed,
            Some(Ec2DriverError::Api {
                operation: String::from("RegisterImage"),
                code: String::from(DUPLICATE_IMAGE_NAME_CODE),
                message: String::from("AMI name x is already in use"),
            })
        );
    }
}

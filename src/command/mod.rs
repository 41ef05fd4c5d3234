//! External command execution for downloads and the EC2 command-line tools.
//!
//! Every command the pipeline issues is described by a [`CommandLine`] and
//! executed through a [`CommandRunner`], so tests can substitute a scripted
//! runner and assert on the exact command lines that would have been run.

use std::fmt;

use shell_escape::unix::escape;

mod types;

pub use types::{
    CommandError, CommandFuture, CommandOutput, CommandRunner, ProcessCommandRunner,
};

/// A program invocation: the program, its arguments, and extra environment.
///
/// Environment entries are passed to the child process but never rendered by
/// [`CommandLine::render`], so credentials stay out of logs.
#[derive(Clone, Eq, PartialEq)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
}

impl CommandLine {
    /// Starts a command line for `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Appends a single argument.
    #[must_use]
    pub fn arg(mut self, value: impl Into<String>) -> Self {
        self.args.push(value.into());
        self
    }

    /// Appends several arguments in order.
    #[must_use]
    pub fn args<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    /// Adds an environment variable for the child process.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Program name or path.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments in invocation order.
    #[must_use]
    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Extra environment passed to the child process.
    #[must_use]
    pub fn environment(&self) -> &[(String, String)] {
        &self.env
    }

    /// Renders the program and arguments as a shell-escaped line.
    #[must_use]
    pub fn render(&self) -> String {
        let mut rendered = escape(self.program.as_str().into()).into_owned();
        for arg in &self.args {
            rendered.push(' ');
            rendered.push_str(escape(arg.as_str().into()).as_ref());
        }
        rendered
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.render())
    }
}

impl fmt::Debug for CommandLine {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let env_keys = self.env.iter().map(|(key, _)| key).collect::<Vec<_>>();
        formatter
            .debug_struct("CommandLine")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("env", &env_keys)
            .finish()
    }
}

//! Server process launch definitions.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use serde::{Deserialize, Serialize};
use tokio::process::Command;

/// Shell used when `$SHELL` is unset.
pub const FALLBACK_SHELL: &str = "/bin/sh";

/// How to start an MCP server.
///
/// An absolute `command` is executed directly. Anything else runs through the
/// user's login shell so that version managers and `PATH` customisations from
/// shell profiles apply:
///
/// ```text
/// $SHELL -l -i -c 'exec <command> <args...>'
/// ```
///
/// `env` entries are layered over the inherited environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerLaunch {
    /// Executable name or path.
    pub command: String,
    /// Arguments passed to the command.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Extra environment variables.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    /// Working directory for the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
}

impl ServerLaunch {
    /// Creates a launch for `command` with no arguments.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// Appends arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets one environment variable.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the working directory.
    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Returns true when the command is executed without a shell.
    #[must_use]
    pub fn is_direct(&self) -> bool {
        Path::new(&self.command).is_absolute()
    }

    /// The command and its arguments quoted as one shell command line.
    #[must_use]
    pub fn command_line(&self) -> String {
        shell_words::join(std::iter::once(&self.command).chain(&self.args))
    }

    /// Program and argument vector that will actually be executed.
    #[must_use]
    pub fn program_and_args(&self) -> (String, Vec<String>) {
        if self.is_direct() {
            (self.command.clone(), self.args.clone())
        } else {
            let shell = std::env::var("SHELL")
                .ok()
                .filter(|shell| !shell.trim().is_empty())
                .unwrap_or_else(|| FALLBACK_SHELL.to_owned());
            (
                shell,
                vec![
                    "-l".to_owned(),
                    "-i".to_owned(),
                    "-c".to_owned(),
                    format!("exec {}", self.command_line()),
                ],
            )
        }
    }

    /// Builds the child process with all three stdio streams piped.
    pub(crate) fn to_command(&self) -> Command {
        let (program, args) = self.program_and_args();
        let mut command = Command::new(program);
        command
            .args(args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        command
    }
}

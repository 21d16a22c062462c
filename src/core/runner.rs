use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::RaidError;

/// How a privileged command gets its elevated rights
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Elevation {
    #[default]
    Sudo,
    Pkexec,
    Doas,
    /// Commands run as-is, e.g. when already root
    None,
    /// The whole process was re-executed elevated at startup
    Process,
    /// Arbitrary front-end argv, e.g. `["run0"]`
    Custom(Vec<String>),
}

impl Elevation {
    /// Front-end argv. Without a terminal to prompt on, sudo and doas get `-n`
    /// so they fail instead of asking for a password.
    fn prefix(&self, interactive: bool) -> Vec<String> {
        let mut front = match self {
            Elevation::Sudo => vec!["sudo".to_string()],
            Elevation::Pkexec => vec!["pkexec".to_string()],
            Elevation::Doas => vec!["doas".to_string()],
            Elevation::None | Elevation::Process => Vec::new(),
            Elevation::Custom(front) => front.clone(),
        };
        if !interactive && matches!(self, Elevation::Sudo | Elevation::Doas) {
            front.push("-n".to_string());
        }
        front
    }

    /// Command that asks for the password up front, while the terminal is still in cooked mode
    pub fn credential_check(&self) -> Option<Vec<String>> {
        match self {
            Elevation::Sudo => Some(vec!["sudo".to_string(), "-v".to_string()]),
            Elevation::Doas => Some(vec!["doas".to_string(), "true".to_string()]),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    User,
    Elevated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Non-zero exit becomes `RaidError::Execution`
    Checked,
    /// Non-zero exit is returned in `CommandOutput` for the caller to inspect
    Tolerant,
}

/// A single external command, described before any elevation is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub argv: Vec<String>,
    pub privilege: Privilege,
    pub mode: RunMode,
}

impl Invocation {
    pub fn user<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            privilege: Privilege::User,
            mode: RunMode::Checked,
        }
    }

    pub fn elevated<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            privilege: Privilege::Elevated,
            ..Self::user(argv)
        }
    }

    pub fn tolerant(mut self) -> Self {
        self.mode = RunMode::Tolerant;
        self
    }

    pub fn display(&self) -> String {
        self.argv.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes external commands synchronously. No retries.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, RaidError>;

    /// The argv that would actually be executed, elevation front-end included
    fn resolve(&self, invocation: &Invocation) -> Vec<String>;
}

/// Runner backed by `std::process::Command`
pub struct SystemRunner {
    elevation: Elevation,
    interactive: bool,
}

impl SystemRunner {
    pub fn new(elevation: Elevation) -> Self {
        Self {
            elevation,
            interactive: true,
        }
    }

    /// Elevation front-ends must never prompt, e.g. while a full-screen interface owns the terminal
    pub fn non_interactive(mut self) -> Self {
        self.interactive = false;
        self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<CommandOutput, RaidError> {
        let argv = self.resolve(invocation);
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| RaidError::Session("empty command line".to_string()))?;

        debug!(command = %argv.join(" "), "running command");
        let output = Command::new(program).args(args).output()?;

        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        check(invocation, result)
    }

    fn resolve(&self, invocation: &Invocation) -> Vec<String> {
        match invocation.privilege {
            Privilege::User => invocation.argv.clone(),
            Privilege::Elevated => {
                let mut argv = self.elevation.prefix(self.interactive);
                argv.extend(invocation.argv.iter().cloned());
                argv
            }
        }
    }
}

/// Applies the invocation's run mode to a finished command
pub fn check(invocation: &Invocation, output: CommandOutput) -> Result<CommandOutput, RaidError> {
    if output.success() || invocation.mode == RunMode::Tolerant {
        return Ok(output);
    }

    warn!(
        command = %invocation.display(),
        exit_code = ?output.exit_code,
        "command failed"
    );
    Err(RaidError::Execution {
        command: invocation.display(),
        exit_code: output.exit_code,
        stderr: output.stderr,
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevation_is_prefixed_only_for_elevated_calls() {
        let runner = SystemRunner::new(Elevation::Pkexec);
        let elevated = Invocation::elevated(["mdadm", "--stop", "/dev/md0"]);
        let user = Invocation::user(["cat", "/proc/mdstat"]);

        assert_eq!(runner.resolve(&elevated), ["pkexec", "mdadm", "--stop", "/dev/md0"]);
        assert_eq!(runner.resolve(&user), ["cat", "/proc/mdstat"]);
    }

    #[test]
    fn test_non_interactive_runner_never_prompts_for_a_password() {
        let inv = Invocation::elevated(["mdadm", "--stop", "/dev/md0"]);
        let sudo = SystemRunner::new(Elevation::Sudo).non_interactive();
        let doas = SystemRunner::new(Elevation::Doas).non_interactive();
        let pkexec = SystemRunner::new(Elevation::Pkexec).non_interactive();

        assert_eq!(sudo.resolve(&inv), ["sudo", "-n", "mdadm", "--stop", "/dev/md0"]);
        assert_eq!(doas.resolve(&inv), ["doas", "-n", "mdadm", "--stop", "/dev/md0"]);
        assert_eq!(pkexec.resolve(&inv), ["pkexec", "mdadm", "--stop", "/dev/md0"]);
        assert_eq!(
            SystemRunner::new(Elevation::Sudo).resolve(&inv),
            ["sudo", "mdadm", "--stop", "/dev/md0"]
        );
        assert_eq!(
            sudo.resolve(&Invocation::user(["cat", "/proc/mdstat"])),
            ["cat", "/proc/mdstat"]
        );
    }

    #[test]
    fn test_credential_check_only_for_password_front_ends() {
        assert_eq!(Elevation::Sudo.credential_check(), Some(vec!["sudo".to_string(), "-v".to_string()]));
        assert_eq!(Elevation::Doas.credential_check(), Some(vec!["doas".to_string(), "true".to_string()]));
        assert_eq!(Elevation::Pkexec.credential_check(), None);
        assert_eq!(Elevation::Process.credential_check(), None);
    }

    #[test]
    fn test_custom_and_process_elevation() {
        let custom = SystemRunner::new(Elevation::Custom(vec!["run0".into(), "--quiet".into()]));
        let process = SystemRunner::new(Elevation::Process);
        let inv = Invocation::elevated(["umount", "/mnt/raid"]);

        assert_eq!(custom.resolve(&inv), ["run0", "--quiet", "umount", "/mnt/raid"]);
        assert_eq!(process.resolve(&inv), ["umount", "/mnt/raid"]);
    }

    #[test]
    fn test_checked_mode_turns_nonzero_exit_into_execution_error() {
        let runner = SystemRunner::new(Elevation::None);
        let err = runner
            .run(&Invocation::user(["sh", "-c", "echo boom >&2; exit 3"]))
            .unwrap_err();

        match err {
            RaidError::Execution {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr.trim(), "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_tolerant_mode_returns_failed_output() {
        let runner = SystemRunner::new(Elevation::None);
        let output = runner
            .run(&Invocation::user(["sh", "-c", "echo partial; exit 1"]).tolerant())
            .unwrap();

        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "partial");
    }

    #[test]
    fn test_missing_program_is_io_error() {
        let runner = SystemRunner::new(Elevation::None);
        let err = runner
            .run(&Invocation::user(["/nonexistent/raidie-test-binary"]))
            .unwrap_err();
        assert!(matches!(err, RaidError::Io(_)));
    }
}

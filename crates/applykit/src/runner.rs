//! Instruction execution.

use crate::error::{Error, Result};
use crate::plan::OneTimeInstruction;
use serde::{Deserialize, Serialize};
use std::process::{Command, Output};

/// Captured result of one instruction run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub success: bool,
    /// Exit code, when the process exited normally
    pub code: Option<i32>,
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

impl CommandOutput {
    /// Get stdout as a string
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).to_string()
    }

    /// Get stderr as a string
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).to_string()
    }

    /// One-line description of a failed run
    pub fn failure_message(&self) -> String {
        let stderr = self.stderr_str();
        let detail = stderr.lines().last().unwrap_or_default().trim();
        match (self.code, detail.is_empty()) {
            (Some(code), true) => format!("exit status {code}"),
            (Some(code), false) => format!("exit status {code}: {detail}"),
            (None, true) => "terminated by signal".to_string(),
            (None, false) => format!("terminated by signal: {detail}"),
        }
    }
}

/// Runs a single instruction.
///
/// Implementations must not retry; attempts are counted by the applier.
pub trait InstructionRunner {
    /// Run `instruction` once and capture its output.
    fn run(&self, instruction: &OneTimeInstruction) -> Result<CommandOutput>;
}

/// Container CLI used for image instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerCli {
    /// Executable, e.g. `docker` or `nerdctl`.
    pub command: String,
    /// Arguments placed between `run` and the image.
    pub run_args: Vec<String>,
}

impl Default for ContainerCli {
    fn default() -> Self {
        Self {
            command: "docker".to_string(),
            run_args: ["--rm", "--privileged", "--net=host", "--pid=host", "-v", "/:/host"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Runs instructions as local processes.
///
/// Plain instructions run `command args...` with the instruction's env added
/// to the inherited environment. Image instructions run the image through
/// the [`ContainerCli`], passing env with `-e` and the command and args
/// after the image.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    container: ContainerCli,
}

impl ProcessRunner {
    /// Runner with the default container CLI.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner with a specific container CLI.
    #[must_use]
    pub fn with_container_cli(container: ContainerCli) -> Self {
        Self { container }
    }

    /// The command line an instruction maps to (program first).
    pub fn command_line(&self, instruction: &OneTimeInstruction) -> Vec<String> {
        if instruction.image.is_empty() {
            let mut line = vec![instruction.command.clone()];
            line.extend(instruction.args.iter().cloned());
            return line;
        }

        let mut line = vec![self.container.command.clone(), "run".to_string()];
        line.extend(self.container.run_args.iter().cloned());
        for entry in &instruction.env {
            line.push("-e".to_string());
            line.push(entry.clone());
        }
        line.push(instruction.image.clone());
        if !instruction.command.is_empty() {
            line.push(instruction.command.clone());
        }
        line.extend(instruction.args.iter().cloned());
        line
    }
}

impl InstructionRunner for ProcessRunner {
    fn run(&self, instruction: &OneTimeInstruction) -> Result<CommandOutput> {
        let line = self.command_line(instruction);
        let Some((program, args)) = line.split_first().filter(|(p, _)| !p.is_empty()) else {
            return Err(Error::Spawn {
                name: instruction.name.clone(),
                message: "no command or image".to_string(),
            });
        };

        let mut cmd = Command::new(program);
        cmd.args(args);
        if instruction.image.is_empty() {
            for entry in &instruction.env {
                if let Some((key, value)) = entry.split_once('=') {
                    cmd.env(key, value);
                }
            }
        }

        log::debug!("Running instruction {}: {}", instruction.name, line.join(" "));
        let output = cmd.output().map_err(|e| Error::Spawn {
            name: instruction.name.clone(),
            message: format!("{program}: {e}"),
        })?;
        Ok(output.into())
    }
}

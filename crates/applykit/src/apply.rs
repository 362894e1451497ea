//! Plan application - reconcile files, then run instructions in order

use crate::error::{Error, Result};
use crate::plan::{File, OneTimeInstruction, Plan};
use crate::runner::{CommandOutput, InstructionRunner, ProcessRunner};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// What to do with a plan
#[derive(Debug, Clone)]
pub struct ApplyInput {
    pub plan: Plan,
    /// Write files that are missing or differ
    pub reconcile_files: bool,
    /// Run the one-time instructions
    pub run_instructions: bool,
    /// Attempts per instruction before the apply fails
    pub instruction_attempts: u32,
}

impl ApplyInput {
    /// Apply everything with the given attempt count
    pub fn full(plan: Plan, instruction_attempts: u32) -> Self {
        Self {
            plan,
            reconcile_files: true,
            run_instructions: true,
            instruction_attempts,
        }
    }
}

/// Result of reconciling a single file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileResult {
    /// File did not exist
    Created,
    /// Content or mode differed
    Modified,
    /// Already up to date
    NoChange,
}

/// Summary of an apply run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplySummary {
    pub files_created: usize,
    pub files_modified: usize,
    pub files_unchanged: usize,
    pub instructions_run: usize,
    /// Attempts across all instructions (retries included)
    pub attempts: usize,
}

impl ApplySummary {
    /// Number of files written
    pub fn files_changed(&self) -> usize {
        self.files_created + self.files_modified
    }

    /// Add a file result to the summary
    pub fn add_file(&mut self, result: FileResult) {
        match result {
            FileResult::Created => self.files_created += 1,
            FileResult::Modified => self.files_modified += 1,
            FileResult::NoChange => self.files_unchanged += 1,
        }
    }
}

/// Output kept for an instruction with `saveOutput`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl From<&CommandOutput> for InstructionOutput {
    fn from(output: &CommandOutput) -> Self {
        Self {
            stdout: output.stdout_str(),
            stderr: output.stderr_str(),
            exit_code: output.code,
        }
    }
}

/// Result of a successful apply
#[derive(Debug, Clone, Default)]
pub struct ApplyOutput {
    /// Gzip-compressed JSON map of instruction name to [`InstructionOutput`]
    pub output: Vec<u8>,
    pub summary: ApplySummary,
}

/// Something that can apply a plan to the host
///
/// Implementations reconcile files before running instructions and return an
/// error as soon as any file or instruction fails.
pub trait Applier {
    fn apply(&self, input: &ApplyInput) -> Result<ApplyOutput>;
}

/// Applies plans on the local machine
pub struct LocalApplier<R: InstructionRunner = ProcessRunner> {
    runner: R,
    attempt_delay: Duration,
}

impl LocalApplier<ProcessRunner> {
    /// Applier running instructions as local processes
    pub fn new() -> Self {
        Self::with_runner(ProcessRunner::new())
    }
}

impl Default for LocalApplier<ProcessRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: InstructionRunner> LocalApplier<R> {
    /// Applier with a custom instruction runner
    pub fn with_runner(runner: R) -> Self {
        Self {
            runner,
            attempt_delay: Duration::from_secs(2),
        }
    }

    /// Pause between attempts of the same instruction
    pub fn attempt_delay(mut self, delay: Duration) -> Self {
        self.attempt_delay = delay;
        self
    }

    /// Run one instruction up to `attempts` times
    fn run_instruction(
        &self,
        instruction: &OneTimeInstruction,
        attempts: u32,
        summary: &mut ApplySummary,
    ) -> Result<CommandOutput> {
        let attempts = attempts.max(1);
        let mut last_failure = String::new();

        for attempt in 1..=attempts {
            summary.attempts += 1;
            log::info!(
                "Running instruction {} (attempt {attempt}/{attempts})",
                instruction.name
            );

            match self.runner.run(instruction) {
                Ok(output) if output.success => return Ok(output),
                Ok(output) => last_failure = output.failure_message(),
                Err(e) => last_failure = e.to_string(),
            }

            log::warn!("Instruction {} failed: {last_failure}", instruction.name);
            if attempt < attempts && !self.attempt_delay.is_zero() {
                thread::sleep(self.attempt_delay);
            }
        }

        Err(Error::InstructionFailed {
            name: instruction.name.clone(),
            attempts,
            message: last_failure,
        })
    }
}

impl<R: InstructionRunner> Applier for LocalApplier<R> {
    fn apply(&self, input: &ApplyInput) -> Result<ApplyOutput> {
        let mut summary = ApplySummary::default();

        if input.reconcile_files {
            for file in &input.plan.files {
                let result = reconcile_file(file)?;
                log::debug!("File {}: {result:?}", file.path);
                summary.add_file(result);
            }
        }

        let mut outputs = BTreeMap::new();
        if input.run_instructions {
            for instruction in &input.plan.one_time_instructions {
                let output =
                    self.run_instruction(instruction, input.instruction_attempts, &mut summary)?;
                summary.instructions_run += 1;
                if instruction.save_output {
                    outputs.insert(instruction.name.clone(), InstructionOutput::from(&output));
                }
            }
        }

        Ok(ApplyOutput {
            output: compress_outputs(&outputs)?,
            summary,
        })
    }
}

fn compress_outputs(outputs: &BTreeMap<String, InstructionOutput>) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(outputs)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| Error::io("compressing", "plan output", e))?;
    encoder
        .finish()
        .map_err(|e| Error::io("compressing", "plan output", e))
}

/// Write a plan file to disk if it is missing or differs in content or mode
pub fn reconcile_file(file: &File) -> Result<FileResult> {
    let content = file.decode()?;
    let mode = file.mode()?;
    let path = Path::new(&file.path);

    let result = match fs::read(path) {
        Ok(existing) if existing == content && current_mode(path) == Some(mode) => {
            return Ok(FileResult::NoChange);
        }
        Ok(_) => FileResult::Modified,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => FileResult::Created,
        Err(e) => return Err(Error::io("reading", path, e)),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::io("creating directory", parent, e))?;
    }

    // Written beside the target and renamed, so read-only targets can be replaced
    let staging = staging_path(path);
    fs::write(&staging, &content).map_err(|e| Error::io("writing", &staging, e))?;
    set_mode(&staging, mode)?;
    fs::rename(&staging, path).map_err(|e| Error::io("renaming", &staging, e))?;

    Ok(result)
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".nodestrap-tmp");
    path.with_file_name(name)
}

#[cfg(unix)]
fn current_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .ok()
        .map(|m| m.permissions().mode() & 0o7777)
}

#[cfg(not(unix))]
fn current_mode(_path: &Path) -> Option<u32> {
    None
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .map_err(|e| Error::io("setting permissions on", path, e))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::io::Read;
    use tempfile::TempDir;

    /// Runner that fails each instruction a configured number of times
    #[derive(Default)]
    struct MockRunner {
        failures: RefCell<HashMap<String, u32>>,
        calls: RefCell<Vec<String>>,
    }

    impl MockRunner {
        fn failing(name: &str, times: u32) -> Self {
            let runner = Self::default();
            runner.failures.borrow_mut().insert(name.to_string(), times);
            runner
        }
    }

    impl InstructionRunner for MockRunner {
        fn run(&self, instruction: &OneTimeInstruction) -> Result<CommandOutput> {
            self.calls.borrow_mut().push(instruction.name.clone());
            let mut failures = self.failures.borrow_mut();
            let remaining = failures.entry(instruction.name.clone()).or_insert(0);
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(CommandOutput {
                    stderr: b"not yet".to_vec(),
                    code: Some(1),
                    ..CommandOutput::default()
                });
            }
            Ok(CommandOutput {
                stdout: format!("{} ok", instruction.name).into_bytes(),
                success: true,
                code: Some(0),
                ..CommandOutput::default()
            })
        }
    }

    fn applier(runner: MockRunner) -> LocalApplier<MockRunner> {
        LocalApplier::with_runner(runner).attempt_delay(Duration::ZERO)
    }

    fn plan_with(names: &[&str]) -> Plan {
        let mut plan = Plan::new();
        for name in names {
            plan.one_time_instructions
                .push(OneTimeInstruction::command(*name, "true", Vec::<String>::new()));
        }
        plan
    }

    fn decode_output(data: &[u8]) -> BTreeMap<String, InstructionOutput> {
        let mut json = String::new();
        GzDecoder::new(data).read_to_string(&mut json).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn test_instructions_run_in_order() {
        let applier = applier(MockRunner::default());
        let output = applier
            .apply(&ApplyInput::full(plan_with(&["a", "b", "c"]), 3))
            .unwrap();

        assert_eq!(*applier.runner.calls.borrow(), vec!["a", "b", "c"]);
        assert_eq!(output.summary.instructions_run, 3);

        let outputs = decode_output(&output.output);
        assert_eq!(outputs["b"].stdout, "b ok");
    }

    #[test]
    fn test_instruction_retried_until_success() {
        let applier = applier(MockRunner::failing("b", 2));
        let output = applier
            .apply(&ApplyInput::full(plan_with(&["a", "b"]), 3))
            .unwrap();
        assert_eq!(output.summary.attempts, 4);
    }

    #[test]
    fn test_exhausted_attempts_stop_the_plan() {
        let applier = applier(MockRunner::failing("b", 5));
        let err = applier
            .apply(&ApplyInput::full(plan_with(&["a", "b", "c"]), 3))
            .unwrap_err();

        assert!(matches!(err, Error::InstructionFailed { attempts: 3, .. }));
        assert!(err.to_string().contains("not yet"));
        // c never starts
        assert!(!applier.runner.calls.borrow().contains(&"c".to_string()));
    }

    #[test]
    fn test_unsaved_output_is_dropped() {
        let mut plan = plan_with(&["quiet"]);
        plan.one_time_instructions[0].save_output = false;

        let output = applier(MockRunner::default())
            .apply(&ApplyInput::full(plan, 1))
            .unwrap();
        assert!(decode_output(&output.output).is_empty());
    }

    #[test]
    fn test_files_written_before_instructions() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/dir/config.yaml");

        let mut plan = plan_with(&["a"]);
        plan.files
            .push(File::new(path.to_string_lossy(), "key: value\n").with_permissions("600"));

        let output = applier(MockRunner::default())
            .apply(&ApplyInput::full(plan, 1))
            .unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "key: value\n");
        assert_eq!(output.summary.files_created, 1);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("token");
        let file = File::new(path.to_string_lossy(), "abc\n").with_permissions("600");

        assert_eq!(reconcile_file(&file).unwrap(), FileResult::Created);
        assert_eq!(reconcile_file(&file).unwrap(), FileResult::NoChange);

        let changed = File::new(path.to_string_lossy(), "def\n").with_permissions("600");
        assert_eq!(reconcile_file(&changed).unwrap(), FileResult::Modified);
        assert_eq!(fs::read_to_string(&path).unwrap(), "def\n");
    }

    #[cfg(unix)]
    #[test]
    fn test_reconcile_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let path = temp.path().join("registries.yaml");
        let file = File::new(path.to_string_lossy(), "mirrors: {}\n").with_permissions("0400");

        reconcile_file(&file).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o400);

        // read-only targets can still be replaced
        let changed = File::new(path.to_string_lossy(), "configs: {}\n").with_permissions("0400");
        assert_eq!(reconcile_file(&changed).unwrap(), FileResult::Modified);
    }

    #[test]
    fn test_bad_permissions_fail_the_apply() {
        let temp = TempDir::new().unwrap();
        let mut plan = Plan::new();
        plan.files.push(
            File::new(temp.path().join("x").to_string_lossy(), "x").with_permissions("abc"),
        );

        let err = applier(MockRunner::default())
            .apply(&ApplyInput::full(plan, 1))
            .unwrap_err();
        assert!(matches!(err, Error::Permissions { .. }));
    }
}

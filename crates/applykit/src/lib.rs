//! # applykit
//!
//! Node plans and the machinery that applies them.
//!
//! ## Core Concepts
//!
//! - **Plan**: files to write, one-time instructions to run in order, and
//!   named health probes
//! - **Applier**: reconciles files, then runs each instruction with a bounded
//!   number of attempts
//! - **Prober**: polls HTTP health checks until every probe is healthy
//!
//! ## Example
//!
//! ```no_run
//! use applykit::{Applier, ApplyInput, File, LocalApplier, OneTimeInstruction, Plan};
//!
//! let mut plan = Plan::new();
//! plan.files.push(File::new("/var/lib/nodestrap/token", "secret\n").with_permissions("600"));
//! plan.one_time_instructions.push(OneTimeInstruction::command(
//!     "hello",
//!     "echo",
//!     ["hello"],
//! ));
//!
//! let output = LocalApplier::new()
//!     .apply(&ApplyInput::full(plan, 3))
//!     .expect("apply failed");
//! println!("{} instruction(s) run", output.summary.instructions_run);
//! ```

pub mod apply;
pub mod error;
pub mod plan;
pub mod probe;
pub mod runner;

pub use apply::{
    Applier, ApplyInput, ApplyOutput, ApplySummary, FileResult, InstructionOutput, LocalApplier,
    reconcile_file,
};
pub use error::{Error, Result};
pub use plan::{DEFAULT_FILE_MODE, File, HttpGetAction, OneTimeInstruction, Plan, Probe};
pub use probe::{HealthCheck, HttpCheck, ProbeStatus, Prober, run_probes};
pub use runner::{CommandOutput, ContainerCli, InstructionRunner, ProcessRunner};

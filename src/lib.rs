//! exec-spawn: child processes with piped standard streams
//!
//! Forks a child, rewires its stdin/stdout/stderr to pipes owned by the
//! parent, executes the target program and returns a handle to observe and
//! control the child's lifecycle.
//!
//! # Modules
//!
//! - **execution**: pipe plumbing, argument/environment vectors, child
//!   bootstrap, process handle and the spawn engine
//! - **errors**: error type naming the failing syscall
//!
//! # Example
//!
//! ```ignore
//! use exec_spawn::{Exec, WaitOptions, WaitOutcome};
//!
//! let mut child = Exec::new("/bin/sh").argv(["sh", "-c", "exit 3"]).spawn()?;
//! if let WaitOutcome::Exited(report) = child.wait(WaitOptions::blocking())? {
//!     println!("Exit code: {}", report.code);
//! }
//! ```

pub mod errors;
pub mod execution;

// Public API
pub use errors::{ExecError, Result};
pub use execution::{
    ArgumentVector, EnvironmentVector, Exec, ExitReport, FileStdio, POSIX_ARG_MAX, ProcessHandle,
    ProcessState, ProcessStream, RawStdio, SpawnOptions, StdioWrap, StreamChunk, StreamStdio,
    Value, WaitOptions, WaitOutcome, spawn, spawn_with,
};

#[cfg(test)]
mod tests {
    use crate::Exec;

    #[test]
    fn test_module_imports() {
        // Verify core API is accessible
        let _builder = Exec::new("/bin/true");
    }
}

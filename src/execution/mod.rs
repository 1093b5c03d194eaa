//! Execution layer: spawning and controlling child processes
//!
//! This module forks children whose standard streams are rewired to pipes
//! owned by the parent, and exposes a handle to wait on, signal and tear
//! down each child.
//!
//! # Examples
//!
//! ```ignore
//! use exec_spawn::{Exec, WaitOptions};
//!
//! let mut child = Exec::new("/bin/echo").arg("hello").spawn()?;
//! let outcome = child.wait(WaitOptions::blocking())?;
//! ```

pub mod bootstrap;
pub mod pipes;
pub mod process;
pub mod spawn;
pub mod stdio;
pub mod stream;
pub mod vectors;

pub use pipes::{ChildEnds, ParentEnds, PipeSet};
pub use process::{
    ExitReport, ProcessControl, ProcessHandle, ProcessState, SystemControl, WaitOptions,
    WaitOutcome,
};
pub use spawn::{Exec, SpawnOptions, spawn, spawn_with};
pub use stdio::{FileStdio, RawStdio, StdioWrap};
pub use stream::{ProcessStream, StreamChunk, StreamStdio};
pub use vectors::{ArgumentVector, EnvironmentVector, POSIX_ARG_MAX, Value};

//! Error types for spawn and process-control operations

use nix::errno::Errno;
use std::io;
use thiserror::Error;

/// Result type for spawn operations
pub type Result<T> = std::result::Result<T, ExecError>;

/// Errors that can occur while spawning or controlling a child process.
///
/// OS failures always carry the name of the syscall that produced them.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("{syscall}: {errno}")]
    Syscall { syscall: &'static str, errno: Errno },

    #[error("{syscall}: no such process ({errno})")]
    NoSuchProcess { syscall: &'static str, errno: Errno },

    #[error("argument list too long: {count} arguments, limit is {limit}")]
    ArgumentListTooLong { count: usize, limit: usize },

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl ExecError {
    /// Build an error for a failed syscall, routing ECHILD/ESRCH to `NoSuchProcess`.
    pub fn from_errno(syscall: &'static str, errno: Errno) -> Self {
        match errno {
            Errno::ECHILD | Errno::ESRCH => ExecError::NoSuchProcess { syscall, errno },
            _ => ExecError::Syscall { syscall, errno },
        }
    }

    /// Error code of the underlying OS failure, if any
    pub fn errno(&self) -> Option<Errno> {
        match self {
            ExecError::Syscall { errno, .. } | ExecError::NoSuchProcess { errno, .. } => {
                Some(*errno)
            }
            ExecError::ArgumentListTooLong { .. } => Some(Errno::E2BIG),
            ExecError::Io(err) => err.raw_os_error().map(Errno::from_raw),
            _ => None,
        }
    }

    /// Name of the syscall that failed, if any
    pub fn syscall(&self) -> Option<&'static str> {
        match self {
            ExecError::Syscall { syscall, .. } | ExecError::NoSuchProcess { syscall, .. } => {
                Some(*syscall)
            }
            _ => None,
        }
    }

    pub fn is_no_such_process(&self) -> bool {
        matches!(self, ExecError::NoSuchProcess { .. })
    }
}

//! Representations of a child's standard streams
//!
//! The spawn engine hands the three parent-side descriptors to a
//! `StdioWrap` implementation, which decides how the caller sees them.

use crate::errors::Result;
use crate::execution::pipes::ParentEnds;
use std::fs::File;
use std::io::{BufReader, LineWriter};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// Wraps the parent ends of the stdio pipes for the caller
pub trait StdioWrap: Sized {
    fn wrap(ends: ParentEnds) -> Result<Self>;

    /// Raw stdin (write), stdout (read) and stderr (read) descriptors,
    /// -1 for a stream the representation has already closed
    fn raw_fds(&self) -> [RawFd; 3];
}

/// The three descriptors as-is
#[derive(Debug)]
pub struct RawStdio {
    pub stdin: OwnedFd,
    pub stdout: OwnedFd,
    pub stderr: OwnedFd,
}

impl StdioWrap for RawStdio {
    fn wrap(ends: ParentEnds) -> Result<Self> {
        Ok(Self {
            stdin: ends.stdin,
            stdout: ends.stdout,
            stderr: ends.stderr,
        })
    }

    fn raw_fds(&self) -> [RawFd; 3] {
        [
            self.stdin.as_raw_fd(),
            self.stdout.as_raw_fd(),
            self.stderr.as_raw_fd(),
        ]
    }
}

/// Buffered streams: line-buffered stdin, buffered stdout, unbuffered stderr.
///
/// The descriptors stay non-blocking, so reads may fail with `WouldBlock`
/// until the child has produced output.
#[derive(Debug)]
pub struct FileStdio {
    pub stdin: LineWriter<File>,
    pub stdout: BufReader<File>,
    pub stderr: File,
}

impl StdioWrap for FileStdio {
    fn wrap(ends: ParentEnds) -> Result<Self> {
        Ok(Self {
            stdin: LineWriter::new(File::from(ends.stdin)),
            stdout: BufReader::new(File::from(ends.stdout)),
            stderr: File::from(ends.stderr),
        })
    }

    fn raw_fds(&self) -> [RawFd; 3] {
        [
            self.stdin.get_ref().as_raw_fd(),
            self.stdout.get_ref().as_raw_fd(),
            self.stderr.as_raw_fd(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::pipes::PipeSet;
    use std::io::{Read, Write};

    #[test]
    fn raw_stdio_keeps_descriptor_numbers() {
        let set = PipeSet::create().unwrap();
        let expected = set.raw_fds();
        let (parent, _child) = set.split();
        let stdio = RawStdio::wrap(parent).unwrap();
        assert_eq!(stdio.raw_fds(), [expected[0], expected[1], expected[2]]);
    }

    #[test]
    fn file_stdio_flushes_stdin_per_line() {
        let (parent, child) = PipeSet::create().unwrap().split();
        let mut stdio = FileStdio::wrap(parent).unwrap();
        stdio.stdin.write_all(b"line\n").unwrap();

        let mut reader = File::from(child.stdin);
        let mut buf = [0u8; 5];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"line\n");
    }

    #[test]
    fn file_stdio_read_without_data_would_block() {
        let (parent, _child) = PipeSet::create().unwrap().split();
        let mut stdio = FileStdio::wrap(parent).unwrap();
        let mut buf = [0u8; 8];
        let err = stdio.stderr.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
    }
}

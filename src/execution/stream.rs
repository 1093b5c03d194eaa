//! Stream handling for process output
//!
//! `StreamStdio` drains the child's non-blocking stdout and stderr on two
//! reader threads and delivers the output as chunks over a channel.

use crate::errors::Result;
use crate::execution::pipes::ParentEnds;
use crate::execution::stdio::StdioWrap;
use log::debug;
use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, poll};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError, channel};
use std::thread;
use std::time::Duration;

/// Poll interval of the reader threads, in milliseconds
const POLL_INTERVAL_MS: u16 = 100;

/// A chunk of process output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// Data from stdout
    Stdout(Vec<u8>),
    /// Data from stderr
    Stderr(Vec<u8>),
    /// One of the streams reached end of file
    Closed { stderr: bool },
}

/// Receiving side of the output streams
pub struct ProcessStream {
    receiver: Receiver<StreamChunk>,
}

impl ProcessStream {
    /// Create new process stream handler
    pub fn new() -> (ProcessStreamWriter, Self) {
        let (tx, rx) = channel();
        (ProcessStreamWriter { tx }, ProcessStream { receiver: rx })
    }

    /// Receive the next chunk, `None` once every writer is gone
    pub fn recv(&self) -> Option<StreamChunk> {
        self.receiver.recv().ok()
    }

    /// Try to receive next chunk without blocking
    pub fn try_recv(&self) -> Option<StreamChunk> {
        match self.receiver.try_recv() {
            Ok(chunk) => Some(chunk),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<StreamChunk> {
        match self.receiver.recv_timeout(timeout) {
            Ok(chunk) => Some(chunk),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Blocking iterator over chunks, ending once both streams are closed
    pub fn iter(&self) -> impl Iterator<Item = StreamChunk> + '_ {
        self.receiver.iter()
    }
}

impl std::fmt::Debug for ProcessStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessStream").finish_non_exhaustive()
    }
}

/// Writer side for process streams
#[derive(Clone)]
pub struct ProcessStreamWriter {
    tx: Sender<StreamChunk>,
}

impl ProcessStreamWriter {
    pub fn send(&self, chunk: StreamChunk) -> bool {
        self.tx.send(chunk).is_ok()
    }
}

/// Spawn a reader thread for a non-blocking descriptor.
///
/// The thread exits at end of file, when the receiver is dropped, or when
/// `shutdown` is raised. On exit it clears `open`, closes the descriptor
/// and only then sends `Closed`.
pub fn spawn_fd_reader(
    fd: OwnedFd,
    is_stderr: bool,
    writer: ProcessStreamWriter,
    shutdown: Arc<AtomicBool>,
    open: Arc<AtomicBool>,
) -> Result<thread::JoinHandle<()>> {
    let name = if is_stderr { "stderr-reader" } else { "stdout-reader" };
    let handle = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let mut file = File::from(fd);
            let mut buffer = vec![0u8; 4096];

            while !shutdown.load(Ordering::Acquire) {
                let ready = {
                    let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLIN)];
                    poll(&mut fds, POLL_INTERVAL_MS)
                };
                match ready {
                    Ok(0) | Err(Errno::EINTR) => continue,
                    Ok(_) => {}
                    Err(e) => {
                        debug!("{}: poll failed: {}", name, e);
                        break;
                    }
                }

                match file.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        let data = buffer[..n].to_vec();
                        let chunk = if is_stderr {
                            StreamChunk::Stderr(data)
                        } else {
                            StreamChunk::Stdout(data)
                        };
                        if !writer.send(chunk) {
                            break;
                        }
                    }
                    Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => {}
                    Err(e) => {
                        debug!("{}: read failed: {}", name, e);
                        break;
                    }
                }
            }

            open.store(false, Ordering::Release);
            drop(file);
            writer.send(StreamChunk::Closed { stderr: is_stderr });
        })?;

    Ok(handle)
}

/// stdin as a `File`, stdout and stderr drained into a `ProcessStream`
///
/// `raw_fds` reports -1 for stdin once it is taken and for an output
/// stream once its reader has closed it.
pub struct StreamStdio {
    /// Write end of the child's stdin; drop or `take` it to send EOF
    pub stdin: Option<File>,
    pub stream: ProcessStream,
    output_fds: [RawFd; 2],
    open: [Arc<AtomicBool>; 2],
    shutdown: Arc<AtomicBool>,
    readers: Vec<thread::JoinHandle<()>>,
}

impl std::fmt::Debug for StreamStdio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamStdio")
            .field("stdin", &self.stdin)
            .field("raw_fds", &self.raw_fds())
            .finish_non_exhaustive()
    }
}

impl StdioWrap for StreamStdio {
    fn wrap(ends: ParentEnds) -> Result<Self> {
        let output_fds = [ends.stdout.as_raw_fd(), ends.stderr.as_raw_fd()];
        let (writer, stream) = ProcessStream::new();
        let shutdown = Arc::new(AtomicBool::new(false));
        let open = [Arc::new(AtomicBool::new(true)), Arc::new(AtomicBool::new(true))];

        let mut stdio = StreamStdio {
            stdin: Some(File::from(ends.stdin)),
            stream,
            output_fds,
            open: open.clone(),
            shutdown: Arc::clone(&shutdown),
            readers: Vec::with_capacity(2),
        };

        // On error `stdio` drops here, stopping any reader already started
        let [stdout_open, stderr_open] = open;
        let stdout = spawn_fd_reader(
            ends.stdout,
            false,
            writer.clone(),
            Arc::clone(&shutdown),
            stdout_open,
        )?;
        stdio.readers.push(stdout);
        let stderr = spawn_fd_reader(ends.stderr, true, writer, shutdown, stderr_open)?;
        stdio.readers.push(stderr);

        Ok(stdio)
    }

    fn raw_fds(&self) -> [RawFd; 3] {
        let live = |index: usize| {
            if self.open[index].load(Ordering::Acquire) {
                self.output_fds[index]
            } else {
                -1
            }
        };
        [
            self.stdin.as_ref().map_or(-1, |stdin| stdin.as_raw_fd()),
            live(0),
            live(1),
        ]
    }
}

impl StreamStdio {
    /// Drain both streams until end of file, returning (stdout, stderr)
    pub fn collect_output(&self) -> (Vec<u8>, Vec<u8>) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        for chunk in self.stream.iter() {
            match chunk {
                StreamChunk::Stdout(data) => stdout.extend_from_slice(&data),
                StreamChunk::Stderr(data) => stderr.extend_from_slice(&data),
                StreamChunk::Closed { .. } => {}
            }
        }
        (stdout, stderr)
    }
}

impl Drop for StreamStdio {
    fn drop(&mut self) {
        self.stdin.take();
        self.shutdown.store(true, Ordering::Release);
        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }
    }
}

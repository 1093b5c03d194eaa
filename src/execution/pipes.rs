//! Standard-stream pipe plumbing
//!
//! Allocates the three pipes that replace a child's stdin, stdout and stderr.
//! Every end is close-on-exec, and the ends kept by the parent are switched
//! to non-blocking mode so several children can be multiplexed.
//! All ends are `OwnedFd`, so an early return closes everything created so far.

use crate::errors::{ExecError, Result};
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

/// Pipe ends retained by the parent
#[derive(Debug)]
pub struct ParentEnds {
    /// Write end of the child's stdin
    pub stdin: OwnedFd,
    /// Read end of the child's stdout
    pub stdout: OwnedFd,
    /// Read end of the child's stderr
    pub stderr: OwnedFd,
}

/// Pipe ends duplicated onto descriptors 0/1/2 in the child
#[derive(Debug)]
pub struct ChildEnds {
    pub stdin: OwnedFd,
    pub stdout: OwnedFd,
    pub stderr: OwnedFd,
}

impl ChildEnds {
    pub(crate) fn raw_fds(&self) -> [RawFd; 3] {
        [
            self.stdin.as_raw_fd(),
            self.stdout.as_raw_fd(),
            self.stderr.as_raw_fd(),
        ]
    }
}

/// The six descriptors of the three standard-stream pipes
#[derive(Debug)]
pub struct PipeSet {
    pub parent: ParentEnds,
    pub child: ChildEnds,
}

impl PipeSet {
    /// Create the three pipes.
    ///
    /// On failure every descriptor created so far is closed and the first
    /// error is returned, naming `pipe` or `fcntl`.
    pub fn create() -> Result<Self> {
        let (stdin_read, stdin_write) = cloexec_pipe()?;
        let (stdout_read, stdout_write) = cloexec_pipe()?;
        let (stderr_read, stderr_write) = cloexec_pipe()?;

        let set = PipeSet {
            parent: ParentEnds {
                stdin: stdin_write,
                stdout: stdout_read,
                stderr: stderr_read,
            },
            child: ChildEnds {
                stdin: stdin_read,
                stdout: stdout_write,
                stderr: stderr_write,
            },
        };

        set_nonblocking(&set.parent.stdin)?;
        set_nonblocking(&set.parent.stdout)?;
        set_nonblocking(&set.parent.stderr)?;

        Ok(set)
    }

    /// Raw numbers of all six descriptors, parent ends first
    pub(crate) fn raw_fds(&self) -> [RawFd; 6] {
        let child = self.child.raw_fds();
        [
            self.parent.stdin.as_raw_fd(),
            self.parent.stdout.as_raw_fd(),
            self.parent.stderr.as_raw_fd(),
            child[0],
            child[1],
            child[2],
        ]
    }

    /// Split into parent and child halves
    pub fn split(self) -> (ParentEnds, ChildEnds) {
        (self.parent, self.child)
    }
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    // Both ends are close-on-exec from birth, so a concurrent fork never inherits them
    nix::unistd::pipe2(OFlag::O_CLOEXEC).map_err(|e| ExecError::from_errno("pipe", e))
}

// No pipe2 here; the window between pipe and fcntl remains
#[cfg(any(target_os = "macos", target_os = "ios"))]
fn cloexec_pipe() -> Result<(OwnedFd, OwnedFd)> {
    let (read, write) = nix::unistd::pipe().map_err(|e| ExecError::from_errno("pipe", e))?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(nix::fcntl::FdFlag::FD_CLOEXEC))
            .map_err(|e| ExecError::from_errno("fcntl", e))?;
    }
    Ok((read, write))
}

fn set_nonblocking(fd: &OwnedFd) -> Result<()> {
    let bits = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)
        .map_err(|e| ExecError::from_errno("fcntl", e))?;
    let flags = OFlag::from_bits_truncate(bits) | OFlag::O_NONBLOCK;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags))
        .map_err(|e| ExecError::from_errno("fcntl", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::serial_guard;
    use nix::errno::Errno;
    use nix::fcntl::FdFlag;

    fn fd_flags(fd: &OwnedFd) -> FdFlag {
        FdFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFD).unwrap())
    }

    fn status_flags(fd: &OwnedFd) -> OFlag {
        OFlag::from_bits_truncate(fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL).unwrap())
    }

    #[test]
    fn every_end_is_close_on_exec() {
        let set = PipeSet::create().unwrap();
        for fd in [
            &set.parent.stdin,
            &set.parent.stdout,
            &set.parent.stderr,
            &set.child.stdin,
            &set.child.stdout,
            &set.child.stderr,
        ] {
            assert!(fd_flags(fd).contains(FdFlag::FD_CLOEXEC));
        }
    }

    #[test]
    fn only_parent_ends_are_nonblocking() {
        let set = PipeSet::create().unwrap();
        assert!(status_flags(&set.parent.stdin).contains(OFlag::O_NONBLOCK));
        assert!(status_flags(&set.parent.stdout).contains(OFlag::O_NONBLOCK));
        assert!(status_flags(&set.parent.stderr).contains(OFlag::O_NONBLOCK));
        assert!(!status_flags(&set.child.stdin).contains(OFlag::O_NONBLOCK));
        assert!(!status_flags(&set.child.stdout).contains(OFlag::O_NONBLOCK));
        assert!(!status_flags(&set.child.stderr).contains(OFlag::O_NONBLOCK));
    }

    #[test]
    fn descriptors_are_distinct() {
        let set = PipeSet::create().unwrap();
        let mut fds = set.raw_fds().to_vec();
        fds.sort_unstable();
        fds.dedup();
        assert_eq!(fds.len(), 6);
    }

    #[test]
    fn parent_stdin_feeds_child_stdin() {
        use std::fs::File;
        use std::io::{Read, Write};

        let (parent, child) = PipeSet::create().unwrap().split();
        let mut writer = File::from(parent.stdin);
        writer.write_all(b"ping").unwrap();
        drop(writer);

        let mut reader = File::from(child.stdin);
        let mut buf = String::new();
        reader.read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "ping");
    }

    fn open_fd_count(below: RawFd) -> usize {
        (0..below)
            .filter(|&fd| unsafe { libc::fcntl(fd, libc::F_GETFD) } != -1)
            .count()
    }

    /// Room for one pipe only: the second pipe fails and the first is closed again
    #[test]
    fn exhausted_descriptor_table_leaks_nothing() {
        let _guard = serial_guard();

        unsafe {
            let pid = libc::fork();
            assert!(pid >= 0, "fork failed: {}", std::io::Error::last_os_error());

            if pid == 0 {
                // Child: no allocation from here on
                let null = libc::open(
                    b"/dev/null\0".as_ptr() as *const libc::c_char,
                    libc::O_RDONLY | libc::O_CLOEXEC,
                );
                if null == -1 {
                    libc::_exit(10);
                }

                let mut rlim = libc::rlimit {
                    rlim_cur: 0,
                    rlim_max: 0,
                };
                if libc::getrlimit(libc::RLIMIT_NOFILE, &mut rlim) != 0 {
                    libc::_exit(11);
                }
                let scan = rlim.rlim_cur.min(65536) as RawFd;
                let highest = (0..scan)
                    .rev()
                    .find(|&fd| libc::fcntl(fd, libc::F_GETFD) != -1)
                    .unwrap_or(null);

                // Descriptors highest+1 and highest+2 stay free, every hole below is filled
                rlim.rlim_cur = (highest + 3) as libc::rlim_t;
                if libc::setrlimit(libc::RLIMIT_NOFILE, &rlim) != 0 {
                    libc::_exit(12);
                }
                loop {
                    let fd = libc::dup(null);
                    if fd == -1 {
                        libc::_exit(13);
                    }
                    if fd > highest {
                        libc::close(fd);
                        break;
                    }
                }

                let before = open_fd_count(highest + 3);
                let code = match PipeSet::create() {
                    Err(ExecError::Syscall {
                        syscall: "pipe",
                        errno: Errno::EMFILE,
                    }) => 0,
                    Err(_) => 2,
                    Ok(_) => 3,
                };
                if code == 0 && open_fd_count(highest + 3) != before {
                    libc::_exit(4);
                }
                libc::_exit(code);
            }

            let mut status: i32 = 0;
            assert_eq!(libc::waitpid(pid, &mut status, 0), pid);
            assert!(libc::WIFEXITED(status));
            assert_eq!(
                libc::WEXITSTATUS(status),
                0,
                "2: wrong error, 3: no error, 4: descriptors leaked"
            );
        }
    }
}

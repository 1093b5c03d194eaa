//! Child-side setup between fork and exec
//!
//! Everything here runs in the forked child. Only raw libc calls are made
//! on data prepared before fork: no allocation, no locks, no logging.
//! Any failure writes a static message to the (redirected) stderr and
//! terminates the child with the failing errno as its exit status.

use crate::execution::vectors::{ArgumentVector, EnvironmentVector};
use nix::errno::Errno;
use std::ffi::CStr;
use std::os::fd::RawFd;
use std::os::raw::{c_char, c_int};

extern "C" {
    static mut environ: *const *const c_char;
}

/// Longest variable name the child can unset
const ENV_NAME_MAX: usize = 4096;

const UNSETENV_FAILED: &[u8] = b"exec-spawn: unsetenv() failed\n";
const PUTENV_FAILED: &[u8] = b"exec-spawn: putenv() failed\n";

/// Everything the child needs, prepared by the parent before fork
#[derive(Debug)]
pub struct ChildPlan<'a> {
    pub path: &'a CStr,
    pub argv: &'a ArgumentVector,
    pub envp: Option<&'a EnvironmentVector>,
    pub cwd: Option<&'a CStr>,
    pub search: bool,
    /// Parent ends (stdin, stdout, stderr) followed by child ends
    pub fds: [RawFd; 6],
}

/// Rewire stdio, apply the plan and exec the target program.
///
/// # Safety
///
/// Must only be called in the child branch of `fork`, with every pointer
/// in `plan` still valid.
pub unsafe fn exec_child(plan: &ChildPlan<'_>) -> ! {
    if let Err(errno) = redirect_stdio(&plan.fds) {
        die(errno, b"exec-spawn: failed to redirect stdio (dup2)\n");
    }

    if let Some(cwd) = plan.cwd {
        if libc::chdir(cwd.as_ptr()) == -1 {
            die(Errno::last_raw(), b"exec-spawn: chdir() failed\n");
        }
    }

    // The Rust runtime ignores SIGPIPE and ignored dispositions survive exec
    if libc::signal(libc::SIGPIPE, libc::SIG_DFL) == libc::SIG_ERR {
        die(Errno::last_raw(), b"exec-spawn: signal() failed\n");
    }

    let path = plan.path.as_ptr();
    let argv = plan.argv.as_ptr();

    match (plan.search, plan.envp) {
        (true, envp) => {
            if let Some(envp) = envp {
                if let Err((errno, msg)) = replace_environment(envp) {
                    die(errno, msg);
                }
            }
            libc::execvp(path, argv);
            die(Errno::last_raw(), b"exec-spawn: execvp() failed\n");
        }
        (false, Some(envp)) => {
            libc::execve(path, argv, envp.as_ptr());
            die(Errno::last_raw(), b"exec-spawn: execve() failed\n");
        }
        (false, None) => {
            libc::execv(path, argv);
            die(Errno::last_raw(), b"exec-spawn: execv() failed\n");
        }
    }
}

/// Duplicate the child ends onto 0/1/2, then close all six originals.
///
/// A child end that already sits on 0, 1 or 2 (the parent started with a
/// standard stream closed) is first moved above stderr, so no dup2 can
/// overwrite an end that has not been duplicated yet. Descriptors at or
/// below stderr are never closed: after the three dup2 calls they are the
/// child's standard streams.
unsafe fn redirect_stdio(fds: &[RawFd; 6]) -> Result<(), c_int> {
    let mut ends = [fds[3], fds[4], fds[5]];
    let mut result = Ok(());

    for end in ends.iter_mut() {
        if *end <= libc::STDERR_FILENO {
            let moved = libc::fcntl(*end, libc::F_DUPFD_CLOEXEC, libc::STDERR_FILENO + 1);
            if moved == -1 {
                result = Err(Errno::last_raw());
                break;
            }
            *end = moved;
        }
    }

    if result.is_ok() {
        let targets = [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO];
        for (&end, target) in ends.iter().zip(targets) {
            if libc::dup2(end, target) == -1 {
                result = Err(Errno::last_raw());
                break;
            }
        }
    }

    for &fd in fds[..3].iter().chain(&ends) {
        if fd > libc::STDERR_FILENO {
            libc::close(fd);
        }
    }

    result
}

/// Unset every inherited variable, then install the supplied ones.
unsafe fn replace_environment(envp: &EnvironmentVector) -> Result<(), (c_int, &'static [u8])> {
    let mut name = [0 as c_char; ENV_NAME_MAX];
    let mut index = 0;

    loop {
        let env = environ;
        if env.is_null() {
            break;
        }
        let entry = *env.add(index);
        if entry.is_null() {
            break;
        }

        let bytes = CStr::from_ptr(entry).to_bytes();
        let len = match bytes.iter().position(|&b| b == b'=') {
            Some(len) if len > 0 => len,
            // Nameless or malformed entries cannot be unset by name
            _ => {
                index += 1;
                continue;
            }
        };
        if len >= ENV_NAME_MAX {
            return Err((libc::ENAMETOOLONG, UNSETENV_FAILED));
        }

        for (dst, &src) in name.iter_mut().zip(&bytes[..len]) {
            *dst = src as c_char;
        }
        name[len] = 0;

        if libc::unsetenv(name.as_ptr()) != 0 {
            return Err((Errno::last_raw(), UNSETENV_FAILED));
        }
        // unsetenv shifts later entries down; only advance if nothing moved
        if *environ.add(index) == entry {
            index += 1;
        }
    }

    for &entry in envp.entry_ptrs() {
        if libc::putenv(entry as *mut c_char) != 0 {
            return Err((Errno::last_raw(), PUTENV_FAILED));
        }
    }

    Ok(())
}

unsafe fn die(errno: c_int, msg: &[u8]) -> ! {
    libc::write(
        libc::STDERR_FILENO,
        msg.as_ptr() as *const libc::c_void,
        msg.len(),
    );
    // A failed child must never report success
    libc::_exit(if errno == 0 { 1 } else { errno })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::pipes::PipeSet;
    use crate::test_support::serial_guard;
    use std::fs::File;
    use std::io::Read;
    use std::os::fd::OwnedFd;

    fn read_all(fd: OwnedFd) -> Vec<u8> {
        let mut out = Vec::new();
        File::from(fd).read_to_end(&mut out).unwrap();
        out
    }

    /// The stderr end sitting on fd 1 must not be overwritten by the stdout dup2
    #[test]
    fn child_end_on_standard_descriptor_is_moved_first() {
        let _guard = serial_guard();
        let set = PipeSet::create().unwrap();
        let fds = set.raw_fds();
        let (parent, child) = set.split();

        unsafe {
            let pid = libc::fork();
            assert!(pid >= 0, "fork failed: {}", std::io::Error::last_os_error());

            if pid == 0 {
                // Child: as if the parent had started with stdout closed
                if libc::dup2(fds[5], libc::STDOUT_FILENO) == -1 {
                    libc::_exit(10);
                }
                let shuffled = [fds[0], fds[1], fds[2], fds[3], fds[4], libc::STDOUT_FILENO];
                if redirect_stdio(&shuffled).is_err() {
                    libc::_exit(11);
                }
                libc::write(libc::STDOUT_FILENO, b"out".as_ptr() as *const libc::c_void, 3);
                libc::write(libc::STDERR_FILENO, b"err".as_ptr() as *const libc::c_void, 3);
                libc::_exit(0);
            }

            drop(child);
            let mut status: i32 = 0;
            assert_eq!(libc::waitpid(pid, &mut status, 0), pid);
            assert!(libc::WIFEXITED(status));
            assert_eq!(libc::WEXITSTATUS(status), 0);
        }

        assert_eq!(read_all(parent.stdout), b"out");
        assert_eq!(read_all(parent.stderr), b"err");
    }
}

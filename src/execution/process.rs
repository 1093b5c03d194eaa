//! Parent-side process handle
//!
//! A `ProcessHandle` owns the child's pid and the parent ends of its three
//! standard-stream pipes. The pid is cleared exactly once, when a wait
//! observes termination or the kernel reports the child is gone; from then
//! on the handle never touches the OS again, so a recycled pid can never
//! be waited on or signalled by mistake.

use crate::errors::{ExecError, Result};
use crate::execution::stdio::{RawStdio, StdioWrap};
use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use std::os::fd::RawFd;

/// The syscalls a handle issues against its child
#[cfg_attr(test, mockall::automock)]
pub trait ProcessControl {
    fn waitpid(&self, pid: Pid, flags: Option<WaitPidFlag>) -> nix::Result<WaitStatus>;
    fn kill(&self, pid: Pid, signal: Signal) -> nix::Result<()>;
}

/// `ProcessControl` backed by the real syscalls
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemControl;

impl ProcessControl for SystemControl {
    fn waitpid(&self, pid: Pid, flags: Option<WaitPidFlag>) -> nix::Result<WaitStatus> {
        waitpid(pid, flags)
    }

    fn kill(&self, pid: Pid, signal: Signal) -> nix::Result<()> {
        kill(pid, signal)
    }
}

/// Which state changes a wait reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitOptions {
    /// Return immediately if no state change is pending (`WNOHANG`)
    pub no_hang: bool,
    /// Report job-control stops (`WUNTRACED`)
    pub report_stopped: bool,
    /// Report resumption after a stop (`WCONTINUED`)
    pub report_continued: bool,
}

impl WaitOptions {
    /// Block until the child terminates
    pub fn blocking() -> Self {
        Self::default()
    }

    pub fn nohang(mut self) -> Self {
        self.no_hang = true;
        self
    }

    pub fn untraced(mut self) -> Self {
        self.report_stopped = true;
        self
    }

    pub fn continued(mut self) -> Self {
        self.report_continued = true;
        self
    }

    /// Parse option names: `nohang`, `untraced`, `continued`
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names
            .into_iter()
            .try_fold(Self::default(), |options, name| match name.as_ref() {
                "nohang" => Ok(options.nohang()),
                "untraced" => Ok(options.untraced()),
                "continued" => Ok(options.continued()),
                other => Err(ExecError::InvalidArgument(format!(
                    "unknown wait option: {:?}",
                    other
                ))),
            })
    }

    pub fn to_flags(self) -> Option<WaitPidFlag> {
        let mut flags = WaitPidFlag::empty();
        if self.no_hang {
            flags |= WaitPidFlag::WNOHANG;
        }
        if self.report_stopped {
            flags |= WaitPidFlag::WUNTRACED;
        }
        if self.report_continued {
            flags |= WaitPidFlag::WCONTINUED;
        }
        Some(flags)
    }
}

/// Terminal status of a child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    pub pid: Pid,
    /// Exit status, or 128 + signal number for signal deaths
    pub code: i32,
    /// Signal that killed the child
    pub signal: Option<Signal>,
    pub core_dumped: bool,
}

impl ExitReport {
    pub fn success(&self) -> bool {
        self.code == 0 && self.signal.is_none()
    }
}

/// Result of a single wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// No state change yet (only with `no_hang`)
    StillRunning,
    Stopped { pid: Pid, signal: Signal },
    Continued { pid: Pid },
    Exited(ExitReport),
}

/// Lifecycle state as last observed by the handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Stopped(Signal),
    Continued,
    Exited(ExitReport),
    /// Someone else reaped the child
    ReapedElsewhere,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Exited(_) | ProcessState::ReapedElsewhere)
    }
}

/// Handle to a spawned child process
pub struct ProcessHandle<S = RawStdio> {
    pid: Option<Pid>,
    state: ProcessState,
    stdio: Option<S>,
    control: Box<dyn ProcessControl + Send>,
}

impl<S> std::fmt::Debug for ProcessHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("state", &self.state)
            .field("stdio_open", &self.stdio.is_some())
            .finish()
    }
}

impl<S> ProcessHandle<S> {
    pub(crate) fn new(pid: Pid, stdio: S) -> Self {
        Self::from_parts(pid, Some(stdio), Box::new(SystemControl))
    }

    pub(crate) fn from_parts(
        pid: Pid,
        stdio: Option<S>,
        control: Box<dyn ProcessControl + Send>,
    ) -> Self {
        Self {
            pid: Some(pid),
            state: ProcessState::Running,
            stdio,
            control,
        }
    }

    /// Child pid, `None` once the child is known to be reaped
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Retained standard streams, `None` after `close`
    pub fn stdio(&self) -> Option<&S> {
        self.stdio.as_ref()
    }

    pub fn stdio_mut(&mut self) -> Option<&mut S> {
        self.stdio.as_mut()
    }

    /// Move the streams out of the handle; the caller then owns their release
    pub fn take_stdio(&mut self) -> Option<S> {
        self.stdio.take()
    }

    /// Release the retained streams. Returns `false` if they were already released.
    pub fn close(&mut self) -> bool {
        self.stdio.take().is_some()
    }

    /// Wait for a state change of the child.
    ///
    /// Once the handle is terminal this fails with `NoSuchProcess` without
    /// issuing a syscall.
    pub fn wait(&mut self, options: WaitOptions) -> Result<WaitOutcome> {
        let Some(pid) = self.pid else {
            return Err(ExecError::NoSuchProcess {
                syscall: "waitpid",
                errno: Errno::ECHILD,
            });
        };

        let status = match self.control.waitpid(pid, options.to_flags()) {
            Ok(status) => status,
            Err(Errno::ECHILD) => {
                self.mark_reaped_elsewhere(pid);
                return Err(ExecError::from_errno("waitpid", Errno::ECHILD));
            }
            Err(e) => return Err(ExecError::from_errno("waitpid", e)),
        };

        let outcome = match status {
            WaitStatus::StillAlive => WaitOutcome::StillRunning,
            WaitStatus::Stopped(pid, signal) => self.stopped(pid, signal),
            #[cfg(any(target_os = "android", target_os = "linux"))]
            WaitStatus::PtraceEvent(pid, signal, _) => self.stopped(pid, signal),
            #[cfg(any(target_os = "android", target_os = "linux"))]
            WaitStatus::PtraceSyscall(pid) => self.stopped(pid, Signal::SIGTRAP),
            WaitStatus::Continued(pid) => {
                self.state = ProcessState::Continued;
                WaitOutcome::Continued { pid }
            }
            WaitStatus::Exited(pid, code) => self.exited(ExitReport {
                pid,
                code,
                signal: None,
                core_dumped: false,
            }),
            WaitStatus::Signaled(pid, signal, core_dumped) => self.exited(ExitReport {
                pid,
                code: 128 + signal as i32,
                signal: Some(signal),
                core_dumped,
            }),
        };

        Ok(outcome)
    }

    /// Send `signal` to the child.
    ///
    /// Returns `Ok(false)` without a syscall when the handle is terminal,
    /// and `Ok(false)` when the kernel reports the child gone (the handle
    /// becomes terminal).
    pub fn signal(&mut self, signal: Signal) -> Result<bool> {
        let Some(pid) = self.pid else {
            return Ok(false);
        };

        match self.control.kill(pid, signal) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => {
                self.mark_reaped_elsewhere(pid);
                Ok(false)
            }
            Err(e) => Err(ExecError::from_errno("kill", e)),
        }
    }

    /// `signal` with a raw signal number
    pub fn signal_raw(&mut self, signo: i32) -> Result<bool> {
        let signal = Signal::try_from(signo)
            .map_err(|_| ExecError::InvalidArgument(format!("unknown signal: {}", signo)))?;
        self.signal(signal)
    }

    /// Send SIGTERM
    pub fn terminate(&mut self) -> Result<bool> {
        self.signal(Signal::SIGTERM)
    }

    fn stopped(&mut self, pid: Pid, signal: Signal) -> WaitOutcome {
        debug!("process {} stopped by {}", pid, signal);
        self.state = ProcessState::Stopped(signal);
        WaitOutcome::Stopped { pid, signal }
    }

    fn exited(&mut self, report: ExitReport) -> WaitOutcome {
        debug!(
            "process {} exited with code {} (signal: {:?})",
            report.pid, report.code, report.signal
        );
        self.pid = None;
        self.state = ProcessState::Exited(report);
        WaitOutcome::Exited(report)
    }

    fn mark_reaped_elsewhere(&mut self, pid: Pid) {
        debug!("process {} was reaped elsewhere", pid);
        self.pid = None;
        self.state = ProcessState::ReapedElsewhere;
    }
}

impl<S: StdioWrap> ProcessHandle<S> {
    /// Descriptors of the child's stdin (write end), stdout and stderr (read ends)
    pub fn stdio_fds(&self) -> Option<[RawFd; 3]> {
        self.stdio.as_ref().map(StdioWrap::raw_fds)
    }
}

impl<S> Drop for ProcessHandle<S> {
    fn drop(&mut self) {
        let Some(pid) = self.pid.take() else {
            return;
        };

        let flags = Some(WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED);
        match self.control.waitpid(pid, flags) {
            Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) | Err(Errno::ECHILD) => {
                return;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("waitpid({}) during teardown failed: {}", pid, e);
                return;
            }
        }

        if let Err(e) = self.control.kill(pid, Signal::SIGKILL) {
            if e != Errno::ESRCH {
                warn!("kill({}) during teardown failed: {}", pid, e);
            }
            return;
        }

        match self.control.waitpid(pid, flags) {
            Ok(WaitStatus::StillAlive) => {
                debug!("process {} killed during teardown but not yet reaped", pid)
            }
            Ok(_) | Err(Errno::ECHILD) => {}
            Err(e) => warn!("waitpid({}) during teardown failed: {}", pid, e),
        }
    }
}

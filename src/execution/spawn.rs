//! Spawning: pipes, fork, child bootstrap, handle
//!
//! All argument marshaling happens before any descriptor is allocated, and
//! the child-side pipe ends are closed in the parent before `spawn` returns.

use crate::errors::{ExecError, Result};
use crate::execution::bootstrap::{ChildPlan, exec_child};
use crate::execution::pipes::PipeSet;
use crate::execution::process::ProcessHandle;
use crate::execution::stdio::{RawStdio, StdioWrap};
use crate::execution::vectors::{ArgumentVector, EnvironmentVector, Value, to_cstring};
use log::{debug, warn};
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::waitpid;
use nix::unistd::{ForkResult, fork};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

/// What to spawn and how
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnOptions {
    /// Executable path, or a bare name when `search` is set
    pub path: String,
    /// Complete argument vector; `[path]` when absent or empty
    pub argv: Option<Vec<Value>>,
    /// Replacement environment; the parent's is inherited when absent
    pub env: Option<BTreeMap<String, Value>>,
    /// Resolve `path` against PATH
    pub search: bool,
    /// Working directory for the child
    pub cwd: Option<PathBuf>,
}

impl SpawnOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn spawn(&self) -> Result<ProcessHandle<RawStdio>> {
        spawn(self)
    }
}

/// Spawn a child with raw descriptors for its standard streams
pub fn spawn(options: &SpawnOptions) -> Result<ProcessHandle<RawStdio>> {
    spawn_with(options)
}

/// Spawn a child, wrapping its standard streams with `S`
pub fn spawn_with<S: StdioWrap>(options: &SpawnOptions) -> Result<ProcessHandle<S>> {
    if options.path.is_empty() {
        return Err(ExecError::InvalidArgument("path must not be empty".to_string()));
    }

    let path = to_cstring(&options.path, "path")?;
    let argv = match &options.argv {
        Some(args) => ArgumentVector::with_args(&options.path, args.iter().cloned())?,
        None => ArgumentVector::new(&options.path)?,
    };
    let envp = options
        .env
        .as_ref()
        .map(|env| EnvironmentVector::new(env.iter().map(|(k, v)| (k.clone(), v.clone()))))
        .transpose()?;
    let cwd = options
        .cwd
        .as_deref()
        .map(|dir| {
            CString::new(dir.as_os_str().as_bytes()).map_err(|_| {
                ExecError::InvalidArgument(format!("cwd contains a nul byte: {:?}", dir))
            })
        })
        .transpose()?;

    let pipes = PipeSet::create()?;
    let plan = ChildPlan {
        path: &path,
        argv: &argv,
        envp: envp.as_ref(),
        cwd: cwd.as_deref(),
        search: options.search,
        fds: pipes.raw_fds(),
    };

    // SAFETY: the child branch only runs `exec_child`, which restricts itself
    // to raw syscalls on data prepared above and never returns.
    match unsafe { fork() } {
        Ok(ForkResult::Child) => unsafe { exec_child(&plan) },
        Ok(ForkResult::Parent { child }) => {
            let (parent_ends, child_ends) = pipes.split();
            drop(child_ends);
            debug!(
                "spawned {} as pid {} (search: {}, env: {}, cwd: {:?})",
                options.path,
                child,
                options.search,
                envp.is_some(),
                options.cwd
            );

            match S::wrap(parent_ends) {
                Ok(stdio) => Ok(ProcessHandle::new(child, stdio)),
                Err(err) => {
                    warn!("wrapping stdio of pid {} failed: {}", child, err);
                    if let Err(e) = kill(child, Signal::SIGKILL) {
                        warn!("kill({}) after failed spawn failed: {}", child, e);
                    }
                    if let Err(e) = waitpid(child, None) {
                        warn!("waitpid({}) after failed spawn failed: {}", child, e);
                    }
                    Err(err)
                }
            }
        }
        Err(e) => Err(ExecError::from_errno("fork", e)),
    }
}

/// Builder for spawning a process
#[derive(Debug, Clone)]
pub struct Exec {
    options: SpawnOptions,
}

impl Exec {
    /// Create new builder for `path`
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            options: SpawnOptions::new(path),
        }
    }

    /// Append an argument after argv[0] (which defaults to the path)
    pub fn arg(mut self, arg: impl Into<Value>) -> Self {
        let path = &self.options.path;
        self.options
            .argv
            .get_or_insert_with(|| vec![Value::from(path.as_str())])
            .push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, V>(self, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        args.into_iter().fold(self, |exec, arg| exec.arg(arg))
    }

    /// Replace the whole argument vector, argv[0] included
    pub fn argv<I, V>(mut self, argv: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.options.argv = Some(argv.into_iter().map(Into::into).collect());
        self
    }

    /// Set a variable in the replacement environment
    pub fn env(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options
            .env
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn envs<I, K, V>(self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        vars.into_iter()
            .fold(self, |exec, (name, value)| exec.env(name, value))
    }

    /// Start the child with an empty environment
    pub fn env_clear(mut self) -> Self {
        self.options.env = Some(BTreeMap::new());
        self
    }

    /// Resolve the path against PATH
    pub fn search(mut self, search: bool) -> Self {
        self.options.search = search;
        self
    }

    /// Set the child's working directory
    pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
        self.options.cwd = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn options(&self) -> &SpawnOptions {
        &self.options
    }

    pub fn spawn(&self) -> Result<ProcessHandle<RawStdio>> {
        spawn(&self.options)
    }

    pub fn spawn_with<S: StdioWrap>(&self) -> Result<ProcessHandle<S>> {
        spawn_with(&self.options)
    }
}

impl From<SpawnOptions> for Exec {
    fn from(options: SpawnOptions) -> Self {
        Self { options }
    }
}

//! Renderer process bootstrap.

use std::{
    collections::HashMap,
    fmt, io,
    os::unix::process::{CommandExt as _, ExitStatusExt as _},
    path::PathBuf,
    process::{Child, Command},
    sync::Arc,
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use lumen_view_api::{
    config::{RENDERER_FD_VAR, RENDERER_VERSION_VAR, VERSION_MISMATCH_EXIT_CODE},
    ipc::{RemoteEndpoint, RendererChannel},
};

/// Starts a renderer connected to a transferred endpoint.
pub trait RendererLauncher: Send + Sync {
    /// Start a renderer that owns the `remote` endpoint.
    fn launch(&self, remote: RemoteEndpoint) -> io::Result<RendererProcess>;
}

/// Launches a renderer executable.
///
/// The endpoint is inherited by the child process, its descriptor number is set in the
/// [`RENDERER_FD_VAR`] env var. The executable must call `lumen_view_api::renderer::connect_renderer`
/// at startup.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    exe: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
}
impl CommandLauncher {
    /// New launcher for the renderer `exe`.
    pub fn new(exe: impl Into<PathBuf>) -> Self {
        Self {
            exe: exe.into(),
            args: vec![],
            env: HashMap::new(),
        }
    }

    /// Add an argument for the renderer process.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Set an extra env var for the renderer process.
    pub fn env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Renderer executable.
    pub fn exe(&self) -> &PathBuf {
        &self.exe
    }
}
impl RendererLauncher for CommandLauncher {
    fn launch(&self, remote: RemoteEndpoint) -> io::Result<RendererProcess> {
        let _span = tracing::trace_span!("launch_renderer_process").entered();

        let fd = remote.as_raw_fd();
        let mut cmd = Command::new(&self.exe);
        cmd.args(&self.args)
            .envs(&self.env)
            .env(RENDERER_FD_VAR, fd.to_string())
            .env(RENDERER_VERSION_VAR, lumen_view_api::VERSION)
            .env("RUST_BACKTRACE", "full");

        // SAFETY: only calls async-signal-safe `fcntl` between fork and exec.
        unsafe {
            cmd.pre_exec(move || {
                let flags = libc::fcntl(fd, libc::F_GETFD);
                if flags < 0 {
                    return Err(io::Error::last_os_error());
                }
                if libc::fcntl(fd, libc::F_SETFD, flags & !libc::FD_CLOEXEC) < 0 {
                    return Err(io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let child = cmd.spawn()?;
        tracing::debug!(target: "renderer_respawn", "renderer process {} started", child.id());

        // the child has its own copy now.
        drop(remote);

        Ok(RendererProcess::from_child(child))
    }
}

/// Runs renderers in a thread of the current process.
///
/// Useful for tests and debugging, a crash of the renderer is a panic in the thread.
#[derive(Clone)]
pub struct ThreadLauncher {
    run: Arc<dyn Fn(RendererChannel) + Send + Sync>,
}
impl ThreadLauncher {
    /// New launcher, the `run` closure is called in a new thread for each launch.
    pub fn new(run: impl Fn(RendererChannel) + Send + Sync + 'static) -> Self {
        Self { run: Arc::new(run) }
    }
}
impl fmt::Debug for ThreadLauncher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadLauncher").finish_non_exhaustive()
    }
}
impl RendererLauncher for ThreadLauncher {
    fn launch(&self, remote: RemoteEndpoint) -> io::Result<RendererProcess> {
        let channel = RendererChannel::from_remote(remote)?;
        let run = self.run.clone();
        let handle = thread::Builder::new()
            .name("lumen-renderer".into())
            .spawn(move || run(channel))?;
        Ok(RendererProcess::from_thread(handle))
    }
}

/// How a renderer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererExit {
    /// Process exited with a code.
    Code(i32),
    /// Process was terminated by a signal.
    Signal(i32),
    /// Renderer thread returned.
    Returned,
    /// Renderer thread panicked.
    Panicked,
}
impl RendererExit {
    /// If the renderer exited because it was built with a different API version.
    pub fn is_version_mismatch(self) -> bool {
        self == RendererExit::Code(VERSION_MISMATCH_EXIT_CODE)
    }
}
impl fmt::Display for RendererExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RendererExit::Code(c) => write!(f, "exit code: {c:#X}"),
            RendererExit::Signal(s) => write!(f, "signal: {s}"),
            RendererExit::Returned => write!(f, "thread returned"),
            RendererExit::Panicked => write!(f, "thread panicked"),
        }
    }
}

enum ProcessInner {
    Child(Child),
    Thread(Option<JoinHandle<()>>),
}

/// A running renderer.
pub struct RendererProcess {
    inner: ProcessInner,
}
impl RendererProcess {
    /// From a child process.
    pub fn from_child(child: Child) -> Self {
        Self {
            inner: ProcessInner::Child(child),
        }
    }

    /// From a thread.
    pub fn from_thread(handle: JoinHandle<()>) -> Self {
        Self {
            inner: ProcessInner::Thread(Some(handle)),
        }
    }

    /// OS process id, `None` for thread renderers.
    pub fn id(&self) -> Option<u32> {
        match &self.inner {
            ProcessInner::Child(c) => Some(c.id()),
            ProcessInner::Thread(_) => None,
        }
    }

    /// If the renderer has ended.
    pub fn has_exited(&mut self) -> bool {
        match &mut self.inner {
            ProcessInner::Child(c) => matches!(c.try_wait(), Ok(Some(_))),
            ProcessInner::Thread(t) => t.as_ref().map(|t| t.is_finished()).unwrap_or(true),
        }
    }

    /// Force the process to end, does nothing for thread renderers.
    pub fn kill(&mut self) -> io::Result<()> {
        match &mut self.inner {
            ProcessInner::Child(c) => c.kill(),
            ProcessInner::Thread(_) => Ok(()),
        }
    }

    /// Block until the renderer ends.
    pub fn wait(&mut self) -> io::Result<RendererExit> {
        match &mut self.inner {
            ProcessInner::Child(c) => {
                let status = c.wait()?;
                Ok(match status.code() {
                    Some(c) => RendererExit::Code(c),
                    None => RendererExit::Signal(status.signal().unwrap_or(0)),
                })
            }
            ProcessInner::Thread(t) => match t.take() {
                Some(t) => match t.join() {
                    Ok(()) => Ok(RendererExit::Returned),
                    Err(_) => Ok(RendererExit::Panicked),
                },
                None => Ok(RendererExit::Returned),
            },
        }
    }

    /// Wait for the renderer to end, kills it if it is still running after the `grace` time.
    ///
    /// The exit status is logged using the `renderer_respawn` target.
    pub fn reap(mut self, grace: Duration) -> Option<RendererExit> {
        let mut killed_by_us = false;
        if !self.has_exited() {
            let deadline = Instant::now() + grace;
            while !self.has_exited() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            if !self.has_exited() && self.id().is_some() {
                killed_by_us = true;
                if let Err(e) = self.kill() {
                    tracing::error!(target: "renderer_respawn", "failed to kill renderer, {e}");
                }
            }
        }

        match self.wait() {
            Ok(exit) => {
                if killed_by_us {
                    tracing::info!(target: "renderer_respawn", "renderer killed");
                } else {
                    tracing::info!(target: "renderer_respawn", "renderer ended, {exit}");
                }
                if exit.is_version_mismatch() {
                    tracing::error!(
                        target: "renderer_respawn",
                        "renderer API version mismatch, the renderer build must use the same exact version as the UI process"
                    );
                }
                Some(exit)
            }
            Err(e) => {
                tracing::error!(target: "renderer_respawn", "renderer could not be reaped, will abandon it running, {e}");
                None
            }
        }
    }
}
impl fmt::Debug for RendererProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ProcessInner::Child(c) => write!(f, "RendererProcess(pid {})", c.id()),
            ProcessInner::Thread(_) => write!(f, "RendererProcess(thread)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_view_api::Channel;

    #[test]
    fn thread_renderer_exit() {
        let mut channel = Channel::establish();
        let process = channel
            .transfer_remote_endpoint(|remote| ThreadLauncher::new(drop).launch(remote))
            .unwrap();
        assert_eq!(process.id(), None);
        assert_eq!(process.reap(Duration::from_secs(5)), Some(RendererExit::Returned));
    }

    #[test]
    fn thread_renderer_panic() {
        let mut channel = Channel::establish();
        let process = channel
            .transfer_remote_endpoint(|remote| ThreadLauncher::new(|_| panic!("test renderer panic")).launch(remote))
            .unwrap();
        assert_eq!(process.reap(Duration::from_secs(5)), Some(RendererExit::Panicked));
    }

    #[test]
    fn child_exit_code() {
        let child = Command::new("sh").args(["-c", "exit 3"]).spawn().unwrap();
        let process = RendererProcess::from_child(child);
        assert_eq!(process.reap(Duration::from_secs(5)), Some(RendererExit::Code(3)));
    }

    #[test]
    fn child_killed_after_grace() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let process = RendererProcess::from_child(child);
        assert_eq!(process.reap(Duration::from_millis(50)), Some(RendererExit::Signal(libc::SIGKILL)));
    }

    #[test]
    fn command_launcher_passes_descriptor() {
        let script = format!(
            "[ -e /proc/$$/fd/${RENDERER_FD_VAR} ] && [ \"${RENDERER_VERSION_VAR}\" = {} ] && [ \"$LUMEN_TEST\" = 1 ]",
            lumen_view_api::VERSION
        );
        let launcher = CommandLauncher::new("sh").arg("-c").arg(script).env("LUMEN_TEST", "1");

        let mut channel = Channel::establish();
        let process = channel.transfer_remote_endpoint(|remote| launcher.launch(remote)).unwrap();
        assert!(process.id().is_some());
        assert_eq!(process.reap(Duration::from_secs(5)), Some(RendererExit::Code(0)));
    }
}

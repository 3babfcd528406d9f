//! Detached background jobs with single-flight launch
//!
//! A job is identified by a name. At most one process per name runs at a time;
//! `ProcessLauncher` enforces this across independent invocations with an
//! exclusively created PID file per job.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::{debug, info, warn};

/// How long an empty PID file is treated as a launch in progress
const CLAIM_GRACE: Duration = Duration::from_secs(5);

/// Errors that can occur when launching a job
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The job bookkeeping directory or PID file could not be written
    #[error("failed to record job '{job}': {source}")]
    Bookkeeping {
        job: String,
        #[source]
        source: io::Error,
    },

    /// The worker process could not be started
    #[error("failed to spawn job '{job}': {source}")]
    Spawn {
        job: String,
        #[source]
        source: io::Error,
    },
}

/// Outcome of a launch request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Launch {
    /// A new worker was started
    Started,
    /// A worker with the same name was already running
    AlreadyRunning,
}

/// Program and arguments for a worker process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }
}

/// Starts fire-and-forget workers and reports whether one is running
pub trait JobLauncher: Send + Sync {
    /// Whether a worker tagged `job` is currently executing
    fn is_running(&self, job: &str) -> bool;

    /// Starts `command` as job `job` unless one is already running.
    ///
    /// Implementations must make the check and the start a single step with
    /// respect to other launchers sharing the same bookkeeping.
    fn run_detached(&self, job: &str, command: &WorkerCommand) -> Result<Launch, LaunchError>;

    /// Called by the worker itself when it is done
    fn finished(&self, _job: &str) {}

    /// No-op when the job is running, otherwise starts it
    fn launch_if_not_running(
        &self,
        job: &str,
        command: &WorkerCommand,
    ) -> Result<Launch, LaunchError> {
        if self.is_running(job) {
            debug!(job, "Background job already running");
            return Ok(Launch::AlreadyRunning);
        }

        let launch = self.run_detached(job, command)?;
        if launch == Launch::Started {
            info!(job, "Started background job");
        }
        Ok(launch)
    }
}

/// What a job's PID file says about the job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PidState {
    Missing,
    /// Recorded process is alive
    Live,
    /// Empty or unreadable file younger than `CLAIM_GRACE`
    Claiming,
    /// Dead process, or an abandoned claim
    Stale,
}

/// Holds `<job>.pid.reap` while a stale PID file is being replaced
struct ReapLock {
    path: PathBuf,
}

impl Drop for ReapLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Launches workers as detached processes tracked by PID files
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    jobs_dir: PathBuf,
}

impl ProcessLauncher {
    pub fn new(jobs_dir: PathBuf) -> Self {
        Self { jobs_dir }
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    fn pid_path(&self, job: &str) -> PathBuf {
        self.jobs_dir.join(format!("{job}.pid"))
    }

    fn reap_path(&self, job: &str) -> PathBuf {
        self.jobs_dir.join(format!("{job}.pid.reap"))
    }

    fn log_path(&self, job: &str) -> PathBuf {
        self.jobs_dir.join(format!("{job}.log"))
    }

    fn bookkeeping(job: &str, source: io::Error) -> LaunchError {
        LaunchError::Bookkeeping {
            job: job.to_string(),
            source,
        }
    }

    /// Atomically creates the PID file. `None` means another launcher owns it.
    ///
    /// A stale PID file is only removed by the holder of the job's reap lock,
    /// and only after re-reading it under that lock. Without the lock a
    /// launcher that saw the stale file could delete a claim made since.
    fn claim(&self, job: &str) -> Result<Option<File>, LaunchError> {
        fs::create_dir_all(&self.jobs_dir).map_err(|e| Self::bookkeeping(job, e))?;
        let path = self.pid_path(job);

        if let Some(file) = create_exclusive(&path).map_err(|e| Self::bookkeeping(job, e))? {
            return Ok(Some(file));
        }

        match pid_state(&path) {
            PidState::Missing => {}
            PidState::Stale => {
                let Some(_reap) = self.reap_lock(job)? else {
                    return Ok(None);
                };
                if pid_state(&path) == PidState::Stale {
                    debug!(job, "Removing stale job PID file");
                    match fs::remove_file(&path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(Self::bookkeeping(job, e)),
                    }
                }
            }
            PidState::Live | PidState::Claiming => return Ok(None),
        }

        create_exclusive(&path).map_err(|e| Self::bookkeeping(job, e))
    }

    /// Takes the reap lock, breaking one left behind by a crashed launcher
    fn reap_lock(&self, job: &str) -> Result<Option<ReapLock>, LaunchError> {
        let path = self.reap_path(job);

        for _ in 0..2 {
            if create_exclusive(&path)
                .map_err(|e| Self::bookkeeping(job, e))?
                .is_some()
            {
                return Ok(Some(ReapLock { path }));
            }
            if modified_within(&path, CLAIM_GRACE) {
                return Ok(None);
            }
            warn!(job, "Breaking abandoned reap lock");
            let _ = fs::remove_file(&path);
        }

        Ok(None)
    }

    fn spawn(&self, job: &str, command: &WorkerCommand) -> io::Result<u32> {
        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path(job))?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log));

        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let child = cmd.spawn()?;
        Ok(child.id())
    }
}

impl JobLauncher for ProcessLauncher {
    fn is_running(&self, job: &str) -> bool {
        matches!(
            pid_state(&self.pid_path(job)),
            PidState::Live | PidState::Claiming
        )
    }

    fn run_detached(&self, job: &str, command: &WorkerCommand) -> Result<Launch, LaunchError> {
        let mut pid_file = match self.claim(job)? {
            Some(file) => file,
            None => return Ok(Launch::AlreadyRunning),
        };

        let pid = match self.spawn(job, command) {
            Ok(pid) => pid,
            Err(source) => {
                let _ = fs::remove_file(self.pid_path(job));
                return Err(LaunchError::Spawn {
                    job: job.to_string(),
                    source,
                });
            }
        };

        record_pid(&mut pid_file, job, pid);
        debug!(job, pid, program = %command.program.display(), "Spawned worker");
        Ok(Launch::Started)
    }

    fn finished(&self, job: &str) {
        let path = self.pid_path(job);
        let ours = fs::read_to_string(&path)
            .ok()
            .and_then(|content| content.trim().parse::<u32>().ok())
            == Some(std::process::id());

        if ours {
            let _ = fs::remove_file(&path);
        }
    }
}

/// Writes the worker PID into its claim.
///
/// The worker is running either way, so a failed write is only logged; the
/// empty claim lapses after `CLAIM_GRACE`.
fn record_pid(mut out: impl Write, job: &str, pid: u32) {
    if let Err(e) = write!(out, "{pid}") {
        warn!(job, pid, error = %e, "Failed to record worker PID");
    }
}

/// `create_new` open; `None` when the file already exists
fn create_exclusive(path: &Path) -> io::Result<Option<File>> {
    match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e),
    }
}

fn pid_state(path: &Path) -> PidState {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return PidState::Missing,
        Err(_) => String::new(),
    };

    match content.trim().parse::<u32>() {
        Ok(pid) if process_alive(pid) => PidState::Live,
        Ok(_) => PidState::Stale,
        Err(_) if modified_within(path, CLAIM_GRACE) => PidState::Claiming,
        Err(_) => PidState::Stale,
    }
}

fn modified_within(path: &Path, window: Duration) -> bool {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age < window)
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    // Signal 0 only checks that the process exists
    matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    // Without a liveness probe a recorded PID is trusted until the worker clears it
    true
}

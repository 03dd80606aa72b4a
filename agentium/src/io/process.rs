//! Agent process execution with deadlines, cancellation and bounded output.
//!
//! The [`ProcessExecutor`] trait decouples the controller from real process
//! spawning. Tests use scripted executors that return predetermined outputs.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, info, instrument, warn};
use wait_timeout::ChildExt;

/// Interval between deadline/cancellation checks while a child runs.
const POLL_SLICE: Duration = Duration::from_millis(200);

/// How long reader threads may keep draining after the child has exited.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Shared cancellation flag, cheap to clone across threads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One agent invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Program followed by its arguments.
    pub argv: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub stdin: Option<String>,
    pub workdir: PathBuf,
    pub timeout: Duration,
    /// Bytes of stdout/stderr kept in memory; the rest is drained and counted.
    pub output_limit_bytes: usize,
    /// When set, stdout lines are appended to this file as they arrive.
    pub stream_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
    pub cancelled: bool,
}

impl ExecOutput {
    /// Successful run with the given stdout, for scripted executors.
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Self::default()
        }
    }
}

/// Abstraction over agent process backends.
pub trait ProcessExecutor {
    fn execute(&self, request: &ExecRequest, cancel: &CancelToken) -> Result<ExecOutput>;
}

/// Executor that spawns the agent binary on the local machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalExecutor;

impl ProcessExecutor for LocalExecutor {
    #[instrument(skip_all, fields(program = request.argv.first().map(String::as_str), timeout_secs = request.timeout.as_secs()))]
    fn execute(&self, request: &ExecRequest, cancel: &CancelToken) -> Result<ExecOutput> {
        let (program, args) = request
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("empty command line"))?;
        info!(workdir = %request.workdir.display(), "starting agent process");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .envs(&request.env)
            .current_dir(&request.workdir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if request.stdin.is_some() {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }
        // Own process group, so a kill reaches everything the agent spawned.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                error!(err = %e, program, "failed to spawn agent");
                return Err(e).with_context(|| format!("spawn {program}"));
            }
        };

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("stdout was not piped"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("stderr was not piped"))?;
        let tee = open_stream(request.stream_path.as_deref())?;
        let limit = request.output_limit_bytes;
        let stdout_handle = thread::spawn(move || read_lines_limited(stdout, limit, tee));
        let stderr_handle = thread::spawn(move || read_lines_limited(stderr, limit, None));

        // Written from its own thread so a child that fills its stdout pipe
        // before reading stdin cannot deadlock us.
        let stdin_handle = match (&request.stdin, child.stdin.take()) {
            (Some(input), Some(mut pipe)) => {
                let input = input.clone();
                Some(thread::spawn(move || {
                    if let Err(e) = pipe.write_all(input.as_bytes()) {
                        debug!(err = %e, "agent closed stdin early");
                    }
                }))
            }
            _ => None,
        };

        let deadline = Instant::now() + request.timeout;
        let mut timed_out = false;
        let mut cancelled = false;
        let status = loop {
            if let Some(status) = child.wait_timeout(POLL_SLICE).context("wait for agent")? {
                break status;
            }
            if cancel.is_cancelled() {
                warn!("cancellation requested, killing agent");
                cancelled = true;
            } else if Instant::now() >= deadline {
                warn!(timeout_secs = request.timeout.as_secs(), "agent timed out, killing");
                timed_out = true;
            } else {
                continue;
            }
            kill_tree(&mut child).context("kill agent")?;
            break child.wait().context("wait agent after kill")?;
        };

        if let Some(handle) = stdin_handle
            && handle.join().is_err()
        {
            warn!("stdin writer thread panicked");
        }
        let drain_until = Instant::now() + DRAIN_GRACE;
        let (stdout, stdout_truncated) =
            join_output(stdout_handle, drain_until).context("join stdout")?;
        let (stderr, stderr_truncated) =
            join_output(stderr_handle, drain_until).context("join stderr")?;
        if stdout_truncated > 0 || stderr_truncated > 0 {
            warn!(stdout_truncated, stderr_truncated, "agent output truncated");
        }

        // Killed processes have no exit code on unix.
        let exit_code = status.code().unwrap_or(-1);
        debug!(exit_code, timed_out, cancelled, "agent finished");
        Ok(ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            stdout_truncated,
            stderr_truncated,
            timed_out,
            cancelled,
        })
    }
}

type StreamFile = Option<Arc<Mutex<BufWriter<File>>>>;

fn open_stream(path: Option<&Path>) -> Result<StreamFile> {
    let Some(path) = path else {
        return Ok(None);
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create stream dir {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("create stream file {}", path.display()))?;
    Ok(Some(Arc::new(Mutex::new(BufWriter::new(file)))))
}

#[cfg(unix)]
fn kill_tree(child: &mut std::process::Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("pid out of range")?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => {
            warn!(%errno, "killpg failed, killing leader only");
            child.kill().map_err(Into::into)
        }
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut std::process::Child) -> Result<()> {
    child.kill().map_err(Into::into)
}

/// Join a reader thread, giving up at `until` if something still holds the pipe.
fn join_output(
    handle: thread::JoinHandle<Result<(Vec<u8>, usize)>>,
    until: Instant,
) -> Result<(Vec<u8>, usize)> {
    while !handle.is_finished() {
        if Instant::now() >= until {
            warn!("output pipe still open after agent exit, abandoning reader");
            return Ok((Vec::new(), 0));
        }
        thread::sleep(Duration::from_millis(20));
    }
    match handle.join() {
        Ok(result) => result,
        Err(_) => Err(anyhow!("output reader thread panicked")),
    }
}

/// Read a stream line by line with a size limit, optionally tee-ing to a file.
fn read_lines_limited<R: Read>(reader: R, limit: usize, tee: StreamFile) -> Result<(Vec<u8>, usize)> {
    let mut reader = BufReader::new(reader);
    let mut collected = Vec::new();
    let mut truncated = 0usize;

    loop {
        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line).context("read line")?;
        if n == 0 {
            break;
        }

        if let Some(mutex) = &tee
            && let Ok(mut writer) = mutex.lock()
        {
            if let Err(e) = writer.write_all(&line) {
                warn!(err = %e, "failed to write to stream file");
            } else if let Err(e) = writer.flush() {
                warn!(err = %e, "failed to flush stream file");
            }
        }

        let remaining = limit.saturating_sub(collected.len());
        if remaining > 0 {
            let keep = n.min(remaining);
            collected.extend_from_slice(&line[..keep]);
            truncated += n.saturating_sub(keep);
        } else {
            truncated += n;
        }
    }

    Ok((collected, truncated))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn request(script: &str, timeout: Duration) -> ExecRequest {
        ExecRequest {
            argv: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            env: BTreeMap::from([("AGENTIUM_TEST".to_string(), "yes".to_string())]),
            stdin: None,
            workdir: std::env::temp_dir(),
            timeout,
            output_limit_bytes: 1024,
            stream_path: None,
        }
    }

    #[test]
    fn captures_output_env_and_exit_code() {
        let output = LocalExecutor
            .execute(
                &request("echo out:$AGENTIUM_TEST; echo err >&2; exit 3", Duration::from_secs(10)),
                &CancelToken::new(),
            )
            .expect("execute");
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout, "out:yes\n");
        assert_eq!(output.stderr, "err\n");
        assert!(!output.timed_out);
    }

    #[test]
    fn pipes_stdin_and_tees_stdout() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stream = temp.path().join("logs/stdout.log");
        let mut req = request("cat", Duration::from_secs(10));
        req.stdin = Some("hello agent\n".to_string());
        req.stream_path = Some(stream.clone());
        let output = LocalExecutor
            .execute(&req, &CancelToken::new())
            .expect("execute");
        assert_eq!(output.stdout, "hello agent\n");
        assert_eq!(fs::read_to_string(stream).expect("stream"), "hello agent\n");
    }

    #[test]
    fn deadline_kills_child() {
        let output = LocalExecutor
            .execute(&request("sleep 5", Duration::from_millis(300)), &CancelToken::new())
            .expect("execute");
        assert!(output.timed_out);
        assert!(!output.cancelled);
    }

    #[test]
    fn deadline_kills_background_children_too() {
        let started = Instant::now();
        let output = LocalExecutor
            .execute(
                &request("sleep 30 & echo started; sleep 30", Duration::from_millis(300)),
                &CancelToken::new(),
            )
            .expect("execute");
        assert!(output.timed_out);
        assert_eq!(output.stdout, "started\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn cancellation_kills_child() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let output = LocalExecutor
            .execute(&request("sleep 5", Duration::from_secs(10)), &cancel)
            .expect("execute");
        assert!(output.cancelled);
    }

    #[test]
    fn output_beyond_limit_is_counted() {
        let mut req = request("head -c 3000 /dev/zero | tr '\\0' a", Duration::from_secs(10));
        req.output_limit_bytes = 100;
        let output = LocalExecutor
            .execute(&req, &CancelToken::new())
            .expect("execute");
        assert_eq!(output.stdout.len(), 100);
        assert_eq!(output.stdout_truncated, 2900);
    }
}

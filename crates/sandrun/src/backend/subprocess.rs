//! Host subprocess backend
//!
//! Runs each phase as a child of the engine process with a scrubbed
//! environment, its own process group and OS resource limits.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

use crate::backend::rlimit::RlimitPlan;
use crate::backend::{BackendError, PhaseCommand, ProcessOutput};
use crate::config::LanguageSpec;
use crate::workspace::Workspace;

/// How long to wait for output pipes to drain once the child is gone
const DRAIN_GRACE: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 8 * 1024;

/// Runs programs as host subprocesses
#[derive(Debug, Clone, Default)]
pub struct SubprocessBackend;

impl SubprocessBackend {
    pub fn new() -> Self {
        Self
    }

    /// Run one phase inside `workspace`
    #[instrument(skip_all, fields(language = %spec.id, phase = %command.phase()))]
    pub async fn run(
        &self,
        spec: &LanguageSpec,
        workspace: &Workspace,
        mut command: PhaseCommand,
    ) -> Result<ProcessOutput, BackendError> {
        let argv = command.argv().to_vec();
        let first = argv.first().ok_or(BackendError::EmptyCommand)?;
        let program = resolve_command(first, workspace.path())?;
        let workspace_dir = workspace.path().to_string_lossy().into_owned();

        let mut cmd = Command::new(&program);
        cmd.args(&argv[1..])
            .current_dir(workspace.path())
            .env_clear()
            .env("PATH", std::env::var_os("PATH").unwrap_or_default())
            .env("HOME", &workspace_dir)
            .env("TMPDIR", &workspace_dir)
            .env("LANG", "C.UTF-8")
            .envs(spec.expand_env(&workspace_dir, command.memory_mb()))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let stdin_data = command.take_stdin();
        cmd.stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        #[cfg(unix)]
        {
            let plan = RlimitPlan::from_limits(command.get_limits(), spec.address_space_limit);
            cmd.process_group(0);
            // SAFETY: the hook only calls setrlimit, which is async-signal-safe
            unsafe {
                cmd.pre_exec(move || plan.apply());
            }
        }
        #[cfg(not(unix))]
        warn!("resource limits other than the wall clock are unavailable on this platform");

        debug!(?argv, timeout = ?command.get_timeout(), "spawning process");

        let start = Instant::now();
        let mut child = cmd.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => BackendError::CommandNotFound(first.clone()),
            _ => BackendError::SpawnFailed(e),
        })?;
        let pid = child.id();

        let stdin_task = match (child.stdin.take(), stdin_data) {
            (Some(mut stdin), Some(data)) => Some(tokio::spawn(async move {
                // A program that exits without reading its input closes the pipe
                if let Err(e) = stdin.write_all(&data).await
                    && e.kind() != std::io::ErrorKind::BrokenPipe
                {
                    debug!(error = %e, "failed to write stdin");
                }
                let _ = stdin.shutdown().await;
            })),
            _ => None,
        };

        let cap = command.output_cap();
        let stdout_task = child.stdout.take().map(|out| spawn_reader(out, cap));
        let stderr_task = child.stderr.take().map(|err| spawn_reader(err, cap));

        let (status, timed_out) =
            match tokio::time::timeout(command.get_timeout(), child.wait()).await {
                Ok(status) => (status?, false),
                Err(_) => {
                    debug!("wall clock limit reached, killing process group");
                    kill_tree(pid);
                    let _ = child.start_kill();
                    (child.wait().await?, true)
                }
            };
        let elapsed = start.elapsed();

        // Reap anything the program left behind in its group
        kill_tree(pid);

        if let Some(task) = stdin_task {
            task.abort();
        }
        let (stdout, stdout_truncated) = collect(stdout_task).await;
        let (stderr, stderr_truncated) = collect(stderr_task).await;

        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt as _;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal: Option<i32> = None;

        let output = ProcessOutput {
            exit_code: status.code(),
            signal,
            timed_out,
            stdout,
            stderr,
            output_truncated: stdout_truncated || stderr_truncated,
            elapsed,
            oom_killed: false,
        };

        debug!(
            exit_code = ?output.exit_code,
            signal = ?output.signal,
            timed_out,
            elapsed = ?output.elapsed,
            "process finished"
        );

        Ok(output)
    }
}

fn kill_tree(pid: Option<u32>) {
    #[cfg(unix)]
    if let Some(pid) = pid {
        crate::backend::rlimit::kill_group(pid);
    }
    #[cfg(not(unix))]
    let _ = pid;
}

fn spawn_reader<R>(reader: R, cap: usize) -> JoinHandle<std::io::Result<(Vec<u8>, bool)>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(read_capped(reader, cap))
}

/// Read `reader` to the end, keeping at most `cap` bytes. The rest is
/// drained and discarded so the writer never blocks on a full pipe.
pub(crate) async fn read_capped<R>(mut reader: R, cap: usize) -> std::io::Result<(Vec<u8>, bool)>
where
    R: AsyncRead + Unpin,
{
    let mut kept = Vec::new();
    let mut truncated = false;
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = cap.saturating_sub(kept.len());
        if n > room {
            truncated = true;
        }
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }

    Ok((kept, truncated))
}

async fn collect(task: Option<JoinHandle<std::io::Result<(Vec<u8>, bool)>>>) -> (Vec<u8>, bool) {
    let Some(mut task) = task else {
        return (Vec::new(), false);
    };

    match tokio::time::timeout(DRAIN_GRACE, &mut task).await {
        Ok(Ok(Ok(output))) => output,
        Ok(Ok(Err(e))) => {
            warn!(error = %e, "failed to read process output");
            (Vec::new(), false)
        }
        Ok(Err(e)) => {
            warn!(error = %e, "output reader task failed");
            (Vec::new(), false)
        }
        Err(_) => {
            // A process outside the group still holds the pipe open
            warn!("output pipe not closed after process exit, discarding");
            task.abort();
            (Vec::new(), true)
        }
    }
}

/// Resolve the program of a command against the workspace and host `PATH`
///
/// `./name` refers to a workspace file, other paths are used as given and
/// bare names are searched on `PATH`. Symlinks are not resolved, since
/// multi-call binaries dispatch on the name they were invoked as.
pub fn resolve_command(program: &str, workspace: &Path) -> Result<PathBuf, BackendError> {
    if let Some(relative) = program.strip_prefix("./") {
        let candidate = workspace.join(relative);
        return if candidate.is_file() {
            Ok(candidate)
        } else {
            Err(BackendError::CommandNotFound(program.to_owned()))
        };
    }

    if program.contains('/') {
        return Ok(PathBuf::from(program));
    }

    let path_var = std::env::var_os("PATH").unwrap_or_default();
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| BackendError::CommandNotFound(program.to_owned()))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::backend::Phase;
    use crate::config::language::tests::interpreted;
    use crate::types::ResourceLimits;
    use crate::workspace::WorkspaceManager;

    fn limits() -> ResourceLimits {
        // Generous process ceiling; RLIMIT_NPROC counts every process of the user
        ResourceLimits::default().with_max_processes(100_000)
    }

    async fn run_shell(
        script: &str,
        stdin: Option<&str>,
        limits: ResourceLimits,
    ) -> (ProcessOutput, Workspace) {
        let spec = interpreted(&["sh", "{source}"]);
        let manager = WorkspaceManager::new(None, 1);
        let workspace = manager.acquire(&spec, script).await.unwrap();

        let mut command = PhaseCommand::new(Phase::Run)
            .command(["sh", workspace.source_name()])
            .timeout(limits.timeout_duration())
            .limits(limits);
        if let Some(input) = stdin {
            command = command.stdin(input.as_bytes().to_vec());
        }

        let output = SubprocessBackend::new()
            .run(&spec, &workspace, command)
            .await
            .unwrap();
        (output, workspace)
    }

    #[tokio::test]
    async fn runs_successfully() {
        let (output, _ws) = run_shell("echo hello\necho oops >&2\n", None, limits()).await;
        assert!(output.success());
        assert_eq!(output.exit_code, Some(0));
        assert_eq!(output.stdout, b"hello\n");
        assert_eq!(output.stderr, b"oops\n");
        assert!(!output.timed_out);
        assert!(!output.output_truncated);
    }

    #[tokio::test]
    async fn feeds_stdin() {
        let (output, _ws) = run_shell("read line\necho \"got $line\"\n", Some("abc\n"), limits()).await;
        assert_eq!(output.stdout, b"got abc\n");
    }

    #[tokio::test]
    async fn missing_stdin_reads_eof() {
        let (output, _ws) = run_shell("cat\necho done\n", None, limits()).await;
        assert_eq!(output.stdout, b"done\n");
    }

    #[tokio::test]
    async fn reports_nonzero_exit() {
        let (output, _ws) = run_shell("exit 3\n", None, limits()).await;
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[tokio::test]
    async fn reports_signal() {
        let (output, _ws) = run_shell("kill -9 $$\n", None, limits()).await;
        assert_eq!(output.exit_code, None);
        assert_eq!(output.signal, Some(9));
    }

    #[tokio::test]
    async fn environment_is_scrubbed() {
        // SAFETY: test-only variable that no other test reads
        unsafe { std::env::set_var("SANDRUN_TEST_SECRET", "leak") };
        let (output, ws) = run_shell(
            "echo \"secret=$SANDRUN_TEST_SECRET\"\necho \"home=$HOME\"\n",
            None,
            limits(),
        )
        .await;
        let stdout = String::from_utf8(output.stdout).unwrap();
        assert!(stdout.contains("secret=\n"));
        assert!(stdout.contains(&format!("home={}", ws.path().display())));
    }

    #[tokio::test]
    async fn timeout_kills_process() {
        let limits = limits().with_timeout(0.5);
        let start = Instant::now();
        let (output, _ws) = run_shell("sleep 30\n", None, limits).await;
        assert!(output.timed_out);
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn timeout_kills_grandchildren() {
        let limits = limits().with_timeout(0.5);
        let (output, ws) = run_shell("sleep 30 &\necho $! > bg.pid\nwait\n", None, limits).await;
        assert!(output.timed_out);

        let pid = String::from_utf8(ws.read_file("bg.pid").await.unwrap()).unwrap();
        let stat = format!("/proc/{}/stat", pid.trim());

        // Gone or a zombie awaiting reaping by init
        let mut alive = true;
        for _ in 0..40 {
            match std::fs::read_to_string(&stat) {
                Err(_) => alive = false,
                Ok(contents) => alive = !contents.contains(") Z "),
            }
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(!alive, "background process survived the timeout");
    }

    #[tokio::test]
    async fn caps_output() {
        let limits = limits().with_max_output(1);
        let (output, _ws) = run_shell(
            "i=0\nwhile [ $i -lt 300 ]; do echo 0123456789; i=$((i+1)); done\n",
            None,
            limits,
        )
        .await;
        assert_eq!(output.stdout.len(), 1024);
        assert!(output.output_truncated);
        assert_eq!(output.exit_code, Some(0));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn limits_above_hard_limit_are_capped() {
        let limits = limits()
            .with_max_processes(u32::MAX)
            .with_max_open_files(u32::MAX);
        let (output, _ws) = run_shell("ulimit -n\n", None, limits).await;
        assert!(output.success(), "{output:?}");

        let open_files: u64 = output.stdout_lossy().trim().parse().unwrap();
        assert!(open_files < u64::from(u32::MAX));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn process_cap_stops_forks() {
        // RLIMIT_NPROC is not enforced for root
        // SAFETY: geteuid has no preconditions
        if unsafe { libc::geteuid() } == 0 {
            return;
        }

        // Any fork fails once the cap is at or below the user's process count
        let limits = limits().with_max_processes(1);
        let (output, _ws) = run_shell("(echo child)\necho parent\n", None, limits).await;
        assert!(!output.timed_out);
        assert!(!output.stdout_lossy().contains("child"), "{output:?}");
    }

    #[tokio::test]
    async fn missing_program_is_reported() {
        let spec = interpreted(&["definitely-not-a-real-binary-xyz"]);
        let manager = WorkspaceManager::new(None, 1);
        let workspace = manager.acquire(&spec, "").await.unwrap();
        let command = PhaseCommand::new(Phase::Run).command(["definitely-not-a-real-binary-xyz"]);

        let result = SubprocessBackend::new().run(&spec, &workspace, command).await;
        assert!(matches!(result, Err(BackendError::CommandNotFound(_))));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let spec = interpreted(&["sh"]);
        let manager = WorkspaceManager::new(None, 1);
        let workspace = manager.acquire(&spec, "").await.unwrap();

        let result = SubprocessBackend::new()
            .run(&spec, &workspace, PhaseCommand::new(Phase::Run))
            .await;
        assert!(matches!(result, Err(BackendError::EmptyCommand)));
    }

    #[tokio::test]
    async fn read_capped_keeps_prefix() {
        let data: &[u8] = b"abcdefghij";
        let (kept, truncated) = read_capped(data, 4).await.unwrap();
        assert_eq!(kept, b"abcd");
        assert!(truncated);

        let (kept, truncated) = read_capped(data, 10).await.unwrap();
        assert_eq!(kept, data);
        assert!(!truncated);
    }

    #[test]
    fn resolve_command_variants() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main"), b"").unwrap();

        assert_eq!(
            resolve_command("./main", dir.path()).unwrap(),
            dir.path().join("main")
        );
        assert!(matches!(
            resolve_command("./missing", dir.path()),
            Err(BackendError::CommandNotFound(_))
        ));
        assert_eq!(
            resolve_command("/bin/sh", dir.path()).unwrap(),
            PathBuf::from("/bin/sh")
        );
        assert!(resolve_command("sh", dir.path()).unwrap().ends_with("sh"));
    }
}

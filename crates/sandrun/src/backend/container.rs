//! Container backend
//!
//! Runs each phase in a fresh container created from the language image,
//! with the workspace bind-mounted at `/workspace`. Containers are always
//! force-removed once the phase is over.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use bollard::Docker;
use bollard::container::LogOutput;
use bollard::errors::Error as DockerError;
use bollard::models::{ContainerCreateBody, HostConfig, ResourcesUlimits};
use bollard::query_parameters::{
    AttachContainerOptions, CreateContainerOptions, CreateImageOptions, InspectContainerOptions,
    KillContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use futures_util::stream::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backend::{BackendError, PhaseCommand, ProcessOutput};
use crate::config::{ContainerConfig, LanguageSpec};
use crate::workspace::Workspace;

/// Mount point of the workspace inside containers
pub const CONTAINER_WORKSPACE: &str = "/workspace";

const MB: i64 = 1024 * 1024;

/// Runs programs in throwaway containers
#[derive(Debug, Clone)]
pub struct ContainerBackend {
    docker: Docker,
    settings: ContainerConfig,
}

impl ContainerBackend {
    /// Connect to the local container runtime and check that it answers
    pub async fn connect(settings: ContainerConfig) -> Result<Self, BackendError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        docker
            .ping()
            .await
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;

        debug!("container runtime reachable");
        Ok(Self { docker, settings })
    }

    /// Run one phase in a new container from `image`
    #[instrument(skip_all, fields(language = %spec.id, phase = %command.phase(), image = %image))]
    pub async fn run(
        &self,
        spec: &LanguageSpec,
        image: &str,
        workspace: &Workspace,
        command: PhaseCommand,
    ) -> Result<ProcessOutput, BackendError> {
        if command.argv().is_empty() {
            return Err(BackendError::EmptyCommand);
        }

        self.ensure_image(image).await?;

        let body = container_body(&self.settings, spec, image, workspace.path(), &command);
        let name = format!("sandrun-{}", Uuid::new_v4());
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: Some(name.clone()),
                    ..Default::default()
                }),
                body,
            )
            .await?;

        debug!(container = %name, "container created");

        let result = self.drive(&created.id, command).await;

        if let Err(e) = self
            .docker
            .remove_container(
                &created.id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
        {
            warn!(container = %name, error = %e, "failed to remove container");
        }

        result
    }

    /// Pull `image` unless it is already present locally
    async fn ensure_image(&self, image: &str) -> Result<(), BackendError> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        info!(image, "pulling container image");
        let mut pull = self.docker.create_image(
            Some(CreateImageOptions {
                from_image: Some(image.to_owned()),
                ..Default::default()
            }),
            None,
            None,
        );
        while let Some(progress) = pull.next().await {
            progress?;
        }
        Ok(())
    }

    async fn drive(&self, id: &str, mut command: PhaseCommand) -> Result<ProcessOutput, BackendError> {
        let stdin = command.take_stdin();
        let attached = match stdin {
            Some(_) => Some(
                self.docker
                    .attach_container(
                        id,
                        Some(AttachContainerOptions {
                            stdin: true,
                            stream: true,
                            ..Default::default()
                        }),
                    )
                    .await?,
            ),
            None => None,
        };

        let start = Instant::now();
        self.docker
            .start_container(id, None::<StartContainerOptions>)
            .await?;

        let stdin_task = match (attached, stdin) {
            (Some(mut attached), Some(data)) => Some(tokio::spawn(async move {
                if let Err(e) = attached.input.write_all(&data).await {
                    debug!(error = %e, "failed to write container stdin");
                }
                let _ = attached.input.shutdown().await;
            })),
            _ => None,
        };

        let mut wait = Box::pin(
            self.docker
                .wait_container(id, None::<WaitContainerOptions>),
        );
        let (status_code, timed_out) =
            match tokio::time::timeout(command.get_timeout(), wait.next()).await {
                Ok(Some(Ok(response))) => (Some(response.status_code), false),
                // Non-zero exits surface as wait errors
                Ok(Some(Err(DockerError::DockerContainerWaitError { code, .. }))) => {
                    (Some(code), false)
                }
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(None) => (None, false),
                Err(_) => {
                    debug!("wall clock limit reached, killing container");
                    if let Err(e) = self
                        .docker
                        .kill_container(id, None::<KillContainerOptions>)
                        .await
                    {
                        warn!(error = %e, "failed to kill container");
                    }
                    (None, true)
                }
            };
        let elapsed = start.elapsed();

        if let Some(task) = stdin_task {
            task.abort();
        }

        let oom_killed = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .ok()
            .and_then(|info| info.state)
            .and_then(|state| state.oom_killed)
            .unwrap_or(false);

        let cap = command.output_cap();
        let (stdout, stderr, output_truncated) = self.collect_logs(id, cap).await?;

        let (exit_code, signal) = split_status(status_code);

        let output = ProcessOutput {
            exit_code,
            signal,
            timed_out,
            stdout,
            stderr,
            output_truncated,
            elapsed,
            oom_killed,
        };

        debug!(
            exit_code = ?output.exit_code,
            signal = ?output.signal,
            timed_out,
            oom_killed,
            elapsed = ?output.elapsed,
            "container finished"
        );

        Ok(output)
    }

    async fn collect_logs(
        &self,
        id: &str,
        cap: usize,
    ) -> Result<(Vec<u8>, Vec<u8>, bool), BackendError> {
        let mut logs = Box::pin(self.docker.logs(
            id,
            Some(LogsOptions {
                stdout: true,
                stderr: true,
                ..Default::default()
            }),
        ));

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut truncated = false;
        while let Some(entry) = logs.next().await {
            let (buffer, message) = match entry? {
                LogOutput::StdOut { message } | LogOutput::Console { message } => {
                    (&mut stdout, message)
                }
                LogOutput::StdErr { message } => (&mut stderr, message),
                LogOutput::StdIn { .. } => continue,
            };
            let room = cap.saturating_sub(buffer.len());
            if message.len() > room {
                truncated = true;
            }
            buffer.extend_from_slice(&message[..message.len().min(room)]);
        }

        Ok((stdout, stderr, truncated))
    }
}

/// Split a container status code into exit code and signal.
///
/// Runtimes report a process killed by signal N as status 128 + N.
fn split_status(status_code: Option<i64>) -> (Option<i32>, Option<i32>) {
    match status_code.and_then(|code| i32::try_from(code).ok()) {
        Some(code) if (129..=128 + 64).contains(&code) => (None, Some(code - 128)),
        other => (other, None),
    }
}

fn ulimit(name: &str, soft: u64, hard: u64) -> ResourcesUlimits {
    ResourcesUlimits {
        name: Some(name.to_owned()),
        soft: Some(i64::try_from(soft).unwrap_or(i64::MAX)),
        hard: Some(i64::try_from(hard).unwrap_or(i64::MAX)),
    }
}

fn default_user() -> Option<String> {
    #[cfg(unix)]
    {
        // SAFETY: getuid/getgid cannot fail and touch no memory
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Some(format!("{uid}:{gid}"))
    }
    #[cfg(not(unix))]
    {
        None
    }
}

/// Container definition for one phase
pub(crate) fn container_body(
    settings: &ContainerConfig,
    spec: &LanguageSpec,
    image: &str,
    workspace: &Path,
    command: &PhaseCommand,
) -> ContainerCreateBody {
    let limits = command.get_limits();
    let memory = i64::try_from(command.memory_mb())
        .unwrap_or(i64::MAX / MB)
        .saturating_mul(MB);
    let mode = if command.writable_workspace() { "rw" } else { "ro" };

    let mut env = vec![
        "HOME=/tmp".to_owned(),
        "TMPDIR=/tmp".to_owned(),
        "LANG=C.UTF-8".to_owned(),
    ];
    env.extend(
        spec.expand_env(CONTAINER_WORKSPACE, command.memory_mb())
            .into_iter()
            .map(|(key, value)| format!("{key}={value}")),
    );

    let cpu = limits.effective_cpu_time();
    let mut ulimits = vec![ulimit("core", 0, 0), ulimit("cpu", cpu, cpu.saturating_add(1))];
    if let Some(bytes) = limits.max_file_size_bytes() {
        ulimits.push(ulimit("fsize", bytes, bytes));
    }
    if let Some(count) = limits.max_open_files {
        ulimits.push(ulimit("nofile", count.into(), count.into()));
    }

    let has_stdin = command.stdin_data().is_some();

    ContainerCreateBody {
        image: Some(image.to_owned()),
        cmd: Some(command.argv().to_vec()),
        env: Some(env),
        working_dir: Some(CONTAINER_WORKSPACE.to_owned()),
        user: settings.user.clone().or_else(default_user),
        attach_stdin: Some(has_stdin),
        open_stdin: Some(has_stdin),
        stdin_once: Some(has_stdin),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        network_disabled: Some(settings.network_disabled),
        host_config: Some(HostConfig {
            binds: Some(vec![format!(
                "{}:{CONTAINER_WORKSPACE}:{mode}",
                workspace.display()
            )]),
            memory: Some(memory),
            memory_swap: Some(memory),
            cpu_quota: Some(settings.cpu_quota),
            cpu_period: Some(settings.cpu_period),
            pids_limit: limits.max_processes.map(i64::from),
            network_mode: settings.network_disabled.then(|| "none".to_owned()),
            readonly_rootfs: Some(true),
            tmpfs: Some(HashMap::from([(
                "/tmp".to_owned(),
                "rw,exec,nosuid,size=64m".to_owned(),
            )])),
            cap_drop: Some(vec!["ALL".to_owned()]),
            security_opt: Some(vec!["no-new-privileges".to_owned()]),
            ulimits: Some(ulimits),
            ..Default::default()
        }),
        ..Default::default()
    }
}

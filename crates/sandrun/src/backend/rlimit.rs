//! OS resource limits for subprocess children
//!
//! The plan is computed in the parent and applied in the child between fork
//! and exec, so `apply` must only make async-signal-safe calls.

use crate::types::{DEFAULT_MEMORY_MB, ResourceLimits};

const MB: u64 = 1024 * 1024;

/// Limits to install in a child process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlimitPlan {
    /// RLIMIT_AS in bytes
    pub address_space: Option<u64>,
    /// RLIMIT_CPU soft limit in seconds; the hard limit is one second later
    pub cpu_seconds: u64,
    /// RLIMIT_FSIZE in bytes
    pub file_size: Option<u64>,
    /// RLIMIT_NPROC
    pub processes: Option<u64>,
    /// RLIMIT_NOFILE
    pub open_files: Option<u64>,
}

impl RlimitPlan {
    /// Build the plan for `limits`. The memory ceiling becomes an address
    /// space limit only when the language allows it.
    pub fn from_limits(limits: &ResourceLimits, address_space_limit: bool) -> Self {
        let address_space = address_space_limit.then(|| {
            limits
                .memory_limit
                .unwrap_or(DEFAULT_MEMORY_MB)
                .saturating_mul(MB)
        });

        Self {
            address_space,
            cpu_seconds: limits.effective_cpu_time(),
            file_size: limits.max_file_size_bytes(),
            processes: limits.max_processes.map(u64::from),
            open_files: limits.max_open_files.map(u64::from),
        }
    }

    /// Install the limits in the calling process
    #[cfg(unix)]
    pub fn apply(&self) -> std::io::Result<()> {
        set(libc::RLIMIT_CORE, 0, 0)?;
        set(
            libc::RLIMIT_CPU,
            self.cpu_seconds,
            self.cpu_seconds.saturating_add(1),
        )?;
        if let Some(bytes) = self.address_space {
            set(libc::RLIMIT_AS, bytes, bytes)?;
        }
        if let Some(bytes) = self.file_size {
            set(libc::RLIMIT_FSIZE, bytes, bytes)?;
        }
        if let Some(count) = self.processes {
            set(libc::RLIMIT_NPROC, count, count)?;
        }
        if let Some(count) = self.open_files {
            set(libc::RLIMIT_NOFILE, count, count)?;
        }
        Ok(())
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
type Resource = libc::__rlimit_resource_t;

#[cfg(all(unix, not(all(target_os = "linux", target_env = "gnu"))))]
type Resource = libc::c_int;

#[cfg(unix)]
fn set(resource: Resource, soft: u64, hard: u64) -> std::io::Result<()> {
    let mut current = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: getrlimit only writes the struct we pass and is async-signal-safe
    let ceiling = (unsafe { libc::getrlimit(resource, &mut current) } == 0)
        .then_some(current.rlim_max as u64);
    let (soft, hard) = clamp(soft, hard, ceiling);

    let limit = libc::rlimit {
        rlim_cur: soft as libc::rlim_t,
        rlim_max: hard as libc::rlim_t,
    };
    // SAFETY: setrlimit only reads the struct we pass and is async-signal-safe
    if unsafe { libc::setrlimit(resource, &limit) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Without CAP_SYS_RESOURCE a hard limit can only be lowered, so requests
/// above the inherited hard limit are capped at it
#[cfg(unix)]
fn clamp(soft: u64, hard: u64, ceiling: Option<u64>) -> (u64, u64) {
    match ceiling {
        Some(max) => (soft.min(max), hard.min(max)),
        None => (soft, hard),
    }
}

/// Send SIGKILL to every process in the group led by `pid`
#[cfg(unix)]
pub fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg has no memory-safety preconditions; ESRCH is expected
    // once the group has already exited
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

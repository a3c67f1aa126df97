//! Per-execution workspaces
//!
//! Every execution gets a fresh, uniquely named temporary directory holding
//! the source file and any build artifacts. A workspace also carries the
//! concurrency permit that allowed it to exist, so the ceiling is released
//! together with the directory.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tempfile::TempDir;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, instrument, warn};

use crate::config::{LanguageSpec, Toolchain};

/// Prefix of every workspace directory name
pub const WORKSPACE_PREFIX: &str = "sandrun-";

/// File name stem used for non-JVM sources
const SOURCE_STEM: &str = "main";

static JVM_PUBLIC_TYPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\bpublic\s+(?:(?:final|abstract|sealed|non-sealed|static|strictfp)\s+)*(?:class|interface|enum|record)\s+([A-Za-z_$][\w$]*)",
    )
    .expect("valid regex")
});

/// Errors that occur while managing workspaces
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("no public class, interface, enum or record found in source")]
    NoPublicTypeFound,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("workspace pool is closed")]
    Closed,
}

/// Name of the public top-level JVM type declared in `code`, if any.
///
/// Nested members, comments and literals are ignored.
pub fn public_type_name(code: &str) -> Option<&str> {
    let masked = top_level(code);
    let name = JVM_PUBLIC_TYPE.captures(&masked)?.get(1)?;
    code.get(name.range())
}

/// `code` with comments, literals and everything inside braces blanked to
/// spaces. Byte offsets are preserved.
fn top_level(code: &str) -> String {
    let bytes = code.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut depth = 0usize;
    let mut i = 0;

    while i < bytes.len() {
        let skip = trivia_len(&bytes[i..]);
        if skip > 0 {
            out.extend(std::iter::repeat_n(b' ', skip));
            i += skip;
            continue;
        }

        let byte = bytes[i];
        match byte {
            b'{' => {
                depth += 1;
                out.push(b' ');
            }
            b'}' => {
                depth = depth.saturating_sub(1);
                out.push(b' ');
            }
            b'\n' => out.push(byte),
            _ if depth == 0 => out.push(byte),
            _ => out.push(b' '),
        }
        i += 1;
    }

    // Only ASCII delimiters end a blanked region, so `out` is still UTF-8
    String::from_utf8(out).unwrap_or_default()
}

/// Length of the comment or literal starting at `rest`, or 0
fn trivia_len(rest: &[u8]) -> usize {
    let find = |from: usize, needle: &[u8]| {
        rest[from..]
            .windows(needle.len())
            .position(|window| window == needle)
            .map_or(rest.len(), |at| from + at + needle.len())
    };

    if rest.starts_with(b"//") {
        rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len())
    } else if rest.starts_with(b"/*") {
        find(2, b"*/")
    } else if rest.starts_with(b"\"\"\"") {
        find(3, b"\"\"\"")
    } else if let Some(&quote) = rest.first()
        && (quote == b'"' || quote == b'\'')
    {
        let mut i = 1;
        while i < rest.len() {
            match rest[i] {
                b'\\' => i += 2,
                b'\n' => return i,
                b if b == quote => return i + 1,
                _ => i += 1,
            }
        }
        rest.len()
    } else {
        0
    }
}

/// Source file and binary names for `code` under the given language
pub fn file_names(spec: &LanguageSpec, code: &str) -> Result<(String, String), WorkspaceError> {
    match &spec.toolchain {
        Toolchain::Interpreted { .. } => Ok((
            format!("{SOURCE_STEM}.{}", spec.extension),
            SOURCE_STEM.to_owned(),
        )),
        Toolchain::Native { binary, .. } => {
            Ok((format!("{SOURCE_STEM}.{}", spec.extension), binary.clone()))
        }
        Toolchain::Jvm { .. } => {
            let name = public_type_name(code).ok_or(WorkspaceError::NoPublicTypeFound)?;
            Ok((format!("{name}.{}", spec.extension), name.to_owned()))
        }
    }
}

/// A workspace directory for one execution
///
/// The directory is removed by [`release()`](Self::release) or, failing
/// that, when the workspace is dropped.
#[derive(Debug)]
pub struct Workspace {
    /// Owning handle of the directory; `None` once released
    dir: Option<TempDir>,

    /// Path to the workspace directory
    path: PathBuf,

    /// Source file name inside the workspace
    source_name: String,

    /// Binary (or JVM main type) name
    binary_name: String,

    /// Concurrency permit (if acquired from a manager)
    _permit: Option<OwnedSemaphorePermit>,
}

impl Workspace {
    /// Create a workspace directory under `root` (system temp dir if `None`)
    #[instrument(skip(root))]
    pub async fn create(
        root: Option<&Path>,
        source_name: &str,
        binary_name: &str,
    ) -> Result<Self, WorkspaceError> {
        let dir = match root {
            Some(root) => {
                tokio::fs::create_dir_all(root).await?;
                tempfile::Builder::new()
                    .prefix(WORKSPACE_PREFIX)
                    .tempdir_in(root)?
            }
            None => tempfile::Builder::new().prefix(WORKSPACE_PREFIX).tempdir()?,
        };
        let path = dir.path().to_path_buf();

        debug!(?path, "workspace created");

        Ok(Self {
            dir: Some(dir),
            path,
            source_name: source_name.to_owned(),
            binary_name: binary_name.to_owned(),
            _permit: None,
        })
    }

    /// Get the path to the workspace directory
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Source file name inside the workspace
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Binary name (the main type name for JVM languages)
    pub fn binary_name(&self) -> &str {
        &self.binary_name
    }

    /// Get the host path to a file inside the workspace
    ///
    /// Returns an error if the path contains path traversal attempts.
    pub fn file_path(&self, name: &str) -> Result<PathBuf, WorkspaceError> {
        if name.is_empty() || name.contains("..") || name.starts_with('/') {
            return Err(WorkspaceError::InvalidPath(format!(
                "path traversal not allowed: {name}"
            )));
        }
        Ok(self.path.join(name))
    }

    /// Write a file into the workspace
    #[instrument(skip(self, content))]
    pub async fn write_file(&self, name: &str, content: &[u8]) -> Result<(), WorkspaceError> {
        let path = self.file_path(name)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(&path, content).await?;
        debug!(?path, len = content.len(), "wrote file to workspace");
        Ok(())
    }

    /// Read a file from the workspace
    #[instrument(skip(self))]
    pub async fn read_file(&self, name: &str) -> Result<Vec<u8>, WorkspaceError> {
        let path = self.file_path(name)?;
        let content = tokio::fs::read(&path).await?;
        debug!(?path, len = content.len(), "read file from workspace");
        Ok(content)
    }

    /// Check if a file exists in the workspace
    pub async fn file_exists(&self, name: &str) -> Result<bool, WorkspaceError> {
        let path = self.file_path(name)?;
        Ok(tokio::fs::try_exists(&path).await.unwrap_or(false))
    }

    /// Remove the workspace directory and give back the concurrency permit.
    ///
    /// Safe to call more than once; later calls do nothing.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn release(&mut self) -> Result<(), WorkspaceError> {
        let Some(dir) = self.dir.take() else {
            self._permit = None;
            return Ok(());
        };

        let result = dir.close();
        self._permit = None;
        result.inspect_err(|e| {
            warn!(error = %e, "failed to remove workspace");
        })?;
        debug!("workspace released");
        Ok(())
    }

    /// Check if the workspace directory still exists (not yet released)
    pub fn is_active(&self) -> bool {
        self.dir.is_some()
    }

    /// Attach a concurrency permit to this workspace
    pub(crate) fn with_permit(mut self, permit: OwnedSemaphorePermit) -> Self {
        self._permit = Some(permit);
        self
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.dir.is_some() {
            // TempDir removes the directory when it drops right after this
            debug!(path = %self.path.display(), "workspace dropped without release");
        }
    }
}

/// Hands out workspaces, at most `capacity` at a time
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    /// Directory under which workspaces are created
    root: Option<PathBuf>,

    /// Concurrency ceiling
    capacity: usize,

    /// Semaphore to limit concurrent workspaces
    semaphore: Arc<Semaphore>,
}

impl WorkspaceManager {
    /// Create a new workspace manager
    pub fn new(root: Option<PathBuf>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            root,
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Acquire a workspace holding `code` as the language's source file.
    ///
    /// Waits for a free concurrency slot. File names are derived before any
    /// directory is created, so a JVM source without a public type fails fast.
    #[instrument(skip(self, spec, code), fields(language = %spec.id))]
    pub async fn acquire(
        &self,
        spec: &LanguageSpec,
        code: &str,
    ) -> Result<Workspace, WorkspaceError> {
        let (source_name, binary_name) = file_names(spec, code)?;

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| WorkspaceError::Closed)?;

        let workspace = Workspace::create(self.root.as_deref(), &source_name, &binary_name)
            .await?
            .with_permit(permit);
        workspace.write_file(&source_name, code.as_bytes()).await?;

        debug!(path = ?workspace.path(), source = %source_name, "acquired workspace");
        Ok(workspace)
    }

    /// Get the number of free slots
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Get the concurrency ceiling
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

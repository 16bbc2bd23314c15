//! Execution contexts.
//!
//! A context is what the cache stores per executable: either a loaded
//! program ready to be called in-process, or a marker saying "spawn it".

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use crate::error::Result;
use crate::introspect::LaunchInfo;
use crate::load::InProcessHandle;

/// Reusable way of running one executable.
#[derive(Debug)]
pub enum ExecutionContext {
    /// Hosted in the broker's process.
    InProcess(InProcessContext),
    /// Always re-spawned as a child process.
    Subprocess(SubprocessContext),
}

/// Stateless marker for subprocess execution.
#[derive(Debug, Clone)]
pub struct SubprocessContext {
    executable: PathBuf,
}

/// A loaded program bound to the executable it was loaded for.
#[derive(Debug)]
pub struct InProcessContext {
    executable: PathBuf,
    entry_point: String,
    /// Arguments the launcher script would pass first.
    fixed_args: Vec<String>,
    /// Modification time of `executable` when the context was created.
    modified: SystemTime,
    /// `None` once released. Calls run on their own clone, so the scope is
    /// closed by whichever of release or the last running call comes last.
    handle: RwLock<Option<Arc<InProcessHandle>>>,
}

impl ExecutionContext {
    /// A context that always spawns `executable`.
    pub fn subprocess(executable: impl Into<PathBuf>) -> Self {
        Self::Subprocess(SubprocessContext {
            executable: executable.into(),
        })
    }

    /// A context hosting `handle`, valid while `executable` keeps `modified`.
    pub fn in_process(
        executable: impl Into<PathBuf>,
        info: &LaunchInfo,
        handle: InProcessHandle,
        modified: SystemTime,
    ) -> Self {
        Self::InProcess(InProcessContext {
            executable: executable.into(),
            entry_point: info.entry_point.clone(),
            fixed_args: info.fixed_args.clone(),
            modified,
            handle: RwLock::new(Some(Arc::new(handle))),
        })
    }

    /// The executable this context runs.
    pub fn executable(&self) -> &Path {
        match self {
            Self::InProcess(ctx) => &ctx.executable,
            Self::Subprocess(ctx) => &ctx.executable,
        }
    }

    pub fn is_in_process(&self) -> bool {
        matches!(self, Self::InProcess(_))
    }

    /// Subprocess contexts are always valid. In-process contexts are valid
    /// while the executable's modification time is unchanged and the handle
    /// has not been released.
    pub fn is_valid(&self) -> bool {
        match self {
            Self::Subprocess(_) => true,
            Self::InProcess(ctx) => {
                !ctx.is_released() && modified_time(&ctx.executable) == Some(ctx.modified)
            }
        }
    }

    /// Release owned resources. Idempotent.
    pub fn release(&self) -> Result<()> {
        match self {
            Self::Subprocess(_) => Ok(()),
            Self::InProcess(ctx) => ctx.release(),
        }
    }
}

impl InProcessContext {
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn fixed_args(&self) -> &[String] {
        &self.fixed_args
    }

    pub fn executable(&self) -> &Path {
        &self.executable
    }

    /// The handle to call through, `None` once released. Holding the clone
    /// keeps the scope loaded until the call finishes.
    pub(crate) fn handle(&self) -> Option<Arc<InProcessHandle>> {
        self.handle.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn is_released(&self) -> bool {
        self.handle.read().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Never waits for running calls: with calls in flight the scope is
    /// released when the last of them drops its handle.
    fn release(&self) -> Result<()> {
        let handle = self
            .handle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };
        match Arc::try_unwrap(handle) {
            Ok(handle) => {
                tracing::debug!(
                    executable = %self.executable.display(),
                    entry_point = %self.entry_point,
                    "Releasing in-process context"
                );
                handle.release()
            }
            Err(_in_flight) => {
                tracing::debug!(
                    executable = %self.executable.display(),
                    entry_point = %self.entry_point,
                    "In-process context busy, release deferred to the running call"
                );
                Ok(())
            }
        }
    }
}

/// Current modification time of `path`, if readable.
pub fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

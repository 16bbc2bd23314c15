//! Isolated in-process loading.
//!
//! Turns [`LaunchInfo`] into something callable inside the broker's own
//! process, without letting the hosted program see the host's symbols (other
//! than shared infrastructure) or end the host process.
//!
//! # Architecture
//!
//! ```text
//! LaunchInfo
//!     │
//!     └── IsolatedLoader::load (DylibLoader in production)
//!             │
//!             ├── SymbolScope (own libraries first, then HostScope)
//!             │       └── shadow copies, local symbol visibility
//!             │
//!             ├── exit hook slots → exit::intercepted_exit
//!             │
//!             └── InProcessHandle { EntryPoint, LoadedScope }
//! ```
//!
//! # Module Structure
//!
//! - `dylib` - native library loader with shadow copies
//! - `exit` - exit interception
//! - `ffi` - entry point and hook ABI
//! - `scope` - layered symbol resolution

mod dylib;
pub mod exit;
pub mod ffi;
mod scope;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::error::Result;
use crate::introspect::LaunchInfo;

pub use dylib::{DylibLoader, is_native_library};
pub use exit::ExitRequest;
pub use scope::{HostScope, SymbolScope};

/// Why a program could not be hosted in-process.
///
/// Never surfaced to callers; the broker falls back to a subprocess.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The classpath has nothing the loader can host.
    #[error("no loadable libraries on the classpath of {}", script.display())]
    NoNativeEntries { script: PathBuf },

    /// A library could not be opened.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    /// The entry point symbol is missing from the scope.
    #[error("entry point {symbol} not found")]
    EntryNotFound { symbol: String },

    /// Making the private copy of a library failed.
    #[error("failed to shadow copy {}: {source}", path.display())]
    ShadowCopy {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Loader-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Builds an isolated scope for a launcher's program.
pub trait IsolatedLoader: Send + Sync {
    /// Load `info`'s classpath into a fresh scope falling back to `host`, and
    /// resolve its entry point with exit interception in place.
    ///
    /// On error nothing may stay loaded.
    fn load(&self, info: &LaunchInfo, host: &HostScope) -> std::result::Result<InProcessHandle, LoadError>;
}

/// A hosted program's entry point.
pub trait EntryPoint: Send + Sync {
    /// Run the program with `args` and return its exit status.
    ///
    /// May unwind with an [`ExitRequest`] payload when the program exits.
    /// `Err` means the call could not be made at all.
    fn call(&self, args: &[String]) -> std::result::Result<i32, String>;
}

impl<F> EntryPoint for F
where
    F: Fn(&[String]) -> i32 + Send + Sync,
{
    fn call(&self, args: &[String]) -> std::result::Result<i32, String> {
        Ok(self(args))
    }
}

/// Resources owned by a loaded program.
pub trait LoadedScope: Send + Sync {
    /// Free the resources. Called at most once per handle, by
    /// [`InProcessHandle::release`] or when the handle is dropped.
    fn release(&mut self) -> Result<()>;
}

impl LoadedScope for SymbolScope {
    fn release(&mut self) -> Result<()> {
        SymbolScope::release(self)
    }
}

/// A loaded program: its entry point plus the scope that keeps it alive.
///
/// Dropping the handle releases the scope if [`release`](Self::release) was
/// never called.
pub struct InProcessHandle {
    entry: Box<dyn EntryPoint>,
    /// `None` once released.
    scope: Option<Box<dyn LoadedScope>>,
}

impl InProcessHandle {
    /// Pair an entry point with the scope it was resolved from.
    pub fn new(entry: impl EntryPoint + 'static, scope: impl LoadedScope + 'static) -> Self {
        Self {
            entry: Box::new(entry),
            scope: Some(Box::new(scope)),
        }
    }

    /// The program's entry point.
    pub fn entry(&self) -> &dyn EntryPoint {
        self.entry.as_ref()
    }

    /// Release the scope now and report the outcome.
    pub fn release(mut self) -> Result<()> {
        match self.scope.take() {
            Some(mut scope) => scope.release(),
            None => Ok(()),
        }
    }
}

impl Drop for InProcessHandle {
    fn drop(&mut self) {
        if let Some(mut scope) = self.scope.take() {
            if let Err(e) = scope.release() {
                tracing::warn!(error = %e, "Failed to release dropped scope");
            }
        }
    }
}

impl std::fmt::Debug for InProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessHandle").finish_non_exhaustive()
    }
}

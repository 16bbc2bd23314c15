//! Execution broker for code generators.
//!
//! Build tools invoke external generators many times per build. Spawning a
//! fresh process (and warming up its runtime) each time is slow, so this
//! crate:
//! - Recognizes launcher scripts and the program they start
//! - Hosts that program in-process in an isolated symbol scope
//! - Intercepts the program's attempts to exit the process
//! - Caches hosted programs per executable (LRU, idle timeout, mtime checked)
//! - Falls back to a plain subprocess whenever hosting is not possible

pub mod broker;
pub mod cache;
pub mod config;
pub mod error;
pub mod execute;
pub mod introspect;
pub mod load;

use std::path::Path;
use std::sync::OnceLock;

pub use broker::{ExecBroker, ExecBrokerBuilder, MAX_CONTEXT_ATTEMPTS};
pub use cache::{ContextCache, ExecutableKey};
pub use config::BrokerConfig;
pub use error::{Error, FailureKind, InvocationFailure, Result};
pub use execute::{CommandArgs, ExecutionContext, ProcessLauncher, ProcessOutput, SystemLauncher};
pub use introspect::{LaunchInfo, inspect};
pub use load::{DylibLoader, EntryPoint, HostScope, InProcessHandle, IsolatedLoader, LoadError, LoadedScope};

static GLOBAL: OnceLock<ExecBroker> = OnceLock::new();

/// Process-wide broker configured from the environment.
///
/// Invalid `GENEXEC_*` values are reported once and replaced by defaults.
pub fn global() -> &'static ExecBroker {
    GLOBAL.get_or_init(|| {
        let config = BrokerConfig::from_env().unwrap_or_else(|e| {
            tracing::warn!("{}, using defaults", e);
            BrokerConfig::default()
        });
        ExecBroker::new(config).unwrap_or_else(|e| {
            tracing::warn!("{}, using defaults", e);
            ExecBroker::default()
        })
    })
}

/// Run `executable` through the process-wide broker.
///
/// See [`ExecBroker::exec`].
pub fn exec(description: &str, executable: &Path, unlogged: &[String], logged: &[String]) -> Result<()> {
    global().exec(description, executable, unlogged, logged)
}

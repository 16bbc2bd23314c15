//! The execution broker.
//!
//! Ties the pieces together: every invocation looks up (or builds) the
//! context for its executable, runs through it, and retries with a fresh
//! context when the cached one was released underneath it.

use std::path::Path;
use std::sync::Arc;

use crate::cache::{ContextCache, ExecutableKey};
use crate::config::BrokerConfig;
use crate::error::Result;
use crate::execute::runner::{self, Outcome};
use crate::execute::{
    CommandArgs, ExecutionContext, ProcessLauncher, SystemLauncher, modified_time, process,
};
use crate::introspect;
use crate::load::{DylibLoader, HostScope, IsolatedLoader};

/// Attempts to obtain a usable context before running as a one-off subprocess.
pub const MAX_CONTEXT_ATTEMPTS: usize = 8;

/// Runs code generators, in-process when possible.
///
/// Safe to share between threads; invocations block the calling thread.
pub struct ExecBroker {
    config: BrokerConfig,
    cache: ContextCache,
    loader: Arc<dyn IsolatedLoader>,
    launcher: Arc<dyn ProcessLauncher>,
    host: HostScope,
}

impl ExecBroker {
    /// Broker with the production loader and launcher.
    pub fn new(config: BrokerConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ExecBrokerBuilder {
        ExecBrokerBuilder::default()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Run `executable` with `unlogged` then `logged` arguments.
    ///
    /// `description` completes the sentence "Failed to ..." in errors. Only
    /// `logged` arguments are ever written to logs or error messages.
    pub fn exec(
        &self,
        description: &str,
        executable: &Path,
        unlogged: &[String],
        logged: &[String],
    ) -> Result<()> {
        let args = CommandArgs::new(unlogged, logged);
        let key = ExecutableKey::new(executable);

        for attempt in 1..=MAX_CONTEXT_ATTEMPTS {
            let context = self
                .cache
                .get_or_create(&key, |key| self.create_context(executable, key.path()))?;

            match runner::invoke(&context, self.launcher.as_ref(), description, &args) {
                Outcome::Finished(result) => return result,
                Outcome::Stale => {
                    tracing::debug!(
                        executable = %executable.display(),
                        attempt,
                        "Context released before use, retrying"
                    );
                    self.cache.invalidate(&key, &context)?;
                }
            }
        }

        tracing::warn!(
            executable = %executable.display(),
            attempts = MAX_CONTEXT_ATTEMPTS,
            "No usable context, running as a one-off subprocess"
        );
        process::run(self.launcher.as_ref(), executable, description, &args)
    }

    /// Build a context for `executable`. Never fails: anything that cannot be
    /// hosted in-process becomes a subprocess context.
    ///
    /// The script is read through `resolved`, its canonical path, so a
    /// symlinked launcher finds `$APP_HOME` next to the real script.
    fn create_context(&self, executable: &Path, resolved: &Path) -> ExecutionContext {
        if !self.config.in_process {
            return ExecutionContext::subprocess(executable);
        }

        // Captured before reading the script; a rewrite in between leaves the
        // context stale.
        let Some(modified) = modified_time(resolved) else {
            tracing::debug!(executable = %executable.display(), "No modification time, using subprocess");
            return ExecutionContext::subprocess(executable);
        };

        let Some(info) = introspect::inspect(resolved) else {
            return ExecutionContext::subprocess(executable);
        };

        match self.loader.load(&info, &self.host) {
            Ok(handle) => {
                tracing::debug!(
                    executable = %executable.display(),
                    entry_point = %info.entry_point,
                    "Hosting in-process"
                );
                ExecutionContext::in_process(executable, &info, handle, modified)
            }
            Err(e) => {
                tracing::warn!(
                    executable = %executable.display(),
                    error = %e,
                    "Cannot host in-process, using subprocess"
                );
                ExecutionContext::subprocess(executable)
            }
        }
    }

    /// Number of cached contexts.
    pub fn cached_contexts(&self) -> usize {
        self.cache.len()
    }

    /// Release every cached context. The broker stays usable.
    pub fn shutdown(&self) -> Result<()> {
        self.cache.shutdown()
    }
}

impl Drop for ExecBroker {
    fn drop(&mut self) {
        if let Err(e) = self.cache.shutdown() {
            tracing::error!("{}", e);
        }
    }
}

/// Builder for [`ExecBroker`] with injectable loader and launcher.
#[derive(Default)]
pub struct ExecBrokerBuilder {
    config: Option<BrokerConfig>,
    loader: Option<Arc<dyn IsolatedLoader>>,
    launcher: Option<Arc<dyn ProcessLauncher>>,
}

impl ExecBrokerBuilder {
    pub fn config(mut self, config: BrokerConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Loader used for eligible launchers. Defaults to [`DylibLoader`].
    pub fn loader(mut self, loader: impl IsolatedLoader + 'static) -> Self {
        self.loader = Some(Arc::new(loader));
        self
    }

    /// Spawner for subprocess runs. Defaults to [`SystemLauncher`].
    pub fn launcher(mut self, launcher: impl ProcessLauncher + 'static) -> Self {
        self.launcher = Some(Arc::new(launcher));
        self
    }

    pub fn build(mut self) -> Result<ExecBroker> {
        let config = self.config.take().unwrap_or_default();
        config.validate()?;
        Ok(self.finish(config))
    }

    fn finish(self, config: BrokerConfig) -> ExecBroker {
        let loader = self
            .loader
            .unwrap_or_else(|| Arc::new(DylibLoader::new(config.shadow_dir.clone())));
        let launcher = self.launcher.unwrap_or_else(|| Arc::new(SystemLauncher));

        ExecBroker {
            cache: ContextCache::new(config.max_entries, config.idle_timeout),
            config,
            loader,
            launcher,
            host: HostScope::default(),
        }
    }
}

impl Default for ExecBroker {
    fn default() -> Self {
        ExecBrokerBuilder::default().finish(BrokerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::execute::ProcessOutput;
    use crate::introspect::LaunchInfo;
    use crate::load::{InProcessHandle, LoadError};
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct PanickingLoader;

    impl IsolatedLoader for PanickingLoader {
        fn load(&self, _: &LaunchInfo, _: &HostScope) -> std::result::Result<InProcessHandle, LoadError> {
            panic!("loader must not be used");
        }
    }

    struct CountingLauncher(Arc<AtomicUsize>);

    impl ProcessLauncher for CountingLauncher {
        fn run(&self, _: &Path, _: &[String]) -> io::Result<ProcessOutput> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ProcessOutput {
                exit_code: Some(0),
                output: Vec::new(),
            })
        }
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = BrokerConfig::default().with_max_entries(0);
        assert!(matches!(ExecBroker::new(config), Err(Error::Config(_))));
    }

    #[test]
    fn test_in_process_disabled_never_loads() {
        let temp = tempfile::TempDir::new().unwrap();
        let script = temp.path().join("gen");
        std::fs::write(&script, "#!/bin/sh\nCLASSPATH=$APP_HOME/lib/gen.so\n").unwrap();

        let spawned = Arc::new(AtomicUsize::new(0));
        let broker = ExecBroker::builder()
            .config(BrokerConfig::default().with_in_process(false))
            .loader(PanickingLoader)
            .launcher(CountingLauncher(spawned.clone()))
            .build()
            .unwrap();

        broker.exec("generate", &script, &[], &[]).unwrap();
        broker.exec("generate", &script, &[], &[]).unwrap();
        assert_eq!(spawned.load(Ordering::SeqCst), 2);
        assert_eq!(broker.cached_contexts(), 1);
    }

    #[test]
    fn test_missing_executable_uses_subprocess() {
        let spawned = Arc::new(AtomicUsize::new(0));
        let broker = ExecBroker::builder()
            .loader(PanickingLoader)
            .launcher(CountingLauncher(spawned.clone()))
            .build()
            .unwrap();

        broker
            .exec("generate", Path::new("/nonexistent/genexec/gen"), &[], &[])
            .unwrap();
        assert_eq!(spawned.load(Ordering::SeqCst), 1);
    }
}

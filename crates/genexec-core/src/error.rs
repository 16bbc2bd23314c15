//! Error types for genexec-core.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for genexec-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can reach a caller of the broker.
///
/// Failures to host a program in-process never show up here; they are
/// absorbed and turned into a subprocess run.
#[derive(Debug, Error)]
pub enum Error {
    /// The generator ran and reported failure.
    #[error("{0}")]
    Invocation(InvocationFailure),

    /// Releasing an isolated scope failed. The scope's resources may leak.
    #[error("failed to release isolated scope for {}: {message}", path.display())]
    Release { path: PathBuf, message: String },

    /// Invalid broker configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Format the error with a recovery hint where one applies.
    pub fn with_hint(&self) -> String {
        match self {
            Error::Invocation(failure) => match failure.kind {
                FailureKind::SpawnFailed(_) => format!(
                    "{}\n\nhint: check that the executable exists and has the execute bit set",
                    self
                ),
                _ => self.to_string(),
            },
            Error::Release { .. } => format!(
                "{}\n\nhint: remove stale shadow copies from the shadow directory (GENEXEC_SHADOW_DIR)",
                self
            ),
            Error::Config(_) => format!(
                "{}\n\nhint: GENEXEC_CACHE_SIZE must be at least 1 and GENEXEC_IDLE_SECS a whole number",
                self
            ),
        }
    }

    /// The invocation failure, if this error is one.
    pub fn as_invocation(&self) -> Option<&InvocationFailure> {
        match self {
            Error::Invocation(failure) => Some(failure),
            _ => None,
        }
    }
}

impl From<InvocationFailure> for Error {
    fn from(failure: InvocationFailure) -> Self {
        Error::Invocation(failure)
    }
}

/// How a generator run went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Finished with a nonzero exit status.
    ExitCode(i32),
    /// Child process ended without an exit code.
    Signaled,
    /// In-process entry point panicked.
    Panicked(String),
    /// Child process could not be spawned.
    SpawnFailed(String),
}

/// A failed generator invocation.
///
/// `command` is already redacted: it holds the executable and only the logged
/// arguments, so the failure is safe to print.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationFailure {
    pub description: String,
    pub command: String,
    pub kind: FailureKind,
    /// Combined stdout/stderr of a subprocess run. `None` for in-process runs,
    /// whose output already went to the host's own streams.
    pub output: Option<String>,
}

impl InvocationFailure {
    /// Exit code, if the generator produced one.
    pub fn exit_code(&self) -> Option<i32> {
        match self.kind {
            FailureKind::ExitCode(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for InvocationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Failed to {}. The command '{}' ",
            self.description, self.command
        )?;
        match &self.kind {
            FailureKind::ExitCode(code) => write!(f, "failed with exit code {}.", code)?,
            FailureKind::Signaled => write!(f, "was terminated by a signal.")?,
            FailureKind::Panicked(message) => write!(f, "failed: {}.", message)?,
            FailureKind::SpawnFailed(message) => write!(f, "could not be started: {}.", message)?,
        }
        if let Some(output) = &self.output {
            write!(f, " Output:\n{}", output)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(kind: FailureKind, output: Option<&str>) -> InvocationFailure {
        InvocationFailure {
            description: "generate code".to_string(),
            command: "/tmp/gen --verbose".to_string(),
            kind,
            output: output.map(str::to_string),
        }
    }

    #[test]
    fn test_subprocess_failure_message() {
        let f = failure(FailureKind::ExitCode(2), Some("boom\n"));
        assert_eq!(
            f.to_string(),
            "Failed to generate code. The command '/tmp/gen --verbose' failed with exit code 2. Output:\nboom\n"
        );
        assert_eq!(f.exit_code(), Some(2));
    }

    #[test]
    fn test_in_process_failure_omits_output() {
        let f = failure(FailureKind::ExitCode(1), None);
        assert_eq!(
            f.to_string(),
            "Failed to generate code. The command '/tmp/gen --verbose' failed with exit code 1."
        );
    }

    #[test]
    fn test_panic_failure_message() {
        let f = failure(FailureKind::Panicked("index out of bounds".to_string()), None);
        assert!(f.to_string().contains("failed: index out of bounds."));
        assert_eq!(f.exit_code(), None);
    }

    #[test]
    fn test_error_display_is_failure_message() {
        let err = Error::from(failure(FailureKind::Signaled, Some("")));
        assert!(err.to_string().starts_with("Failed to generate code."));
        assert!(err.as_invocation().is_some());
    }

    #[test]
    fn test_spawn_failure_hint() {
        let err = Error::from(failure(FailureKind::SpawnFailed("not found".to_string()), None));
        assert!(err.with_hint().contains("hint:"));
    }

    #[test]
    fn test_non_invocation_errors_carry_hints() {
        let release = Error::Release {
            path: PathBuf::from("/tmp/genexec-shadow/gen.so"),
            message: "busy".to_string(),
        };
        assert!(release.with_hint().contains("GENEXEC_SHADOW_DIR"));
        assert!(release.as_invocation().is_none());

        let config = Error::Config("max_entries must be at least 1".to_string());
        assert!(config.with_hint().contains("GENEXEC_CACHE_SIZE"));
    }
}

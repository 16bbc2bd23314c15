//! Subprocess execution.
//!
//! The fallback path: spawn the executable with the combined arguments,
//! capture stdout and stderr into one buffer, and wait for it to exit.

use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Mutex, PoisonError};
use std::thread;

use crate::error::{FailureKind, InvocationFailure, Result};

use super::args::CommandArgs;

/// What a finished child process left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    /// Interleaved stdout and stderr.
    pub output: Vec<u8>,
}

/// Spawns child processes. Swappable so the broker can be tested without
/// real executables.
pub trait ProcessLauncher: Send + Sync {
    /// Run `executable` with `args` to completion.
    fn run(&self, executable: &Path, args: &[String]) -> io::Result<ProcessOutput>;
}

/// Launcher backed by [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn run(&self, executable: &Path, args: &[String]) -> io::Result<ProcessOutput> {
        let mut child = Command::new(executable)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let output = match drain(&mut child) {
            Ok(output) => output,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(e);
            }
        };

        let status = child.wait()?;
        Ok(ProcessOutput {
            exit_code: status.code(),
            output,
        })
    }
}

/// Read stdout and stderr concurrently into one buffer until both close.
fn drain(child: &mut Child) -> io::Result<Vec<u8>> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let buffer = Mutex::new(Vec::new());

    thread::scope(|s| {
        let err_reader = s.spawn(|| copy_into(stderr, &buffer));
        let out_result = copy_into(stdout, &buffer);
        let err_result = err_reader
            .join()
            .unwrap_or_else(|_| Err(io::Error::other("stderr reader panicked")));
        out_result.and(err_result)
    })?;

    Ok(buffer.into_inner().unwrap_or_else(PoisonError::into_inner))
}

fn copy_into(source: Option<impl Read>, buffer: &Mutex<Vec<u8>>) -> io::Result<()> {
    let Some(mut source) = source else {
        return Ok(());
    };
    let mut chunk = [0u8; 8192];
    loop {
        match source.read(&mut chunk) {
            Ok(0) => return Ok(()),
            Ok(n) => buffer
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// Run `executable` as a child process and translate its exit status.
///
/// Only the logged arguments appear in the log line and in any failure.
pub fn run(
    launcher: &dyn ProcessLauncher,
    executable: &Path,
    description: &str,
    args: &CommandArgs<'_>,
) -> Result<()> {
    tracing::info!(
        executable = %executable.display(),
        args = ?args.logged,
        "Running {} in a subprocess",
        description
    );

    let failure = |kind, output| InvocationFailure {
        description: description.to_string(),
        command: args.display_command(executable),
        kind,
        output,
    };

    let result = match launcher.run(executable, &args.combined()) {
        Ok(result) => result,
        Err(e) => return Err(failure(FailureKind::SpawnFailed(e.to_string()), None).into()),
    };

    let output = String::from_utf8_lossy(&result.output).into_owned();
    match result.exit_code {
        Some(0) => {
            tracing::debug!(executable = %executable.display(), "Subprocess finished");
            Ok(())
        }
        Some(code) => Err(failure(FailureKind::ExitCode(code), Some(output)).into()),
        None => Err(failure(FailureKind::Signaled, Some(output)).into()),
    }
}

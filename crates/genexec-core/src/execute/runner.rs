//! Runs an invocation through an execution context.

use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

use crate::error::{FailureKind, InvocationFailure, Result};
use crate::load::exit::{exit_status, panic_message};

use super::args::CommandArgs;
use super::context::{ExecutionContext, InProcessContext};
use super::process::{self, ProcessLauncher};

/// Result of one attempt to run through a context.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// The program ran; success or a translated failure.
    Finished(Result<()>),
    /// The context was released before the call could start. Retry with a
    /// fresh one.
    Stale,
}

/// Run one invocation through `context`.
pub(crate) fn invoke(
    context: &ExecutionContext,
    launcher: &dyn ProcessLauncher,
    description: &str,
    args: &CommandArgs<'_>,
) -> Outcome {
    match context {
        ExecutionContext::InProcess(ctx) => run_in_process(ctx, description, args),
        ExecutionContext::Subprocess(_) => Outcome::Finished(process::run(
            launcher,
            context.executable(),
            description,
            args,
        )),
    }
}

fn run_in_process(ctx: &InProcessContext, description: &str, args: &CommandArgs<'_>) -> Outcome {
    // Kept until the end of the call so the scope stays loaded.
    let Some(handle) = ctx.handle() else {
        return Outcome::Stale;
    };

    tracing::info!(
        executable = %ctx.executable().display(),
        entry_point = %ctx.entry_point(),
        args = ?args.logged,
        "Running {} in-process",
        description
    );

    let combined = args.combined_after(ctx.fixed_args());
    let entry = handle.entry();
    let result = panic::catch_unwind(AssertUnwindSafe(|| entry.call(&combined)));

    let kind = match result {
        Ok(Ok(0)) => None,
        Ok(Ok(code)) => Some(FailureKind::ExitCode(code)),
        Ok(Err(message)) => Some(FailureKind::Panicked(message)),
        Err(payload) => match exit_status(&*payload) {
            Some(0) => None,
            Some(code) => Some(FailureKind::ExitCode(code)),
            None => Some(FailureKind::Panicked(panic_message(&*payload))),
        },
    };

    Outcome::Finished(match kind {
        None => {
            tracing::debug!(entry_point = %ctx.entry_point(), "In-process run finished");
            Ok(())
        }
        Some(kind) => Err(failure(ctx.executable(), description, args, kind).into()),
    })
}

fn failure(
    executable: &Path,
    description: &str,
    args: &CommandArgs<'_>,
    kind: FailureKind,
) -> InvocationFailure {
    InvocationFailure {
        description: description.to_string(),
        command: args.display_command(executable),
        kind,
        output: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execute::process::ProcessOutput;
    use crate::introspect::LaunchInfo;
    use crate::load::exit::exit;
    use crate::load::{InProcessHandle, LoadedScope};
    use std::io;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};
    use std::time::SystemTime;

    struct NoopScope;

    impl LoadedScope for NoopScope {
        fn release(&mut self) -> Result<()> {
            Ok(())
        }
    }

    /// Launcher that must never be reached.
    struct NoLauncher;

    impl ProcessLauncher for NoLauncher {
        fn run(&self, _: &Path, _: &[String]) -> io::Result<ProcessOutput> {
            panic!("in-process run spawned a process");
        }
    }

    struct RecordingLauncher(Mutex<Vec<Vec<String>>>);

    impl ProcessLauncher for RecordingLauncher {
        fn run(&self, _: &Path, args: &[String]) -> io::Result<ProcessOutput> {
            self.0.lock().unwrap().push(args.to_vec());
            Ok(ProcessOutput {
                exit_code: Some(0),
                output: Vec::new(),
            })
        }
    }

    fn context(entry: impl crate::load::EntryPoint + 'static) -> ExecutionContext {
        let info = LaunchInfo {
            script: PathBuf::from("/app/bin/gen"),
            app_home: PathBuf::from("/app"),
            entry_point: "com.example.Main".to_string(),
            classpath: Vec::new(),
            fixed_args: vec!["--mode".to_string()],
            runtime_options: Vec::new(),
        };
        let handle = InProcessHandle::new(entry, NoopScope);
        ExecutionContext::in_process("/app/bin/gen", &info, handle, SystemTime::UNIX_EPOCH)
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn finished(outcome: Outcome) -> Result<()> {
        match outcome {
            Outcome::Finished(result) => result,
            Outcome::Stale => panic!("unexpected stale outcome"),
        }
    }

    fn run_with(ctx: &ExecutionContext, unlogged: &[String], logged: &[String]) -> Result<()> {
        finished(invoke(ctx, &NoLauncher, "generate", &CommandArgs::new(unlogged, logged)))
    }

    #[test]
    fn test_normal_return_succeeds_with_fixed_args_first() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let ctx = context(move |args: &[String]| {
            recorder.lock().unwrap().extend_from_slice(args);
            0
        });

        run_with(&ctx, &strings(&["--token", "t"]), &strings(&["out"])).unwrap();
        assert_eq!(*seen.lock().unwrap(), strings(&["--mode", "--token", "t", "out"]));
    }

    #[test]
    fn test_exit_zero_is_success() {
        let ctx = context(|_: &[String]| -> i32 { exit(0) });
        run_with(&ctx, &[], &[]).unwrap();
    }

    #[test]
    fn test_nested_exit_reports_status() {
        fn deep(depth: u32) -> i32 {
            if depth == 0 {
                exit(3);
            }
            deep(depth - 1)
        }
        let ctx = context(|_: &[String]| deep(8));

        let err = run_with(&ctx, &strings(&["--secret"]), &strings(&["-v"])).unwrap_err();
        let failure = err.as_invocation().unwrap();
        assert_eq!(failure.exit_code(), Some(3));
        assert_eq!(failure.output, None);
        assert_eq!(failure.command, "/app/bin/gen <1 unlogged arg> -v");
    }

    #[test]
    fn test_nonzero_return_is_failure() {
        let ctx = context(|_: &[String]| 4);
        let err = run_with(&ctx, &[], &[]).unwrap_err();
        assert_eq!(err.as_invocation().unwrap().exit_code(), Some(4));
    }

    #[test]
    fn test_panic_is_contained() {
        let ctx = context(|_: &[String]| -> i32 { panic!("generator bug") });
        let err = run_with(&ctx, &[], &[]).unwrap_err();
        match &err.as_invocation().unwrap().kind {
            FailureKind::Panicked(message) => assert!(message.contains("generator bug")),
            other => panic!("unexpected failure kind: {:?}", other),
        }
    }

    #[test]
    fn test_released_context_is_stale() {
        let ctx = context(|_: &[String]| 0);
        ctx.release().unwrap();
        let outcome = invoke(&ctx, &NoLauncher, "generate", &CommandArgs::new(&[], &[]));
        assert!(matches!(outcome, Outcome::Stale));
    }

    #[test]
    fn test_subprocess_context_delegates_to_launcher() {
        let launcher = RecordingLauncher(Mutex::new(Vec::new()));
        let ctx = ExecutionContext::subprocess("/tmp/gen");
        let unlogged = strings(&["--token", "t"]);
        let logged = strings(&["out"]);

        finished(invoke(&ctx, &launcher, "generate", &CommandArgs::new(&unlogged, &logged))).unwrap();
        assert_eq!(
            *launcher.0.lock().unwrap(),
            vec![strings(&["--token", "t", "out"])]
        );
    }
}

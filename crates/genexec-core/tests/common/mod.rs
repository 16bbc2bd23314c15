//! Shared helpers for broker integration tests.

#![allow(dead_code)]

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use genexec_core::{
    HostScope, InProcessHandle, IsolatedLoader, LaunchInfo, LoadError, LoadedScope,
    ProcessLauncher, ProcessOutput,
};
use tempfile::TempDir;

/// Launcher script for `entry_point` with one native library on its classpath.
pub fn launcher_script(entry_point: &str) -> String {
    format!(
        r#"#!/bin/sh
APP_HOME=$( cd "${{APP_HOME:-./}}.." && pwd -P ) || exit

CLASSPATH=$APP_HOME/lib/gen.so

set -- \
        -classpath "$CLASSPATH" \
        {entry_point} \
        "$@"

exec "$JAVACMD" "$@"
"#
    )
}

/// A scratch application directory with `bin/` and `lib/`.
pub struct TestApp {
    temp: TempDir,
}

impl TestApp {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp directory");
        fs::create_dir_all(temp.path().join("bin")).expect("Failed to create bin");
        fs::create_dir_all(temp.path().join("lib")).expect("Failed to create lib");
        Self { temp }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Write an executable file under `bin/`.
    pub fn write_bin(&self, name: &str, content: &str) -> PathBuf {
        let path = self.temp.path().join("bin").join(name);
        fs::write(&path, content).expect("Failed to write executable");
        make_executable(&path);
        path
    }

    /// Write a launcher script for `entry_point` as `bin/<name>`.
    pub fn write_launcher(&self, name: &str, entry_point: &str) -> PathBuf {
        self.write_bin(name, &launcher_script(entry_point))
    }
}

#[cfg(unix)]
pub fn make_executable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("Failed to chmod");
}

#[cfg(not(unix))]
pub fn make_executable(_path: &Path) {}

pub fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}

/// Counters shared between a fake loader and the test.
#[derive(Default, Clone)]
pub struct LoadCounters {
    pub loads: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
    pub calls: Arc<Mutex<Vec<Vec<String>>>>,
    /// `$APP_HOME` of every loaded launcher.
    pub app_homes: Arc<Mutex<Vec<PathBuf>>>,
}

impl LoadCounters {
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn app_homes(&self) -> Vec<PathBuf> {
        self.app_homes.lock().unwrap().clone()
    }
}

/// Holds hosted calls passing `--block` until opened.
#[derive(Default, Clone)]
pub struct Gate {
    state: Arc<(Mutex<GateState>, Condvar)>,
}

#[derive(Default)]
struct GateState {
    entered: bool,
    open: bool,
}

/// Upper bound on any wait, so a regression fails instead of hanging.
const GATE_TIMEOUT: Duration = Duration::from_secs(10);

impl Gate {
    /// Called from the hosted program: report entry, then wait for `open`.
    fn pass(&self) {
        let (lock, signal) = &*self.state;
        let mut state = lock.lock().unwrap();
        state.entered = true;
        signal.notify_all();
        let _ = signal
            .wait_timeout_while(state, GATE_TIMEOUT, |s| !s.open)
            .unwrap();
    }

    /// Wait until a call is held at the gate.
    pub fn wait_entered(&self) -> bool {
        let (lock, signal) = &*self.state;
        let state = lock.lock().unwrap();
        let (state, _) = signal
            .wait_timeout_while(state, GATE_TIMEOUT, |s| !s.entered)
            .unwrap();
        state.entered
    }

    pub fn open(&self) {
        let (lock, signal) = &*self.state;
        lock.lock().unwrap().open = true;
        signal.notify_all();
    }
}

struct CountingScope(Arc<AtomicUsize>);

impl LoadedScope for CountingScope {
    fn release(&mut self) -> genexec_core::Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Loader whose hosted program returns `status` after recording its args.
pub struct FakeLoader {
    counters: LoadCounters,
    status: i32,
    gate: Gate,
}

impl FakeLoader {
    pub fn new(counters: &LoadCounters, status: i32) -> Self {
        Self {
            counters: counters.clone(),
            status,
            gate: Gate::default(),
        }
    }

    /// Hold calls passing `--block` at `gate`.
    pub fn gated(mut self, gate: &Gate) -> Self {
        self.gate = gate.clone();
        self
    }
}

impl IsolatedLoader for FakeLoader {
    fn load(&self, info: &LaunchInfo, _host: &HostScope) -> Result<InProcessHandle, LoadError> {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        self.counters.app_homes.lock().unwrap().push(info.app_home.clone());
        let calls = self.counters.calls.clone();
        let gate = self.gate.clone();
        let status = self.status;
        let entry = move |args: &[String]| {
            calls.lock().unwrap().push(args.to_vec());
            if args.iter().any(|a| a == "--block") {
                gate.pass();
            }
            status
        };
        Ok(InProcessHandle::new(
            entry,
            CountingScope(self.counters.releases.clone()),
        ))
    }
}

/// Loader that always refuses.
pub struct FailingLoader(pub Arc<AtomicUsize>);

impl IsolatedLoader for FailingLoader {
    fn load(&self, _info: &LaunchInfo, _host: &HostScope) -> Result<InProcessHandle, LoadError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(LoadError::Other("refused".to_string()))
    }
}

/// Launcher recording every spawn and returning a fixed result.
#[derive(Clone)]
pub struct FakeLauncher {
    pub spawned: Arc<Mutex<Vec<(PathBuf, Vec<String>)>>>,
    exit_code: Option<i32>,
    output: String,
}

impl FakeLauncher {
    pub fn new(exit_code: Option<i32>, output: &str) -> Self {
        Self {
            spawned: Arc::new(Mutex::new(Vec::new())),
            exit_code,
            output: output.to_string(),
        }
    }

    pub fn count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }
}

impl ProcessLauncher for FakeLauncher {
    fn run(&self, executable: &Path, args: &[String]) -> io::Result<ProcessOutput> {
        self.spawned
            .lock()
            .unwrap()
            .push((executable.to_path_buf(), args.to_vec()));
        Ok(ProcessOutput {
            exit_code: self.exit_code,
            output: self.output.as_bytes().to_vec(),
        })
    }
}

//! Launcher script introspection.
//!
//! Decides whether an executable is a start script that launches a program
//! by entry point and classpath, and if so extracts what is needed to host
//! that program directly. Nothing here fails: anything that cannot be read
//! or confidently understood is simply "not a launcher".

mod start_script;

use std::path::{Path, PathBuf};

use serde::Serialize;

pub use start_script::MAX_SCRIPT_BYTES;

/// What a launcher script would start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchInfo {
    /// The script itself.
    pub script: PathBuf,
    /// Application root (`$APP_HOME`), the parent of the script's directory.
    pub app_home: PathBuf,
    /// Dotted entry point name, e.g. `com.example.Main`.
    pub entry_point: String,
    /// Resolved classpath, wildcards expanded, in lookup order.
    pub classpath: Vec<PathBuf>,
    /// Literal arguments the script passes before the caller's arguments.
    pub fixed_args: Vec<String>,
    /// Runtime options from `DEFAULT_JVM_OPTS`. Reported, not applied.
    pub runtime_options: Vec<String>,
}

/// Inspect `path` and return launch information if it is a launcher script.
pub fn inspect(path: &Path) -> Option<LaunchInfo> {
    let content = start_script::read_script(path)?;
    let info = start_script::parse(path, &content);
    match &info {
        Some(info) => tracing::debug!(
            script = %path.display(),
            entry_point = %info.entry_point,
            classpath_len = info.classpath.len(),
            "Recognized launcher script"
        ),
        None => tracing::debug!(script = %path.display(), "Not a launcher script"),
    }
    info
}

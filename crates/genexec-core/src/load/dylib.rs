//! Native library loader.
//!
//! Hosts programs whose classpath contains shared libraries. Every library is
//! loaded from a private shadow copy:
//!
//! 1. Copy the library to a UUID-named file in the shadow directory
//! 2. Load the copy with local symbol visibility
//! 3. Delete the copy when the scope is released
//!
//! Two scopes built from the same artifact therefore never share one loaded
//! image or its globals, and the artifact can be rebuilt on disk while a
//! scope built from it is still alive.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::introspect::LaunchInfo;

use super::ffi::{ArgvBuffer, MainFn, entry_symbol};
use super::scope::{HostScope, SymbolScope};
use super::{EntryPoint, InProcessHandle, IsolatedLoader, LoadError};

/// Loads native classpath entries into an isolated [`SymbolScope`].
pub struct DylibLoader {
    /// Directory for shadow copies.
    shadow_dir: PathBuf,
}

impl DylibLoader {
    /// Create a loader placing shadow copies under `shadow_dir`.
    pub fn new(shadow_dir: impl Into<PathBuf>) -> Self {
        Self {
            shadow_dir: shadow_dir.into(),
        }
    }

    /// Directory holding shadow copies.
    pub fn shadow_dir(&self) -> &Path {
        &self.shadow_dir
    }

    fn populate(&self, scope: &mut SymbolScope, libraries: &[&PathBuf], symbol: &str) -> Result<MainFn, LoadError> {
        for library in libraries {
            let copy = self.shadow_copy(library)?;
            scope.track_shadow_copy(copy.clone());
            scope.push_library(library, &copy)?;
        }

        let hooks = scope.install_exit_hooks();
        tracing::debug!(hooks, libraries = scope.library_count(), "Exit interception installed");

        let address = scope.resolve(symbol).ok_or_else(|| LoadError::EntryNotFound {
            symbol: symbol.to_string(),
        })?;

        // Safety: the exported entry point has the `MainFn` signature per the FFI contract.
        Ok(unsafe { std::mem::transmute::<usize, MainFn>(address) })
    }

    /// Copy `library` to a unique name in the shadow directory.
    fn shadow_copy(&self, library: &Path) -> Result<PathBuf, LoadError> {
        let shadow_error = |source| LoadError::ShadowCopy {
            path: library.to_path_buf(),
            source,
        };

        fs::create_dir_all(&self.shadow_dir).map_err(shadow_error)?;

        let stem = library
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("library");
        let name = match library.extension().and_then(|s| s.to_str()) {
            Some(ext) => format!("{}-{}.{}", stem, Uuid::new_v4(), ext),
            None => format!("{}-{}", stem, Uuid::new_v4()),
        };
        let copy = self.shadow_dir.join(name);

        fs::copy(library, &copy).map_err(shadow_error)?;
        tracing::trace!(
            library = %library.display(),
            copy = %copy.display(),
            "Created shadow copy"
        );
        Ok(copy)
    }
}

impl IsolatedLoader for DylibLoader {
    fn load(&self, info: &LaunchInfo, host: &HostScope) -> Result<InProcessHandle, LoadError> {
        let libraries: Vec<&PathBuf> = info
            .classpath
            .iter()
            .filter(|entry| is_native_library(entry))
            .collect();
        if libraries.is_empty() {
            return Err(LoadError::NoNativeEntries {
                script: info.script.clone(),
            });
        }

        let symbol = entry_symbol(&info.entry_point);
        let mut scope = SymbolScope::new(info.script.clone(), host.clone());

        match self.populate(&mut scope, &libraries, &symbol) {
            Ok(main) => Ok(InProcessHandle::new(DylibEntry { main, symbol }, scope)),
            Err(e) => {
                // Nothing from a failed load may stay open.
                if let Err(release_error) = scope.release() {
                    tracing::warn!("{}", release_error);
                }
                Err(e)
            }
        }
    }
}

/// Resolved entry point of a hosted library.
struct DylibEntry {
    main: MainFn,
    symbol: String,
}

impl EntryPoint for DylibEntry {
    fn call(&self, args: &[String]) -> Result<i32, String> {
        let argv = ArgvBuffer::new(args)?;
        tracing::trace!(symbol = %self.symbol, argc = argv.argc(), "Calling entry point");

        // Safety: `main` was resolved from a library its handle keeps open, and
        // `argv` outlives the call.
        let status = unsafe { (self.main)(argv.argc(), argv.as_ptr()) };
        Ok(status)
    }
}

/// Whether a classpath entry is a shared library for this platform family.
pub fn is_native_library(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    match path.extension().and_then(|e| e.to_str()) {
        Some("so" | "dylib" | "dll") => true,
        // Versioned sonames such as libgen.so.1
        _ => name.contains(".so."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn launch_info(temp: &TempDir, classpath: Vec<PathBuf>) -> LaunchInfo {
        LaunchInfo {
            script: temp.path().join("bin/gen"),
            app_home: temp.path().to_path_buf(),
            entry_point: "com.example.Main".to_string(),
            classpath,
            fixed_args: Vec::new(),
            runtime_options: Vec::new(),
        }
    }

    fn shadow_files(dir: &Path) -> usize {
        fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
    }

    #[test]
    fn test_native_library_detection() {
        assert!(is_native_library(Path::new("lib/libgen.so")));
        assert!(is_native_library(Path::new("lib/libgen.so.1")));
        assert!(is_native_library(Path::new("lib/gen.dylib")));
        assert!(is_native_library(Path::new("lib/gen.dll")));
        assert!(!is_native_library(Path::new("lib/gen.jar")));
        assert!(!is_native_library(Path::new("lib/classes")));
    }

    #[test]
    fn test_jar_only_classpath_is_not_loadable() {
        let temp = TempDir::new().unwrap();
        let loader = DylibLoader::new(temp.path().join("shadow"));
        let info = launch_info(&temp, vec![temp.path().join("lib/gen.jar")]);

        let err = loader.load(&info, &HostScope::default()).err().unwrap();
        assert!(matches!(err, LoadError::NoNativeEntries { .. }));
    }

    #[test]
    fn test_missing_library_fails_without_leaving_copies() {
        let temp = TempDir::new().unwrap();
        let shadow = temp.path().join("shadow");
        let loader = DylibLoader::new(&shadow);
        let info = launch_info(&temp, vec![temp.path().join("lib/libgen.so")]);

        let err = loader.load(&info, &HostScope::default()).err().unwrap();
        assert!(matches!(err, LoadError::ShadowCopy { .. }));
        assert_eq!(shadow_files(&shadow), 0);
    }

    #[test]
    fn test_unloadable_library_releases_shadow_copy() {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("lib")).unwrap();
        let library = temp.path().join("lib/libgen.so");
        fs::write(&library, b"not an object file").unwrap();

        let shadow = temp.path().join("shadow");
        let loader = DylibLoader::new(&shadow);
        let info = launch_info(&temp, vec![library]);

        let err = loader.load(&info, &HostScope::default()).err().unwrap();
        assert!(matches!(err, LoadError::Open { .. }));
        assert_eq!(shadow_files(&shadow), 0);
    }
}

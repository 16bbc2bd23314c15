//! Layered symbol resolution.
//!
//! A [`SymbolScope`] is an explicit lookup chain: the scope's own libraries
//! in classpath order, then the [`HostScope`] layer. The host layer only
//! exposes shared infrastructure symbols, so a hosted program never sees
//! anything else from the host and never sees another scope at all.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use libloading::Library;
use rustc_hash::FxHashMap;

use crate::error::{Error, Result};

use super::LoadError;
use super::exit::intercepted_exit;
use super::ffi::{EXIT_HOOK_SYMBOL, HOST_EXIT_SYMBOL};

/// Symbols the host shares with every scope.
#[derive(Debug, Clone)]
pub struct HostScope {
    symbols: FxHashMap<String, usize>,
}

impl Default for HostScope {
    fn default() -> Self {
        let mut symbols = FxHashMap::default();
        symbols.insert(HOST_EXIT_SYMBOL.to_string(), intercepted_exit as usize);
        Self { symbols }
    }
}

impl HostScope {
    #[cfg(test)]
    pub(crate) fn with_symbol(mut self, name: impl Into<String>, address: usize) -> Self {
        self.symbols.insert(name.into(), address);
        self
    }

    /// Look up a shared symbol.
    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.symbols.get(name).copied()
    }

    /// Address of the exit interceptor.
    pub fn exit_hook(&self) -> usize {
        self.resolve(HOST_EXIT_SYMBOL)
            .unwrap_or(intercepted_exit as usize)
    }
}

/// One loaded library in a scope.
struct LibraryLayer {
    /// Classpath entry the library came from.
    original: PathBuf,
    library: Library,
}

/// Isolated, child-first symbol scope owning its libraries and shadow copies.
pub struct SymbolScope {
    /// Launcher script this scope was built for (used in errors).
    owner: PathBuf,
    layers: Vec<LibraryLayer>,
    host: HostScope,
    shadow_copies: Vec<PathBuf>,
}

impl SymbolScope {
    /// Create an empty scope falling back to `host`.
    pub fn new(owner: impl Into<PathBuf>, host: HostScope) -> Self {
        Self {
            owner: owner.into(),
            layers: Vec::new(),
            host,
            shadow_copies: Vec::new(),
        }
    }

    /// Record a shadow copy so release deletes it.
    pub(crate) fn track_shadow_copy(&mut self, path: PathBuf) {
        self.shadow_copies.push(path);
    }

    /// Open `load_path` with local symbol visibility and append it to the chain.
    pub fn push_library(&mut self, original: &Path, load_path: &Path) -> std::result::Result<(), LoadError> {
        let library = open_local(load_path).map_err(|source| LoadError::Open {
            path: original.to_path_buf(),
            source,
        })?;
        tracing::debug!(
            library = %original.display(),
            loaded_from = %load_path.display(),
            "Loaded library into isolated scope"
        );
        self.layers.push(LibraryLayer {
            original: original.to_path_buf(),
            library,
        });
        Ok(())
    }

    /// Number of libraries in the scope.
    pub(crate) fn library_count(&self) -> usize {
        self.layers.len()
    }

    /// Resolve `name`: own libraries first, then the host layer.
    pub fn resolve(&self, name: &str) -> Option<usize> {
        self.layers
            .iter()
            .find_map(|layer| symbol_address(&layer.library, name))
            .or_else(|| self.host.resolve(name))
    }

    /// Point every exported exit hook slot at the host's interceptor.
    ///
    /// Returns how many libraries carried a slot.
    pub fn install_exit_hooks(&self) -> usize {
        let hook = self.host.exit_hook();
        let mut installed = 0;
        for layer in &self.layers {
            if let Some(address) = symbol_address(&layer.library, EXIT_HOOK_SYMBOL) {
                // Safety: the slot is exported as an `AtomicUsize` per the FFI contract.
                let slot = unsafe { &*(address as *const AtomicUsize) };
                slot.store(hook, Ordering::SeqCst);
                installed += 1;
                tracing::trace!(library = %layer.original.display(), "Installed exit hook");
            }
        }
        installed
    }

    /// Close all libraries (last loaded first) and delete shadow copies.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn release(&mut self) -> Result<()> {
        let mut first_error: Option<String> = None;

        while let Some(layer) = self.layers.pop() {
            if let Err(e) = layer.library.close() {
                tracing::error!(library = %layer.original.display(), error = %e, "Failed to close library");
                first_error.get_or_insert_with(|| {
                    format!("closing {}: {}", layer.original.display(), e)
                });
            }
        }

        for copy in self.shadow_copies.drain(..) {
            match fs::remove_file(&copy) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::error!(copy = %copy.display(), error = %e, "Failed to delete shadow copy");
                    first_error.get_or_insert_with(|| {
                        format!("deleting shadow copy {}: {}", copy.display(), e)
                    });
                }
            }
        }

        match first_error {
            None => Ok(()),
            Some(message) => Err(Error::Release {
                path: self.owner.clone(),
                message,
            }),
        }
    }
}

impl Drop for SymbolScope {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::warn!("{}", e);
        }
    }
}

fn symbol_address(library: &Library, name: &str) -> Option<usize> {
    // Safety: the address is only read here, never called or dereferenced.
    let symbol = unsafe { library.get::<*const ()>(name.as_bytes()) }.ok()?;
    let address = *symbol as usize;
    (address != 0).then_some(address)
}

#[cfg(unix)]
fn open_local(path: &Path) -> std::result::Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_LOCAL, RTLD_NOW};

    // Safety: running library initializers is inherent to hosting the program.
    unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_LOCAL) }.map(Library::from)
}

#[cfg(not(unix))]
fn open_local(path: &Path) -> std::result::Result<Library, libloading::Error> {
    // Safety: running library initializers is inherent to hosting the program.
    unsafe { Library::new(path) }
}

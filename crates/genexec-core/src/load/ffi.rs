//! FFI contract between the broker and hosted libraries.
//!
//! A hostable program is a set of shared libraries. One of them exports the
//! entry point for its dotted name (see [`entry_symbol`]):
//!
//! ```text
//! extern "C-unwind" fn com_example_Main_main(argc: usize, argv: *const *const c_char) -> c_int
//! ```
//!
//! `argv` holds the arguments only (no program name). The return value is
//! the exit status. Any library in the scope may export the exit hook slot
//!
//! ```text
//! static GENEXEC_EXIT_HOOK: AtomicUsize
//! ```
//!
//! which the loader fills with the address of an [`ExitFn`]. Code that wants
//! to exit calls through the slot; when it is still zero the library is not
//! hosted and may exit normally. Libraries should catch their own panics and
//! return a nonzero status instead of unwinding into the host.

use std::ffi::{CString, c_char, c_int};

/// Entry point signature.
pub type MainFn = unsafe extern "C-unwind" fn(argc: usize, argv: *const *const c_char) -> c_int;

/// Exit interceptor signature stored in the hook slot.
pub type ExitFn = extern "C-unwind" fn(status: c_int) -> !;

/// Exported data symbol holding the exit interceptor's address.
pub const EXIT_HOOK_SYMBOL: &str = "GENEXEC_EXIT_HOOK";

/// Host-provided symbol for the exit interceptor.
pub const HOST_EXIT_SYMBOL: &str = "genexec_exit";

/// Symbol name of the entry point for a dotted name.
///
/// `com.example.Main` becomes `com_example_Main_main`.
pub fn entry_symbol(entry_point: &str) -> String {
    let mut symbol: String = entry_point
        .chars()
        .map(|c| if c == '.' || c == '$' { '_' } else { c })
        .collect();
    symbol.push_str("_main");
    symbol
}

/// NUL-terminated copies of the arguments plus the pointer array handed to
/// the entry point. Must outlive the call.
pub(crate) struct ArgvBuffer {
    _strings: Vec<CString>,
    pointers: Vec<*const c_char>,
}

impl ArgvBuffer {
    pub(crate) fn new(args: &[String]) -> Result<Self, String> {
        let strings = args
            .iter()
            .map(|arg| {
                CString::new(arg.as_str())
                    .map_err(|_| "argument contains an interior NUL byte".to_string())
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mut pointers: Vec<*const c_char> = strings.iter().map(|s| s.as_ptr()).collect();
        pointers.push(std::ptr::null());
        Ok(Self {
            _strings: strings,
            pointers,
        })
    }

    pub(crate) fn argc(&self) -> usize {
        self.pointers.len() - 1
    }

    pub(crate) fn as_ptr(&self) -> *const *const c_char {
        self.pointers.as_ptr()
    }
}

//! Sample generator that genexec can host in-process.
//!
//! Exports `com_example_Main_main` and the `GENEXEC_EXIT_HOOK` slot. The
//! first argument picks what the generator does:
//!
//! - `return N` - return status `N`
//! - `exit N` - exit with status `N` through the hook
//! - `record PATH ARGS...` - write the call count and `ARGS` to `PATH`
//! - `panic` - panic; caught here and reported as status 101

use std::ffi::{CStr, c_char, c_int};
use std::fs;
use std::panic;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Filled by the host with its exit interceptor. Zero when run standalone.
#[unsafe(no_mangle)]
pub static GENEXEC_EXIT_HOOK: AtomicUsize = AtomicUsize::new(0);

/// Calls made into this loaded image.
static CALLS: AtomicUsize = AtomicUsize::new(0);

enum Action {
    Return(c_int),
    Exit(c_int),
}

/// Entry point for `com.example.Main`.
///
/// # Safety
///
/// `argv` must point to `argc` valid NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C-unwind" fn com_example_Main_main(
    argc: usize,
    argv: *const *const c_char,
) -> c_int {
    // Safety: guaranteed by the caller.
    let args = unsafe { collect_args(argc, argv) };
    let calls = CALLS.fetch_add(1, Ordering::SeqCst) + 1;

    // Exiting happens outside `catch_unwind`: the host's unwind must pass
    // through this frame untouched.
    match panic::catch_unwind(|| run(&args, calls)) {
        Ok(Action::Return(status)) => status,
        Ok(Action::Exit(status)) => exit(status),
        Err(_) => 101,
    }
}

fn run(args: &[String], calls: usize) -> Action {
    match args.first().map(String::as_str) {
        Some("return") => Action::Return(status_arg(args)),
        Some("exit") => Action::Exit(status_arg(args)),
        Some("record") => match args.get(1) {
            Some(path) => {
                let mut content = format!("calls={}\n", calls);
                for arg in &args[2..] {
                    content.push_str(arg);
                    content.push('\n');
                }
                match fs::write(path, content) {
                    Ok(()) => Action::Return(0),
                    Err(e) => {
                        eprintln!("record: {}", e);
                        Action::Return(1)
                    }
                }
            }
            None => Action::Return(2),
        },
        Some("panic") => panic!("fixture asked to panic"),
        Some(other) => {
            eprintln!("unknown command: {}", other);
            Action::Return(2)
        }
        None => Action::Return(0),
    }
}

fn status_arg(args: &[String]) -> c_int {
    args.get(1).and_then(|s| s.parse().ok()).unwrap_or(1)
}

/// Exit through the host's interceptor when hosted, otherwise for real.
fn exit(status: c_int) -> ! {
    let hook = GENEXEC_EXIT_HOOK.load(Ordering::SeqCst);
    if hook == 0 {
        std::process::exit(status);
    }
    // Safety: the host stores the address of an
    // `extern "C-unwind" fn(c_int) -> !` in the slot.
    let hook = unsafe { std::mem::transmute::<usize, extern "C-unwind" fn(c_int) -> !>(hook) };
    hook(status)
}

/// # Safety
///
/// `argv` must point to `argc` valid NUL-terminated strings.
unsafe fn collect_args(argc: usize, argv: *const *const c_char) -> Vec<String> {
    if argv.is_null() {
        return Vec::new();
    }
    (0..argc)
        .map(|i| {
            // Safety: `i < argc` and each pointer is a valid C string.
            let arg = unsafe { CStr::from_ptr(*argv.add(i)) };
            arg.to_string_lossy().into_owned()
        })
        .collect()
}

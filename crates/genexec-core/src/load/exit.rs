//! Exit interception.
//!
//! Hosted programs expect to end the process when they are done. Inside the
//! broker that would take the whole build down, so exiting is turned into an
//! unwind carrying the requested status, caught at the call boundary.

use std::any::Any;
use std::ffi::c_int;

/// Unwind payload raised in place of a process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitRequest {
    pub status: i32,
}

/// Exit a hosted program with `status`.
///
/// Unwinds to the broker's call boundary instead of terminating the process.
/// Uses `resume_unwind` so the panic hook does not print anything.
pub fn exit(status: i32) -> ! {
    std::panic::resume_unwind(Box::new(ExitRequest { status }))
}

/// Interceptor installed into hosted libraries' exit hook slot.
pub extern "C-unwind" fn intercepted_exit(status: c_int) -> ! {
    exit(status)
}

/// Status carried by an unwind payload, if it is an [`ExitRequest`].
pub(crate) fn exit_status(payload: &(dyn Any + Send)) -> Option<i32> {
    payload.downcast_ref::<ExitRequest>().map(|request| request.status)
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("entry point panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("entry point panicked: {}", message)
    } else {
        "entry point panicked".to_string()
    }
}

//! Running generators.
//!
//! # Architecture
//!
//! ```text
//! ExecutionContext
//!     │
//!     ├── InProcess
//!     │       └── runner: read lock on handle → EntryPoint::call
//!     │               ├── catch_unwind → ExitRequest status
//!     │               └── fixed args, then unlogged, then logged
//!     │
//!     └── Subprocess
//!             └── process::run → ProcessLauncher (SystemLauncher)
//!                     └── combined stdout/stderr in failures
//! ```
//!
//! # Module Structure
//!
//! - `args` - logged/unlogged argument split and redacted display
//! - `context` - cached execution contexts and their validity
//! - `process` - subprocess fallback
//! - `runner` - dispatch and status translation

mod args;
mod context;
pub mod process;
pub(crate) mod runner;

pub use args::CommandArgs;
pub use context::{ExecutionContext, InProcessContext, SubprocessContext, modified_time};
pub use process::{ProcessLauncher, ProcessOutput, SystemLauncher};

//! Argument lists split by whether they may be printed.

use std::path::Path;

/// Arguments for one invocation.
///
/// `unlogged` arguments (credentials, tokens) are passed to the program but
/// never printed; `logged` ones may appear in logs and failure messages.
#[derive(Debug, Clone, Copy)]
pub struct CommandArgs<'a> {
    pub unlogged: &'a [String],
    pub logged: &'a [String],
}

impl<'a> CommandArgs<'a> {
    pub fn new(unlogged: &'a [String], logged: &'a [String]) -> Self {
        Self { unlogged, logged }
    }

    /// Unlogged arguments followed by logged ones.
    pub fn combined(&self) -> Vec<String> {
        self.combined_after(&[])
    }

    /// `prefix`, then unlogged, then logged arguments.
    pub fn combined_after(&self, prefix: &[String]) -> Vec<String> {
        let mut combined =
            Vec::with_capacity(prefix.len() + self.unlogged.len() + self.logged.len());
        combined.extend_from_slice(prefix);
        combined.extend_from_slice(self.unlogged);
        combined.extend_from_slice(self.logged);
        combined
    }

    /// Printable command line: the executable, a placeholder counting the
    /// unlogged arguments, and the logged arguments verbatim.
    pub fn display_command(&self, executable: &Path) -> String {
        let mut parts = vec![executable.display().to_string()];
        match self.unlogged.len() {
            0 => {}
            1 => parts.push("<1 unlogged arg>".to_string()),
            n => parts.push(format!("<{} unlogged args>", n)),
        }
        parts.extend(self.logged.iter().cloned());
        parts.join(" ")
    }
}

//! Parser for POSIX shell start scripts.
//!
//! Understands the layout produced by common application packagers:
//!
//! ```text
//! #!/bin/sh
//! APP_HOME=...                       (computed at runtime, ignored here)
//! DEFAULT_JVM_OPTS='"-Xmx64m"'
//! CLASSPATH=$APP_HOME/lib/gen.so:$APP_HOME/lib/*
//! ...
//! set -- \
//!         -classpath "$CLASSPATH" \
//!         com.example.Main \
//!         "$@"
//! ```
//!
//! `$APP_HOME` is taken to be the parent of the script's directory, which is
//! where packagers put `bin/`.

use std::fs;
use std::path::{Path, PathBuf};

use super::LaunchInfo;

/// Scripts larger than this are not considered launchers.
pub const MAX_SCRIPT_BYTES: u64 = 1024 * 1024;

const ARGS_MARKERS: &[&str] = &["$@", "$APP_ARGS", "${APP_ARGS}"];
const CLASSPATH_REFS: &[&str] = &["$CLASSPATH", "${CLASSPATH}"];

/// Read a candidate script. `None` for anything that is not a small UTF-8
/// file starting with a shebang.
pub(super) fn read_script(path: &Path) -> Option<String> {
    let metadata = fs::metadata(path).ok()?;
    if !metadata.is_file() || metadata.len() > MAX_SCRIPT_BYTES {
        return None;
    }
    let bytes = fs::read(path).ok()?;
    if !bytes.starts_with(b"#!") {
        return None;
    }
    String::from_utf8(bytes).ok()
}

/// Parse script content. `script` locates relative classpath entries.
pub(super) fn parse(script: &Path, content: &str) -> Option<LaunchInfo> {
    let script_dir = script.parent().unwrap_or(Path::new("."));
    let app_home = script_dir.parent().unwrap_or(script_dir).to_path_buf();

    let joined = content.replace("\\\r\n", " ").replace("\\\n", " ");
    let lines: Vec<&str> = joined.lines().collect();

    let raw_classpath = single_assignment(&lines, "CLASSPATH")?;
    let classpath = resolve_classpath(&raw_classpath, script_dir, &app_home)?;
    let (entry_point, fixed_args) = launch_command(&lines)?;

    let runtime_options = match single_assignment(&lines, "DEFAULT_JVM_OPTS") {
        Some(raw) => split_options(&raw)?,
        None => Vec::new(),
    };

    Some(LaunchInfo {
        script: script.to_path_buf(),
        app_home,
        entry_point,
        classpath,
        fixed_args,
        runtime_options,
    })
}

/// Value of the one unindented `NAME=` assignment, unquoted.
///
/// Indented assignments belong to platform-specific branches and are skipped.
/// More than one top-level assignment is ambiguous.
fn single_assignment(lines: &[&str], name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    let mut found = lines.iter().filter_map(|line| line.strip_prefix(prefix.as_str()));

    let raw = found.next()?;
    if found.next().is_some() {
        return None;
    }
    Some(unquote(raw.trim()).to_string())
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

fn resolve_classpath(raw: &str, script_dir: &Path, app_home: &Path) -> Option<Vec<PathBuf>> {
    let home = app_home.to_string_lossy();
    let mut classpath = Vec::new();

    for entry in raw.split(':').filter(|e| !e.is_empty()) {
        let expanded = entry
            .replace("${APP_HOME}", &home)
            .replace("$APP_HOME", &home);
        if expanded.contains('$') {
            return None;
        }

        let path = PathBuf::from(&expanded);
        let path = if path.is_absolute() {
            path
        } else {
            script_dir.join(path)
        };

        if path.file_name().is_some_and(|name| name == "*") {
            classpath.extend(expand_wildcard(path.parent()?)?);
        } else {
            classpath.push(path);
        }
    }

    Some(classpath)
}

/// Regular files of `dir`, sorted by name.
fn expand_wildcard(dir: &Path) -> Option<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_ok_and(|t| t.is_file()))
        .map(|entry| entry.path())
        .collect();
    files.sort();
    Some(files)
}

/// Find the command that starts the program: entry point and fixed arguments.
fn launch_command(lines: &[&str]) -> Option<(String, Vec<String>)> {
    for line in lines {
        let trimmed = line.trim_start();
        if trimmed.starts_with('#') {
            continue;
        }
        if !trimmed.contains("-classpath") && !trimmed.contains("-cp") {
            continue;
        }
        let Ok(tokens) = shell_words::split(trimmed) else {
            continue;
        };
        let Some(flag) = tokens.iter().position(|t| t == "-classpath" || t == "-cp") else {
            continue;
        };
        return command_after_flag(&tokens[flag + 1..]);
    }
    None
}

fn command_after_flag(tokens: &[String]) -> Option<(String, Vec<String>)> {
    let (classpath_ref, rest) = tokens.split_first()?;
    if !CLASSPATH_REFS.contains(&classpath_ref.trim_matches('"')) {
        return None;
    }

    let (entry_point, rest) = rest.split_first()?;
    if !is_entry_point_name(entry_point) {
        return None;
    }

    let mut fixed_args = Vec::new();
    for token in rest {
        if ARGS_MARKERS.contains(&token.trim_matches('"')) {
            return Some((entry_point.clone(), fixed_args));
        }
        if token.contains('$') {
            return None;
        }
        fixed_args.push(token.clone());
    }
    // No place for the caller's arguments.
    None
}

fn is_entry_point_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('.').all(|segment| {
            let mut chars = segment.chars();
            chars
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
        })
}

/// `'"-Xmx64m" "-Xms64m"'` style option lists are quoted twice.
fn split_options(raw: &str) -> Option<Vec<String>> {
    let mut options = Vec::new();
    for word in shell_words::split(raw).ok()? {
        options.extend(shell_words::split(&word).ok()?);
    }
    Some(options)
}

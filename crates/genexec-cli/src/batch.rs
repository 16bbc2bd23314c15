//! Batch command implementation for genexec CLI.
//!
//! Runs a JSON list of invocations concurrently through one shared broker:
//!
//! ```json
//! [
//!   { "description": "generate client", "executable": "bin/gen", "args": ["--out", "client"] },
//!   { "executable": "bin/gen", "unlogged": ["--token", "..."], "args": ["--out", "server"] }
//! ]
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use genexec_core::ExecBroker;
use serde::Deserialize;

use crate::colors;

#[derive(Debug, Deserialize)]
struct Invocation {
    #[serde(default = "default_description")]
    description: String,
    executable: PathBuf,
    #[serde(default)]
    unlogged: Vec<String>,
    #[serde(default)]
    args: Vec<String>,
}

fn default_description() -> String {
    "run generator".to_string()
}

/// Run every invocation in `file`; fails if any of them failed.
pub async fn execute(broker: Arc<ExecBroker>, file: &str) -> anyhow::Result<()> {
    let start = Instant::now();
    let content = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read batch file '{}'", file))?;
    let invocations = parse(&content).with_context(|| format!("invalid batch file '{}'", file))?;
    let total = invocations.len();

    let tasks: Vec<_> = invocations
        .into_iter()
        .enumerate()
        .map(|(index, invocation)| {
            let broker = broker.clone();
            tokio::task::spawn_blocking(move || {
                let result = broker.exec(
                    &invocation.description,
                    &invocation.executable,
                    &invocation.unlogged,
                    &invocation.args,
                );
                (index, invocation.executable, result)
            })
        })
        .collect();

    let mut failed = 0;
    for task in tasks {
        let (index, executable, result) = task.await.context("invocation task panicked")?;
        match result {
            Ok(()) => println!(
                "{}ok{}     [{}] {}",
                colors::GREEN,
                colors::RESET,
                index,
                executable.display()
            ),
            Err(e) => {
                failed += 1;
                println!(
                    "{}FAILED{} [{}] {}\n  {}",
                    colors::RED,
                    colors::RESET,
                    index,
                    executable.display(),
                    e
                );
            }
        }
    }

    println!(
        "\n{} invocations, {} failed in {:.2}s",
        total,
        failed,
        start.elapsed().as_secs_f64()
    );

    if failed > 0 {
        anyhow::bail!("{} of {} invocations failed", failed, total);
    }
    Ok(())
}

fn parse(content: &str) -> serde_json::Result<Vec<Invocation>> {
    serde_json::from_str(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_defaults() {
        let invocations = parse(r#"[{"executable": "bin/gen"}]"#).unwrap();
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].description, "run generator");
        assert!(invocations[0].unlogged.is_empty());
        assert!(invocations[0].args.is_empty());
    }

    #[test]
    fn test_parse_full_entry() {
        let invocations = parse(
            r#"[{"description": "generate client", "executable": "/opt/gen",
                 "unlogged": ["--token", "t"], "args": ["--out", "client"]}]"#,
        )
        .unwrap();
        assert_eq!(invocations[0].description, "generate client");
        assert_eq!(invocations[0].unlogged, vec!["--token", "t"]);
        assert_eq!(invocations[0].args, vec!["--out", "client"]);
    }

    #[test]
    fn test_parse_rejects_missing_executable() {
        assert!(parse(r#"[{"args": []}]"#).is_err());
    }
}

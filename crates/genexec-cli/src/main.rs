//! genexec CLI - run code generators through the execution broker.

mod batch;
mod colors;
mod inspect;
mod run;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use genexec_core::{BrokerConfig, ExecBroker};

#[derive(Parser)]
#[command(name = "genexec")]
#[command(about = "Run code generators, in-process when possible")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Always run generators as subprocesses
    #[arg(long, global = true)]
    no_in_process: bool,

    /// Maximum number of cached execution contexts
    #[arg(long, global = true, value_name = "N")]
    cache_size: Option<usize>,

    /// Drop cached contexts unused for this many seconds
    #[arg(long, global = true, value_name = "SECS")]
    idle_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a generator once
    Run {
        /// Executable to run (path or name on PATH)
        executable: String,

        /// What the run does, as in "Failed to <description>"
        #[arg(short, long, default_value = "run generator")]
        description: String,

        /// Argument passed before the others and never printed (repeatable)
        #[arg(long = "unlogged", value_name = "ARG", allow_hyphen_values = true)]
        unlogged: Vec<String>,

        /// Arguments that may appear in logs and errors
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Show what a launcher script would start
    Inspect {
        /// Executable to inspect (path or name on PATH)
        executable: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run a JSON list of invocations concurrently through one broker
    Batch {
        /// Path to the batch file
        file: String,
    },
}

impl Cli {
    /// Environment configuration with command-line overrides.
    fn broker_config(&self) -> genexec_core::Result<BrokerConfig> {
        let mut config = BrokerConfig::from_env()?;
        if self.no_in_process {
            config = config.with_in_process(false);
        }
        if let Some(size) = self.cache_size {
            config = config.with_max_entries(size);
        }
        if let Some(secs) = self.idle_secs {
            config = config.with_idle_timeout(std::time::Duration::from_secs(secs));
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(err) = dispatch(cli).await {
        eprintln!("{}error:{} {}", colors::RED, colors::RESET, format_error(&err));
        std::process::exit(exit_code(&err));
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::Inspect { executable, json } => inspect::execute(executable, *json),

        Commands::Run {
            executable,
            description,
            unlogged,
            args,
        } => {
            let broker = ExecBroker::new(cli.broker_config()?)?;
            run::execute(&broker, executable, description, unlogged, args)
        }

        Commands::Batch { file } => {
            let broker = Arc::new(ExecBroker::new(cli.broker_config()?)?);
            batch::execute(broker, file).await
        }
    }
}

/// genexec-core errors with recovery hints.
fn format_error(err: &anyhow::Error) -> String {
    match err.downcast_ref::<genexec_core::Error>() {
        Some(core_err) => core_err.with_hint(),
        None => format!("{:#}", err),
    }
}

/// The generator's own exit code when it reported one, otherwise 1.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<genexec_core::Error>()
        .and_then(genexec_core::Error::as_invocation)
        .and_then(|failure| failure.exit_code())
        .filter(|code| *code != 0)
        .unwrap_or(1)
}

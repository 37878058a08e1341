//! Minimal stdio harness that drives the reactive kernel.
//!
//! Reads line-delimited JSON [`kernel::protocol::ControlRequest`]s from
//! stdin and dispatches them into a [`kernel::Kernel`]; every
//! [`kernel::protocol::Message`] the kernel broadcasts is written back to
//! stdout, one JSON object per line. A real frontend speaks the same
//! framing over a socket or pipe instead.

use std::process::ExitCode;

use clap::Parser;
use kernel::protocol::ControlRequest;
use kernel::{ExecutionMode, ExecutionType, ExprEvaluator, Kernel, KernelConfigBuilder};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Parser)]
#[command(name = "kernel-cli")]
#[command(about = "Drive the reactive kernel over stdio")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run cells lazily instead of autorun on definition
    #[arg(long)]
    lazy: bool,

    /// Refuse to run a cell with a statically-missing reference
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("kernel-cli: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = KernelConfigBuilder::new()
        .execution_mode(if cli.lazy { ExecutionMode::Lazy } else { ExecutionMode::Autorun })
        .execution_type(if cli.strict { ExecutionType::Strict } else { ExecutionType::Relaxed })
        .build();
    let kernel = Kernel::new(Box::new(ExprEvaluator), config);

    let mut outgoing = kernel.subscribe();
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Ok(message) = outgoing.recv().await {
            let line = serde_json::to_string(&message)?;
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<(), anyhow::Error>(())
    });

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: ControlRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                tracing::warn!(%err, "ignoring malformed control request");
                continue;
            }
        };
        if let Err(err) = kernel.handle(request) {
            tracing::error!(%err, "control request failed");
        }
    }

    drop(kernel);
    let _ = writer.await?;
    Ok(())
}

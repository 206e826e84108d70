//! Worker process: one JSON request on stdin, one JSON file result on stdout.

use anyhow::Context;
use anyhow::Result;

fn main() -> Result<()> {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    sheet_sleuth::batch::worker::serve(stdin.lock(), stdout.lock()).context("Worker request failed")?;
    Ok(())
}

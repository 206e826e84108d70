//! Process isolation.
//!
//! In process mode each file runs in a separate `sheet-sleuth-worker` process. The parent
//! writes one JSON [`WorkerRequest`] to the child's stdin and reads one JSON [`FileResult`]
//! from its stdout; logs go to stderr.

use crate::config::EngineConfig;
use crate::error::SheetSleuthError;
use crate::helpers::budget::Budget;
use crate::helpers::reader::Input;
use crate::metadata::FileResult;
use crate::pipeline::FileProcessor;
use crate::pipeline::Pipeline;
use serde::Deserialize;
use serde::Serialize;
use std::io::Read;
use std::io::Write;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub config: EngineConfig,
    pub input: Input,
}

/// Runs one file in a child process. The child is killed when the returned future is dropped.
pub async fn run_in_process(program: &Path, config: &EngineConfig, input: &Input) -> Result<FileResult, SheetSleuthError> {
    let request = serde_json::to_vec(&WorkerRequest {
        config: config.clone(),
        input: input.clone(),
    })?;
    let mut child = Command::new(program)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()?;
    debug!(file = %input.identity(), program = %program.display(), pid = ?child.id(), "Worker started");

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| SheetSleuthError::WithContextError("Worker stdin is not available".to_owned()))?;
    stdin.write_all(&request).await?;
    drop(stdin);

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        Err(SheetSleuthError::WithContextError(format!(
            "Worker exited with {}",
            output.status
        )))?
    }
    Ok(serde_json::from_slice(&output.stdout)?)
}

/// Worker side of the protocol: reads a request, processes it, writes the result.
pub fn serve<R: Read, W: Write>(reader: R, mut writer: W) -> Result<(), SheetSleuthError> {
    let request: WorkerRequest = serde_json::from_reader(reader)?;
    request.config.validate()?;
    let budget = Budget::new(request.config.file_timeout, CancellationToken::new());
    let pipeline = Pipeline::new(Arc::new(request.config));
    let result = pipeline.process(&request.input, &budget);
    serde_json::to_writer(&mut writer, &result)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Status;

    #[test]
    fn serve_answers_with_a_file_result() -> Result<(), SheetSleuthError> {
        let request = WorkerRequest {
            config: EngineConfig::default(),
            input: Input::bytes("clients.csv", b"Client,Amount\nAcme Ltd,10\n".to_vec()),
        };
        let mut output = Vec::new();
        serve(serde_json::to_vec(&request)?.as_slice(), &mut output)?;
        let result: FileResult = serde_json::from_slice(&output)?;
        assert_eq!(result.file, "clients.csv");
        assert_eq!(result.status, Status::Ok);
        Ok(())
    }

    #[test]
    fn malformed_request_is_an_error() {
        let mut output = Vec::new();
        assert!(serve(&b"{not json"[..], &mut output).is_err());
        assert!(output.is_empty());
    }

    #[tokio::test]
    async fn missing_worker_program_fails() {
        let result = run_in_process(
            Path::new("/nonexistent/sheet-sleuth-worker"),
            &EngineConfig::default(),
            &Input::bytes("a.csv", b"a\n".to_vec()),
        )
        .await;
        assert!(result.is_err());
    }
}

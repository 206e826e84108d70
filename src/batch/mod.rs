//! # Batch processing
//!
//! [`BatchOrchestrator`] runs one pipeline per input across `worker_count` concurrent
//! slots. Every file gets its own budget and cancellation token; a file that runs past
//! `file_timeout` is cancelled and reported as `FAILED` while the rest of the batch goes on.
//! Results come back in input order.

pub mod worker;

use crate::config::EngineConfig;
use crate::error::SheetSleuthError;
use crate::helpers::budget::Budget;
use crate::helpers::reader::Input;
use crate::metadata::BatchResult;
use crate::metadata::FileResult;
use crate::metadata::Status;
use crate::metadata::Warning;
use crate::metadata::WarningKind;
use crate::pipeline::FileProcessor;
use crate::pipeline::Pipeline;
use futures::stream;
use futures::StreamExt;
use serde::Deserialize;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Pending,
    Running,
    Ok,
    Partial,
    Failed,
}

impl From<Status> for FileState {
    fn from(status: Status) -> Self {
        match status {
            Status::Ok => FileState::Ok,
            Status::Partial => FileState::Partial,
            Status::Failed => FileState::Failed,
        }
    }
}

/// A state transition of one input, identified by its position in the batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileEvent {
    pub index: usize,
    pub file: String,
    pub state: FileState,
}

/// Expands glob patterns into inputs. Locations without glob metacharacters (and `file://`
/// URLs) pass through unchanged, so missing files still yield a result.
pub fn expand_inputs<S: AsRef<str>>(locations: &[S]) -> Result<Vec<Input>, SheetSleuthError> {
    let mut inputs = Vec::new();
    for location in locations {
        let location = location.as_ref();
        if !location.contains(['*', '?', '[']) || location.contains("://") {
            inputs.push(Input::parse(location)?);
            continue;
        }
        let mut paths: Vec<PathBuf> = glob::glob(location)?.collect::<Result<_, _>>()?;
        paths.retain(|path| path.is_file());
        paths.sort();
        inputs.extend(paths.into_iter().map(Input::Path));
    }
    Ok(inputs)
}

/// Execution mode chosen for a batch.
#[derive(Clone, Debug)]
enum Mode {
    Thread,
    Process(PathBuf),
}

pub struct BatchOrchestrator {
    config: Arc<EngineConfig>,
    processor: Arc<dyn FileProcessor>,
    events: Option<UnboundedSender<FileEvent>>,
    token: CancellationToken,
}

impl BatchOrchestrator {
    pub fn new(config: Arc<EngineConfig>) -> Self {
        let processor = Arc::new(Pipeline::new(config.clone()));
        BatchOrchestrator::with_processor(config, processor)
    }

    /// Uses a custom processor in thread mode.
    pub fn with_processor(config: Arc<EngineConfig>, processor: Arc<dyn FileProcessor>) -> Self {
        BatchOrchestrator {
            config,
            processor,
            events: None,
            token: CancellationToken::new(),
        }
    }

    /// Publishes every state transition on the channel.
    pub fn with_events(mut self, sender: UnboundedSender<FileEvent>) -> Self {
        self.events = Some(sender);
        self
    }

    /// Cancelling this token stops every running file at its next checkpoint.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Processes every input and returns one result per input, in input order.
    pub async fn run(&self, inputs: Vec<Input>) -> BatchResult {
        let started = Instant::now();
        let mut notices = Vec::new();
        let mode = match (self.config.use_process_pool, &self.config.worker_program) {
            (true, Some(program)) => Mode::Process(program.to_owned()),
            (true, None) => {
                warn!("Process pool requested without a worker program; using threads");
                notices.push(Warning::new(
                    WarningKind::ProcessPoolUnavailable,
                    "No worker program configured; processed in a thread",
                ));
                Mode::Thread
            }
            (false, _) => Mode::Thread,
        };

        for (index, input) in inputs.iter().enumerate() {
            self.emit(index, &input.identity(), FileState::Pending);
        }
        let workers = self.config.worker_count.max(1);
        let mut results: Vec<(usize, FileResult)> = stream::iter(inputs.into_iter().enumerate())
            .map(|(index, input)| {
                let mode = mode.clone();
                async move { (index, self.run_file(index, input, &mode).await) }
            })
            .buffer_unordered(workers)
            .collect()
            .await;
        results.sort_by_key(|(index, _)| *index);

        let files: Vec<FileResult> = results
            .into_iter()
            .map(|(_, mut result)| {
                result.warnings.extend(notices.iter().cloned());
                result
            })
            .collect();
        let batch = BatchResult::new(files);
        info!(
            total = batch.summary.total,
            ok = batch.summary.ok,
            partial = batch.summary.partial,
            failed = batch.summary.failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch finished"
        );
        batch
    }

    async fn run_file(&self, index: usize, input: Input, mode: &Mode) -> FileResult {
        let file = input.identity();
        self.emit(index, &file, FileState::Running);
        let started = Instant::now();
        let limit = self.config.file_timeout;
        let token = self.token.child_token();

        let outcome = match mode {
            Mode::Thread => {
                let processor = self.processor.clone();
                let budget = Budget::new(limit, token.clone());
                let task = tokio::task::spawn_blocking(move || processor.process(&input, &budget));
                tokio::time::timeout(limit, async { task.await.map_err(SheetSleuthError::from) }).await
            }
            // Dropping the future on timeout kills the child
            Mode::Process(program) => tokio::time::timeout(limit, worker::run_in_process(program, &self.config, &input)).await,
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                warn!(file = %file, %error, "Worker failed");
                FileResult::failed(&file, vec![Warning::new(WarningKind::WorkerFailure, error.to_string())], elapsed_ms)
            }
            Err(_) => {
                token.cancel();
                warn!(file = %file, elapsed_ms, "File timed out");
                let error = SheetSleuthError::TimeoutError(limit);
                FileResult::failed(&file, vec![Warning::new(WarningKind::Timeout, error.to_string())], elapsed_ms)
            }
        };
        self.emit(index, &file, result.status.into());
        result
    }

    fn emit(&self, index: usize, file: &str, state: FileState) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is listening
            let _ = events.send(FileEvent {
                index,
                file: file.to_owned(),
                state,
            });
        }
    }
}

//! This module provides the batch orchestrator.
//!
//! Items to fetch first get their remote size probed, all at once. A failed probe marks its item as errored and,
//! when halting on error, halts every other item before any transfer starts. Remaining items are then fetched by
//! isolated workers, launched in order and at most [`PARALLEL_DOWNLOADS`] at a time by default.
//!
//! Once an error has been raised, halting is cooperative: a running worker is terminated as `halted` on its next
//! message, and a queued worker is never launched.

use std::num::NonZeroU8;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future;
use futures::stream::{self, StreamExt};

use crate::download::{Fetcher, Message};
use crate::progress::{ProgressMode, ProgressSink};
use crate::{Error, Status, Verdict, WorkerResult};

/// Default number of simultaneous transfers.
pub const PARALLEL_DOWNLOADS: NonZeroU8 = match NonZeroU8::new(4) {
    Some(size) => size,
    None => unreachable!(),
};

/// Next step after handling a worker message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Continue,
    Terminate {
        status: Status,
        error_msg: Option<String>,
        files_list: Vec<String>,
    },
}

/// Batch-wide error register.
///
/// It is a latch: once raised, it stays raised for the rest of the batch.
#[derive(Debug, Default)]
pub struct ErrorFlag(AtomicBool);

impl ErrorFlag {
    #[inline]
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Handle one worker `message` for item `id`.
pub fn handle_message(message: Message, id: &str, halt_on_error: bool, error: &ErrorFlag, sink: &dyn ProgressSink) -> Step {
    match message {
        Message::Done(files_list) => Step::Terminate {
            status: Status::Done,
            error_msg: None,
            files_list,
        },
        Message::Error(msg) => Step::Terminate {
            status: Status::Error,
            error_msg: Some(msg),
            files_list: Vec::new(),
        },
        _ if halt_on_error && error.is_raised() => Step::Terminate {
            status: Status::Halted,
            error_msg: None,
            files_list: Vec::new(),
        },
        Message::Progress(bytes) => {
            sink.set_status(id, Status::Downloading);
            sink.increment(id, bytes);
            Step::Continue
        }
        Message::Decompressing => {
            sink.set_status(id, Status::Decompressing);
            Step::Continue
        }
    }
}

/// Batch downloader.
#[derive(Debug, Clone)]
pub struct Downloader {
    fetcher: Fetcher,
    halt_on_error: bool,
    parallel_downloads: NonZeroU8,
}

impl Default for Downloader {
    fn default() -> Self {
        Self {
            fetcher: Fetcher::default(),
            halt_on_error: false,
            parallel_downloads: PARALLEL_DOWNLOADS,
        }
    }
}

impl Downloader {
    #[inline]
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            ..Self::default()
        }
    }

    #[inline]
    pub fn halt_on_error(self, halt_on_error: bool) -> Self {
        Self { halt_on_error, ..self }
    }

    #[inline]
    pub fn parallel_downloads(self, parallel_downloads: NonZeroU8) -> Self {
        Self {
            parallel_downloads,
            ..self
        }
    }

    /// Probe the remote size of every verdict lacking one, recording probe failures as error messages.
    pub async fn set_remote_sizes(&self, verdicts: &mut [Verdict]) {
        let sizes = future::join_all(verdicts.iter().map(|verdict| self.fetcher.probe_size(&verdict.request))).await;

        for (verdict, size) in verdicts.iter_mut().zip(sizes) {
            match size {
                Ok(size) => verdict.size_bytes = size,
                Err(err) => {
                    tracing::debug!("Failed to probe size of `{}`: {err}", verdict.request.url);
                    verdict.size_bytes = None;
                    verdict.error_msg = Some(err.to_string());
                }
            }
        }
    }

    /// Fetch every verdict, returning one result per verdict.
    ///
    /// Items not ending as [`Status::Done`] get their partially written file removed.
    pub async fn download_files(&self, mut verdicts: Vec<Verdict>, sink: Arc<dyn ProgressSink>) -> Vec<WorkerResult> {
        let error = Arc::new(ErrorFlag::default());
        let mut results = Vec::with_capacity(verdicts.len());

        self.set_remote_sizes(&mut verdicts).await;

        for verdict in &verdicts {
            sink.register(verdict.id(), verdict.display_name(), ProgressMode::new(verdict.size_bytes));
            sink.set_status(verdict.id(), Status::Waiting);
        }

        let (failed, verdicts): (Vec<_>, Vec<_>) = verdicts.into_iter().partition(|verdict| verdict.error_msg.is_some());

        for verdict in failed {
            error.raise();
            sink.set_status(verdict.id(), Status::Error);
            results.push(WorkerResult::new(&verdict, Status::Error, verdict.error_msg.clone()));
        }

        if self.halt_on_error && error.is_raised() {
            for verdict in verdicts {
                sink.set_status(verdict.id(), Status::Halted);
                results.push(WorkerResult::new(&verdict, Status::Halted, None));
            }

            return results;
        }

        let fetched: Vec<_> = stream::iter(verdicts)
            .map(|verdict| Self::run_download_worker(self.fetcher.clone(), verdict, self.halt_on_error, Arc::clone(&error), Arc::clone(&sink)))
            .buffer_unordered(usize::from(self.parallel_downloads.get()))
            .collect()
            .await;

        results.extend(fetched);

        for result in results.iter().filter(|result| result.status != Status::Done) {
            if let Err(err) = tokio::fs::remove_file(&result.details.file_path).await {
                tracing::trace!("Cannot remove partial file `{}`: {err}", result.details.file_path.display());
            }
        }

        results
    }

    /// Run a fetch worker for `verdict` to completion and tear it down.
    pub async fn run_download_worker(fetcher: Fetcher, verdict: Verdict, halt_on_error: bool, error: Arc<ErrorFlag>, sink: Arc<dyn ProgressSink>) -> WorkerResult {
        let id = verdict.id();

        if halt_on_error && error.is_raised() {
            tracing::debug!("Halting `{}` before launching its worker", verdict.request.url);
            sink.set_status(id, Status::Halted);
            return WorkerResult::new(&verdict, Status::Halted, None);
        }

        let mut worker = fetcher.spawn(verdict.request.clone(), verdict.details.clone());

        let (status, error_msg, files_list) = loop {
            let Some(message) = worker.messages.recv().await else {
                break (Status::Error, Some(Error::Worker.to_string()), Vec::new());
            };

            if let Step::Terminate { status, error_msg, files_list } = handle_message(message, id, halt_on_error, &error, sink.as_ref()) {
                break (status, error_msg, files_list);
            }
        };

        worker.terminate().await;

        if status == Status::Error {
            error.raise();
        }

        sink.set_status(id, status);

        tracing::debug!("Worker for `{}` terminated: {status}", verdict.request.url);

        WorkerResult {
            files_list,
            ..WorkerResult::new(&verdict, status, error_msg)
        }
    }
}

//! This module provides the run entry point, meant to be invoked once per build.

use std::fmt;
use std::sync::Arc;

use crate::batch::Downloader;
use crate::config::Config;
use crate::download::{Client, Fetcher};
use crate::progress::{LogProgress, NoProgress, ProgressSink};
use crate::reconcile::process_blob_request;
use crate::{Error, HistoryContents, HistoryEntry, HistoryStore, Status, Verdict, WorkerResult};

/// Aggregate outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// No blob is configured.
    NothingToDownload,
    /// Every blob is up to date.
    AllSkipped,
    AllSucceeded,
    AllFailed,
    PartialFailure,
}

/// Report of a run.
#[derive(Debug, Clone)]
pub struct Report {
    pub outcome: Outcome,
    /// Number of blobs skipped as up to date.
    pub skipped: usize,
    /// Results of the fetched blobs.
    pub results: Vec<WorkerResult>,
}

impl Report {
    fn new(skipped: usize, results: Vec<WorkerResult>) -> Self {
        let failures = results.iter().filter(|result| result.status != Status::Done).count();

        let outcome = match failures {
            _ if results.is_empty() => Outcome::AllSkipped,
            0 => Outcome::AllSucceeded,
            n if n == results.len() => Outcome::AllFailed,
            _ => Outcome::PartialFailure,
        };

        Self { outcome, skipped, results }
    }

    #[inline]
    fn with_outcome(self, outcome: Outcome) -> Self {
        Self { outcome, ..self }
    }

    /// Failed or halted results.
    pub fn failures(&self) -> impl Iterator<Item = &WorkerResult> {
        self.results.iter().filter(|result| result.status != Status::Done)
    }
}

/// Blob pulling engine.
///
/// # Example
/// ```
/// # tokio_test::block_on(async {
/// # use blobpull::{Config, Engine, Outcome};
/// let engine = Engine::new(Config::default());
///
/// let report = engine.run().await.unwrap();
///
/// assert_eq!(report.outcome, Outcome::NothingToDownload);
/// # })
/// ```
pub struct Engine {
    config: Config,
    fetcher: Fetcher,
    sink: Arc<dyn ProgressSink>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("fetcher", &self.fetcher)
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub fn new(config: Config) -> Self {
        let sink: Arc<dyn ProgressSink> = if config.show_progress {
            Arc::new(LogProgress::new())
        } else {
            Arc::new(NoProgress)
        };

        Self {
            config,
            fetcher: Fetcher::new(),
            sink,
        }
    }

    #[inline]
    pub fn with_client(self, client: Client) -> Self {
        Self {
            fetcher: self.fetcher.with_client(client),
            ..self
        }
    }

    #[inline]
    pub fn with_sink(self, sink: Arc<dyn ProgressSink>) -> Self {
        Self { sink, ..self }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Pull every configured blob that is not up to date, then rewrite the history.
    ///
    /// # Errors
    /// Fails on configuration errors, before any network activity, and when the history cannot be written.
    /// Transfer failures are reported in the returned [`Report`].
    pub async fn run(&self) -> Result<Report, Error> {
        if self.config.blobs.is_empty() {
            tracing::info!("Skipping downloading remote blobs, because none have been defined in the config.");
            return Ok(Report::new(0, Vec::new()).with_outcome(Outcome::NothingToDownload));
        }

        self.config.validate()?;

        let store = HistoryStore::new(&self.config.history_file);
        let contents = store.read().await;

        let verdicts = self
            .config
            .blobs
            .iter()
            .map(|request| process_blob_request(request, &contents))
            .collect::<Result<Vec<_>, _>>()?;

        let must_fetch: Vec<_> = verdicts.iter().filter(|verdict| verdict.must_fetch).cloned().collect();
        let skipped = verdicts.len() - must_fetch.len();

        let results = if must_fetch.is_empty() {
            tracing::info!("Skipping downloading remote blobs, because all files already exist.");
            Vec::new()
        } else {
            tracing::info!("Downloading remote blobs…");

            let downloader = Downloader::new(self.fetcher.clone())
                .halt_on_error(self.config.halt_on_error)
                .parallel_downloads(self.config.parallel_downloads);

            downloader.download_files(must_fetch, Arc::clone(&self.sink)).await
        };

        let report = Report::new(skipped, results);

        match report.outcome {
            Outcome::AllFailed => {
                tracing::error!("Failed to download all remote blobs:");
                report.failures().for_each(|result| tracing::error!("  {}", format_error(result)));
            }
            Outcome::PartialFailure => {
                tracing::warn!("Failed to download some remote blobs:");
                report.failures().for_each(|result| tracing::warn!("  {}", format_error(result)));
            }
            Outcome::AllSucceeded => tracing::info!("Successfully completed all remote blob downloads."),
            Outcome::AllSkipped | Outcome::NothingToDownload => {}
        }

        store.write(history_entries(&verdicts, &report.results, &contents)).await?;

        Ok(report)
    }
}

/// Entries to persist: skipped blobs keep their entry, fetched blobs advance theirs, failed blobs keep their prior one.
fn history_entries(verdicts: &[Verdict], results: &[WorkerResult], contents: &HistoryContents) -> Vec<HistoryEntry> {
    verdicts
        .iter()
        .filter_map(|verdict| {
            if !verdict.must_fetch {
                return Some(verdict.entry.clone());
            }

            match results.iter().find(|result| result.id == verdict.id()) {
                Some(result) if result.status == Status::Done => {
                    let mut entry = verdict.entry.clone();
                    entry.decompression.files_list = result.files_list.clone();
                    Some(entry)
                }
                _ => contents.get(verdict.id()).cloned(),
            }
        })
        .collect()
}

fn format_error(result: &WorkerResult) -> String {
    match &result.error_msg {
        Some(msg) => format!("{}: {msg}", result.file_name),
        None => format!("{}: {}", result.file_name, result.status),
    }
}

//! This module provides the isolated fetch worker.
//!
//! A worker runs as its own task and shares nothing with its caller but an ordered message channel:
//! zero or more [`Message::Progress`], then [`Message::Decompressing`] when an extraction follows the transfer,
//! and always exactly one terminal [`Message::Done`] or [`Message::Error`].
//!
//! Closing the channel from the receiving side cancels the worker: the transfer stops at once, the extraction stops
//! before its next archive entry and removes what it already extracted.

use std::path::PathBuf;

use futures::future::{self, TryFutureExt};
use futures::stream::{Stream, TryStreamExt};
use reqwest::header::{HeaderMap, CONTENT_LENGTH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::{fs, io};

pub use reqwest::Client;

use crate::{archive, BlobRequest, DestinationDetails, Error};

/// Message emitted by a fetch worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A response body chunk of this many bytes has been written.
    Progress(u64),
    /// The transfer is complete and the archive extraction begins.
    Decompressing,
    /// Terminal success, with the extracted file paths (empty without extraction).
    Done(Vec<String>),
    /// Terminal failure.
    Error(String),
}

impl Message {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error(_))
    }
}

/// Handle on a running fetch worker.
#[derive(Debug)]
pub struct WorkerHandle {
    pub messages: mpsc::UnboundedReceiver<Message>,
    dir_path: PathBuf,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    /// Stop listening and wait for the worker to wind down.
    ///
    /// Closing the channel cancels the transfer or the extraction in progress. A worker completing anyway has the
    /// files it extracted removed, since its outcome is never recorded.
    pub async fn terminate(mut self) {
        self.messages.close();

        if let Err(err) = self.handle.await {
            tracing::warn!("Fetch worker failed: {err}");
        }

        while let Ok(message) = self.messages.try_recv() {
            if let Message::Done(files) = message {
                discard(self.dir_path.clone(), files).await;
            }
        }
    }
}

/// Blob fetcher, sharing an HTTP client between size probes and workers.
#[derive(Debug, Clone, Default)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn with_client(self, client: Client) -> Self {
        Self { client }
    }

    /// Return the remote size of `request`.
    ///
    /// A size known by the request is returned as is, otherwise it is read from the `content-length` header of a
    /// `HEAD` request. `Ok(None)` means the size is unknown.
    pub async fn probe_size(&self, request: &BlobRequest) -> Result<Option<u64>, Error> {
        if let Some(size) = request.size_bytes {
            return Ok(Some(size));
        }

        let url = url::Url::parse(&request.url)?;

        tracing::trace!("Probing size of `{url}`");

        let resp = self.client.head(url).send().await?.error_for_status()?;

        Ok(content_length(resp.headers()))
    }

    /// Spawn a worker pulling `request` into `details`.
    pub fn spawn(&self, request: BlobRequest, details: DestinationDetails) -> WorkerHandle {
        let (sender, messages) = mpsc::unbounded_channel();
        let dir_path = details.dir_path.clone();
        let fetcher = self.clone();

        let handle = tokio::spawn(async move {
            let message = match fetcher.fetch(&request, &details, &sender).await {
                Ok(files) => Message::Done(files),
                Err(Error::Cancelled) => {
                    tracing::debug!("Cancelled fetching `{}`", request.url);
                    return;
                }
                Err(err) => {
                    tracing::debug!("Failed to fetch `{}`: {err}", request.url);
                    Message::Error(err.to_string())
                }
            };

            if let Err(mpsc::error::SendError(Message::Done(files))) = sender.send(message) {
                discard(details.dir_path, files).await;
            }
        });

        WorkerHandle { messages, dir_path, handle }
    }

    async fn fetch(&self, request: &BlobRequest, details: &DestinationDetails, sender: &mpsc::UnboundedSender<Message>) -> Result<Vec<String>, Error> {
        use io::AsyncWriteExt;

        tracing::debug!("Downloading `{}` to `{}`", request.url, details.file_path.display());

        fs::create_dir_all(&details.dir_path).await?;

        let mut stream = std::pin::pin!(self.stream(url::Url::parse(&request.url)?));

        let file = fs::File::create(&details.file_path).await?;
        let mut writer = io::BufWriter::new(file);

        loop {
            let chunk = tokio::select! {
                _ = sender.closed() => return Err(Error::Cancelled),
                chunk = stream.try_next() => chunk?,
            };

            let Some(chunk) = chunk else {
                break;
            };

            writer.write_all(&chunk).await?;
            let _ = sender.send(Message::Progress(chunk.len() as u64));
        }

        writer.shutdown().await?;
        writer.into_inner().sync_all().await?;

        let Some(options) = request.decompress_options() else {
            return Ok(Vec::new());
        };

        let _ = sender.send(Message::Decompressing);

        let archive_path = details.file_path.clone();
        let dir_path = details.dir_path.clone();
        let listener = sender.clone();

        let files = tokio::task::spawn_blocking(move || archive::extract(&archive_path, &dir_path, &options, || listener.is_closed())).await??;

        fs::remove_file(&details.file_path).await?;

        tracing::debug!("Extracted {} files from `{}`", files.len(), details.file_path.display());

        Ok(files)
    }

    fn stream(&self, url: url::Url) -> impl Stream<Item = Result<bytes::Bytes, Error>> {
        self.client
            .get(url)
            .send()
            .and_then(|resp| future::ready(resp.error_for_status()))
            .map_ok(|resp| resp.bytes_stream())
            .try_flatten_stream()
            .err_into()
    }
}

/// Remove files extracted by a worker whose outcome is not recorded.
async fn discard(dir_path: PathBuf, files: Vec<String>) {
    tracing::debug!("Discarding {} files extracted into `{}`", files.len(), dir_path.display());

    let _ = tokio::task::spawn_blocking(move || archive::remove_extracted_files(&dir_path, &files)).await;
}

/// Size announced by a `content-length` header, if any.
pub fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers.get(CONTENT_LENGTH)?.to_str().ok()?.trim().parse().ok()
}

use std::path::PathBuf;

use thiserror::Error;
use tokio::io;

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unsupported archive format: `{}`", .0.display())]
    UnsupportedArchive(PathBuf),
    #[error("archive entry escapes its destination: `{}`", .0.display())]
    UnsafeEntry(PathBuf),
    #[error("invalid decompression filter: {0}")]
    Filter(#[from] regex::Error),
    #[error("worker terminated without reporting an outcome")]
    Worker,
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

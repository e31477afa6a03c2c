use std::collections::HashSet;
use std::num::NonZeroU8;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::batch::PARALLEL_DOWNLOADS;
use crate::{BlobRequest, DestinationDetails, Error, HISTORY_FILE_NAME};

/// Run configuration.
///
/// Deserializable from JSON, every field is optional:
/// ```
/// # use blobpull::config::Config;
/// let config: Config = serde_json::from_str(r#"{
///     "blobs": [{ "url": "https://example.com/model.zip", "dest": "./models", "decompress": { "strip": 1 } }],
///     "haltOnError": true
/// }"#).unwrap();
///
/// assert_eq!(config.blobs.len(), 1);
/// assert_eq!(config.parallel_downloads.get(), 4);
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Blobs to pull.
    pub blobs: Vec<BlobRequest>,
    /// Report progress through `tracing`.
    pub show_progress: bool,
    /// Halt pending and running transfers once one of them failed.
    pub halt_on_error: bool,
    /// Maximum number of simultaneous transfers.
    pub parallel_downloads: NonZeroU8,
    /// Path of the history file.
    pub history_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            blobs: Vec::new(),
            show_progress: true,
            halt_on_error: false,
            parallel_downloads: PARALLEL_DOWNLOADS,
            history_file: PathBuf::from(HISTORY_FILE_NAME),
        }
    }
}

impl Config {
    /// Create a new `Config` pulling `blobs`.
    pub fn new<I: IntoIterator<Item = BlobRequest>>(blobs: I) -> Self {
        Self {
            blobs: blobs.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Load a `Config` from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    #[inline]
    pub fn with_history_file(self, history_file: impl Into<PathBuf>) -> Self {
        Self {
            history_file: history_file.into(),
            ..self
        }
    }

    #[inline]
    pub fn with_halt_on_error(self, halt_on_error: bool) -> Self {
        Self { halt_on_error, ..self }
    }

    #[inline]
    pub fn with_parallel_downloads(self, parallel_downloads: NonZeroU8) -> Self {
        Self {
            parallel_downloads,
            ..self
        }
    }

    #[inline]
    pub fn with_show_progress(self, show_progress: bool) -> Self {
        Self { show_progress, ..self }
    }

    /// Check the blobs against each other.
    ///
    /// # Errors
    /// Fails with [`Error::Config`] on an unresolvable destination, or when two blobs resolve to the same file.
    pub fn validate(&self) -> Result<(), Error> {
        let mut files = HashSet::with_capacity(self.blobs.len());

        for blob in &self.blobs {
            let details = DestinationDetails::for_request(blob)?;

            if !files.insert(details.file_path) {
                return Err(Error::Config(format!("duplicate entry: {} -> {}", blob.url, blob.dest)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();

        assert!(config.blobs.is_empty());
        assert!(config.show_progress);
        assert!(!config.halt_on_error);
        assert_eq!(config.parallel_downloads, PARALLEL_DOWNLOADS);
        assert_eq!(config.history_file, PathBuf::from(HISTORY_FILE_NAME));
    }

    #[test]
    fn test_from_json_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("blobs.json");

        std::fs::write(
            &path,
            r#"{
                "blobs": [
                    { "url": "https://x/a.zip", "dest": "./out", "decompress": true, "prettyName": "A" },
                    { "url": "https://x/b.bin", "dest": "./out/b.bin", "sizeBytes": 12 }
                ],
                "showProgress": false,
                "parallelDownloads": 2,
                "historyFile": "cache/history.json"
            }"#,
        )
        .unwrap();

        let config = Config::from_json_file(&path).unwrap();

        assert_eq!(config.blobs.len(), 2);
        assert_eq!(config.blobs[0].pretty_name.as_deref(), Some("A"));
        assert_eq!(config.blobs[1].size_bytes, Some(12));
        assert!(!config.show_progress);
        assert_eq!(config.parallel_downloads.get(), 2);
        assert_eq!(config.history_file, PathBuf::from("cache/history.json"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_file_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("blobs.json");

        assert!(matches!(Config::from_json_file(&path), Err(Error::Io(_))));

        std::fs::write(&path, r#"{ "parallelDownloads": 0 }"#).unwrap();

        assert!(matches!(Config::from_json_file(&path), Err(Error::Json(_))));
    }

    #[test]
    fn test_validate_duplicates() {
        let config = Config::new([BlobRequest::new("https://x/a.zip", "./out"), BlobRequest::new("https://x/a.zip", "./out").always_pull()]);

        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("duplicate")));
    }

    #[test]
    fn test_validate_same_file() {
        let config = Config::new([
            BlobRequest::new("https://x/a.zip", "./out"),
            BlobRequest::new("https://x/a.zip", "out").with_decompress(true),
        ]);

        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("duplicate")));

        let config = Config::new([
            BlobRequest::new("https://x/a.zip", "./out"),
            BlobRequest::new("https://y/a.zip", "./out/a.zip"),
        ]);

        assert!(config.validate().is_err());

        let config = Config::new([
            BlobRequest::new("https://x/a.zip", "./out"),
            BlobRequest::new("https://x/b.zip", "./out").with_decompress(true),
            BlobRequest::new("https://x/a.zip", "./other"),
        ]);

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_file_dest_with_decompression() {
        let config = Config::new([BlobRequest::new("https://x/a.zip", "./out/a.zip").with_decompress(true)]);

        assert!(matches!(config.validate(), Err(Error::Config(msg)) if msg.contains("directory")));
    }
}

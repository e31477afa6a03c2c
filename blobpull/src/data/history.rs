use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tokio::{fs, io};

use super::HistoryEntry;
use crate::Error;

/// Default history file name.
pub const HISTORY_FILE_NAME: &str = "historical_entries.json";

/// History contents, mapping fingerprints to their last known entry.
pub type HistoryContents = BTreeMap<String, HistoryEntry>;

/// Persisted history of prior runs.
///
/// The history file is read once at the start of a run and fully rewritten at its end.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Read the history file.
    ///
    /// A missing, unreadable or malformed history file reads as an empty history.
    pub async fn read(&self) -> HistoryContents {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(err) => {
                tracing::debug!("No history read from `{}`: {err}", self.path.display());
                return HistoryContents::new();
            }
        };

        if data.iter().all(u8::is_ascii_whitespace) {
            return HistoryContents::new();
        }

        serde_json::from_slice(&data).unwrap_or_else(|err| {
            tracing::warn!("Ignoring malformed history file `{}`: {err}", self.path.display());
            HistoryContents::new()
        })
    }

    /// Replace the history file with `entries`, keyed by fingerprint.
    ///
    /// The new contents are written to a temporary file next to the history file, then renamed over it.
    pub async fn write(&self, entries: impl IntoIterator<Item = HistoryEntry>) -> Result<(), Error> {
        use io::AsyncWriteExt;

        let contents: HistoryContents = entries.into_iter().map(|entry| (entry.fingerprint.clone(), entry)).collect();
        let data = serde_json::to_vec_pretty(&contents)?;

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }

        let tmp_path = self.tmp_path();
        let mut writer = io::BufWriter::new(fs::File::create(&tmp_path).await?);

        writer.write_all(&data).await?;
        writer.shutdown().await?;
        writer.into_inner().sync_all().await?;

        if let Err(err) = fs::rename(&tmp_path, &self.path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err.into());
        }

        tracing::debug!("Wrote {} history entries to `{}`", contents.len(), self.path.display());

        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

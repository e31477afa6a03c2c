use std::path::PathBuf;

use serde::{Deserialize, Serialize};

mod destination;
pub use destination::*;

mod digest;
pub use digest::*;

mod history;
pub use history::*;

/// Remote blob request.
///
/// Immutable for the duration of a run. Only `url`, `dest` and the canonical form of `decompress` take part in its
/// [fingerprint](BlobRequest::fingerprint), all other fields are display or scheduling hints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobRequest {
    /// Remote HTTP(S) URL to pull the blob from.
    pub url: String,

    /// Destination path, either a directory (no extension) or a file (with an extension).
    pub dest: String,

    /// Known size in bytes, sparing a size probe when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,

    /// Name to display instead of the destination file name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pretty_name: Option<String>,

    /// Pull the blob on every run, regardless of history.
    #[serde(default)]
    pub always_pull: bool,

    /// Archive extraction to apply once downloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decompress: Option<Decompress>,
}

impl BlobRequest {
    /// Create a new `BlobRequest` pulling `url` into `dest`.
    pub fn new(url: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            dest: dest.into(),
            size_bytes: None,
            pretty_name: None,
            always_pull: false,
            decompress: None,
        }
    }

    /// Build a new `BlobRequest` with a known size.
    #[inline]
    pub fn with_size(self, size_bytes: u64) -> Self {
        Self {
            size_bytes: Some(size_bytes),
            ..self
        }
    }

    /// Build a new `BlobRequest` with a display name.
    #[inline]
    pub fn with_pretty_name(self, pretty_name: impl Into<String>) -> Self {
        Self {
            pretty_name: Some(pretty_name.into()),
            ..self
        }
    }

    /// Build a new `BlobRequest` pulled on every run.
    #[inline]
    pub fn always_pull(self) -> Self {
        Self { always_pull: true, ..self }
    }

    /// Build a new `BlobRequest` extracted once downloaded.
    #[inline]
    pub fn with_decompress(self, decompress: impl Into<Decompress>) -> Self {
        Self {
            decompress: Some(decompress.into()),
            ..self
        }
    }

    /// Canonical extraction options, `None` when nothing is to be extracted.
    #[inline]
    pub fn decompress_options(&self) -> Option<DecompressOptions> {
        self.decompress.as_ref().and_then(Decompress::options)
    }

    /// Whether an archive extraction is requested.
    #[inline]
    pub fn is_decompressed(&self) -> bool {
        self.decompress.as_ref().is_some_and(Decompress::is_enabled)
    }

    /// Digest of the canonical extraction options.
    pub fn decompress_digest(&self) -> String {
        digest_data(&self.decompress_options(), DIGEST_LEN)
    }

    /// Stable fingerprint used as the history key.
    pub fn fingerprint(&self) -> String {
        digest_data(&(&self.url, &self.dest, self.decompress_digest()), DIGEST_LEN)
    }
}

/// Archive extraction request, either a plain flag or detailed options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Decompress {
    Enabled(bool),
    Options(DecompressOptions),
}

impl Decompress {
    #[inline]
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Enabled(false))
    }

    /// Canonical form: `true` and default options are the same thing.
    pub fn options(&self) -> Option<DecompressOptions> {
        match self {
            Self::Enabled(false) => None,
            Self::Enabled(true) => Some(DecompressOptions::default()),
            Self::Options(options) => Some(options.clone()),
        }
    }
}

impl From<bool> for Decompress {
    fn from(enabled: bool) -> Self {
        Self::Enabled(enabled)
    }
}

impl From<DecompressOptions> for Decompress {
    fn from(options: DecompressOptions) -> Self {
        Self::Options(options)
    }
}

/// Archive extraction options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecompressOptions {
    /// Allow-list of regular expressions matched against entry paths (after stripping), empty to allow all entries.
    #[serde(default)]
    pub filter: Vec<String>,

    /// Number of leading path components to strip from entry paths.
    #[serde(default)]
    pub strip: usize,
}

impl DecompressOptions {
    #[inline]
    pub fn filter<I: IntoIterator<Item = S>, S: Into<String>>(self, iter: I) -> Self {
        Self {
            filter: iter.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    #[inline]
    pub fn strip(self, strip: usize) -> Self {
        Self { strip, ..self }
    }
}

/// Last known outcome of a blob request, as persisted in the history file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub url: String,
    pub dest: String,
    #[serde(rename = "blobOptionsDigest")]
    pub fingerprint: String,
    pub decompression: Decompression,
}

/// Extraction part of a [`HistoryEntry`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decompression {
    pub options_digest: String,
    /// Extracted file paths, relative to the destination directory.
    pub files_list: Vec<String>,
}

impl HistoryEntry {
    /// Create a fresh entry for `request`, with no extracted files yet.
    pub fn new(request: &BlobRequest) -> Self {
        Self {
            url: request.url.clone(),
            dest: request.dest.clone(),
            fingerprint: request.fingerprint(),
            decompression: Decompression {
                options_digest: request.decompress_digest(),
                files_list: Vec::new(),
            },
        }
    }
}

/// Reconciliation verdict for one blob request.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub request: BlobRequest,
    /// Entry retained from history when skipped, fresh entry otherwise.
    pub entry: HistoryEntry,
    pub details: DestinationDetails,
    pub must_fetch: bool,
    /// Remote size, either given by the request or probed.
    pub size_bytes: Option<u64>,
    pub error_msg: Option<String>,
}

impl Verdict {
    /// Progress item id.
    #[inline]
    pub fn id(&self) -> &str {
        &self.entry.fingerprint
    }

    /// Name to display for this item.
    pub fn display_name(&self) -> &str {
        self.request.pretty_name.as_deref().unwrap_or(&self.details.file_name)
    }
}

/// Per-item status.
///
/// ```text
///     waiting -> downloading -> (decompressing) -> done
///     waiting -> error
///     waiting -> halted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    Waiting,
    Downloading,
    Decompressing,
    Done,
    Error,
    Halted,
}

impl Status {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Halted)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Waiting => "waiting",
            Self::Downloading => "downloading",
            Self::Decompressing => "decompressing",
            Self::Done => "done",
            Self::Error => "error",
            Self::Halted => "halted",
        })
    }
}

/// Final outcome of a fetched item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerResult {
    /// Fingerprint of the originating request.
    pub id: String,
    pub file_name: String,
    pub status: Status,
    pub error_msg: Option<String>,
    pub details: DestinationDetails,
    /// Extracted file paths on success.
    pub files_list: Vec<String>,
}

impl WorkerResult {
    pub(crate) fn new(verdict: &Verdict, status: Status, error_msg: Option<String>) -> Self {
        Self {
            id: verdict.id().to_owned(),
            file_name: verdict.display_name().to_owned(),
            status,
            error_msg,
            details: verdict.details.clone(),
            files_list: Vec::new(),
        }
    }
}

/// Resolved destination path.
pub(crate) fn absolute(path: &str) -> std::io::Result<PathBuf> {
    std::path::absolute(path).map(|path| normalize(&path))
}

fn normalize(path: &std::path::Path) -> PathBuf {
    use std::path::Component;

    let mut result = PathBuf::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                result.pop();
            }
            Component::CurDir => {}
            component => result.push(component),
        }
    }

    result
}

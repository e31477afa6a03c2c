use std::path::{Path, PathBuf};

use super::{BlobRequest, HistoryEntry};
use crate::Error;

/// Concrete filesystem targets of a blob, derived from its `(url, dest)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationDetails {
    /// Name of the downloaded file.
    pub file_name: String,
    /// Absolute path of the downloaded file.
    pub file_path: PathBuf,
    /// Absolute path of the directory holding the downloaded file (and extracted files).
    pub dir_path: PathBuf,
    /// Whether `dest` names a file rather than a directory.
    pub is_file: bool,
    pub file_exists: bool,
    pub dir_exists: bool,
}

impl DestinationDetails {
    /// Resolve the destination of `request`.
    ///
    /// # Errors
    /// Fails with [`Error::Config`] when extraction is requested into a file destination.
    #[inline]
    pub fn for_request(request: &BlobRequest) -> Result<Self, Error> {
        Self::resolve(&request.url, &request.dest, request.is_decompressed())
    }

    /// Resolve the destination recorded by a history `entry`.
    #[inline]
    pub fn for_entry(entry: &HistoryEntry) -> Result<Self, Error> {
        Self::resolve(&entry.url, &entry.dest, false)
    }

    /// Resolve `dest` to an absolute target.
    ///
    /// A `dest` with an extension names the target file itself, otherwise it names a directory and the file name
    /// is taken from the last segment of `url`. Existence of both the file and the directory is checked on every call.
    pub fn resolve(url: &str, dest: &str, decompress: bool) -> Result<Self, Error> {
        let dest_path = super::absolute(dest)?;
        let is_file = dest_path.extension().is_some();

        if is_file && decompress {
            return Err(Error::Config(format!("destination must be a directory when decompressing: `{dest}`")));
        }

        let (dir_path, file_name) = if is_file {
            let file_name = dest_path.file_name().map(|name| name.to_string_lossy().into_owned());
            let dir_path = dest_path.parent().map(Path::to_path_buf);
            (dir_path.unwrap_or_default(), file_name)
        } else {
            (dest_path, url_file_name(url))
        };

        let file_name = file_name.ok_or_else(|| Error::Config(format!("cannot derive a file name from `{url}`")))?;
        let file_path = dir_path.join(&file_name);

        Ok(Self {
            file_exists: file_path.exists(),
            dir_exists: dir_path.is_dir(),
            file_name,
            file_path,
            dir_path,
            is_file,
        })
    }
}

/// Last non-empty path segment of `url`.
fn url_file_name(url: &str) -> Option<String> {
    let url = url::Url::parse(url).ok()?;
    let segment = url.path_segments()?.filter(|segment| !segment.is_empty()).last()?;
    Some(segment.to_owned())
}

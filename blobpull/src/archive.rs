//! Archive extraction and cleanup of extracted files.
//!
//! Supported formats are detected from their magic bytes: zip, tar and gzip-compressed tar.
//! Entry paths are stripped of their leading components, then matched against the filter allow-list,
//! and finally written below the destination directory. Entries escaping the destination are rejected.

use std::fs;
use std::io::{self, Read, Seek};
use std::path::{Component, Path, PathBuf};

use regex::Regex;

use crate::{DecompressOptions, DestinationDetails, Error, HistoryEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
}

fn detect_format(header: &[u8]) -> Option<ArchiveFormat> {
    match header {
        [0x50, 0x4B, 0x03, 0x04, ..] => Some(ArchiveFormat::Zip),
        [0x1F, 0x8B, ..] => Some(ArchiveFormat::TarGz),
        _ if header.len() >= 263 && header[257..262] == *b"ustar" => Some(ArchiveFormat::Tar),
        _ => None,
    }
}

/// Entry selection derived from [`DecompressOptions`].
struct Selector {
    filters: Vec<Regex>,
    strip: usize,
}

impl Selector {
    fn new(options: &DecompressOptions) -> Result<Self, Error> {
        Ok(Self {
            filters: options.filter.iter().map(|pattern| Regex::new(pattern)).collect::<Result<_, _>>()?,
            strip: options.strip,
        })
    }

    /// Relative target of an archive entry, `None` when the entry is left out.
    fn target(&self, entry: &Path) -> Result<Option<PathBuf>, Error> {
        let mut parts = Vec::new();

        for component in entry.components() {
            match component {
                Component::Normal(part) => parts.push(part),
                Component::CurDir => {}
                _ => return Err(Error::UnsafeEntry(entry.to_path_buf())),
            }
        }

        if parts.len() <= self.strip {
            return Ok(None);
        }

        let target: PathBuf = parts[self.strip..].iter().collect();

        if self.filters.is_empty() || self.filters.iter().any(|filter| filter.is_match(&relative_str(&target))) {
            Ok(Some(target))
        } else {
            Ok(None)
        }
    }
}

/// `/`-separated form of a relative path.
fn relative_str(path: &Path) -> String {
    path.iter().map(|part| part.to_string_lossy()).collect::<Vec<_>>().join("/")
}

/// Extract `archive` into `dir`, returning the extracted file paths relative to `dir`.
///
/// `cancelled` is polled before each entry. On failure or cancellation the files extracted so far are removed.
///
/// This is blocking, callers in async context should run it on a blocking thread.
pub fn extract(archive: &Path, dir: &Path, options: &DecompressOptions, cancelled: impl Fn() -> bool) -> Result<Vec<String>, Error> {
    let selector = Selector::new(options)?;

    let mut file = fs::File::open(archive)?;
    let mut header = Vec::with_capacity(512);
    (&mut file).take(512).read_to_end(&mut header)?;
    file.rewind()?;

    let format = detect_format(&header).ok_or_else(|| Error::UnsupportedArchive(archive.to_path_buf()))?;

    tracing::debug!("Extracting {format:?} archive `{}` into `{}`", archive.display(), dir.display());

    let reader = io::BufReader::new(file);
    let mut files = Vec::new();

    let result = match format {
        ArchiveFormat::Zip => extract_zip(reader, dir, &selector, &cancelled, &mut files),
        ArchiveFormat::Tar => extract_tar(reader, dir, &selector, &cancelled, &mut files),
        ArchiveFormat::TarGz => extract_tar(flate2::read::GzDecoder::new(reader), dir, &selector, &cancelled, &mut files),
    };

    match result {
        Ok(()) => Ok(files),
        Err(err) => {
            tracing::debug!("Removing {} files extracted from `{}`: {err}", files.len(), archive.display());
            remove_extracted_files(dir, &files);
            Err(err)
        }
    }
}

fn extract_zip<R: Read + Seek>(reader: R, dir: &Path, selector: &Selector, cancelled: &dyn Fn() -> bool, files: &mut Vec<String>) -> Result<(), Error> {
    let mut archive = zip::ZipArchive::new(reader)?;

    for i in 0..archive.len() {
        if cancelled() {
            return Err(Error::Cancelled);
        }

        let mut entry = archive.by_index(i)?;

        let name = entry.enclosed_name().ok_or_else(|| Error::UnsafeEntry(PathBuf::from(entry.name())))?;

        let Some(target) = selector.target(&name)? else {
            continue;
        };

        let path = dir.join(&target);

        if entry.is_dir() {
            fs::create_dir_all(&path)?;
            continue;
        }

        let mode = entry_mode(entry.unix_mode());
        files.push(relative_str(&target));
        write_file(&mut entry, &path, mode)?;
    }

    Ok(())
}

fn extract_tar<R: Read>(reader: R, dir: &Path, selector: &Selector, cancelled: &dyn Fn() -> bool, files: &mut Vec<String>) -> Result<(), Error> {
    let mut archive = tar::Archive::new(reader);

    for entry in archive.entries()? {
        if cancelled() {
            return Err(Error::Cancelled);
        }

        let mut entry = entry?;
        let name = entry.path()?.into_owned();

        let Some(target) = selector.target(&name)? else {
            continue;
        };

        let path = dir.join(&target);
        let entry_type = entry.header().entry_type();

        if entry_type.is_dir() {
            fs::create_dir_all(&path)?;
        } else if entry_type.is_file() {
            let mode = entry_mode(entry.header().mode().ok());
            files.push(relative_str(&target));
            write_file(&mut entry, &path, mode)?;
        } else {
            tracing::trace!("Skipping {entry_type:?} archive entry `{}`", name.display());
        }
    }

    Ok(())
}

fn entry_mode(mode: Option<u32>) -> Option<u32> {
    mode.map(|mode| mode & 0o777).filter(|&mode| mode != 0)
}

fn write_file(reader: &mut impl Read, path: &Path, mode: Option<u32>) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut file = fs::File::create(path)?;
    io::copy(reader, &mut file)?;

    set_mode(&file, mode)?;

    Ok(())
}

#[cfg(unix)]
fn set_mode(file: &fs::File, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    match mode {
        Some(mode) => file.set_permissions(fs::Permissions::from_mode(mode)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn set_mode(_: &fs::File, _: Option<u32>) -> io::Result<()> {
    Ok(())
}

/// Path of the extracted `file` below `dir`, `None` unless `file` is a plain relative path.
///
/// Extracted file lists are read back from the history, so they are not trusted to stay below `dir`.
fn extracted_path(dir: &Path, file: &str) -> Option<PathBuf> {
    let file = Path::new(file);
    let plain = file.components().next().is_some() && file.components().all(|component| matches!(component, Component::Normal(_)));

    plain.then(|| dir.join(file))
}

/// Whether every file extracted for `entry` still exists below `details.dir_path`.
///
/// An entry listing a path that does not stay below the destination never counts as extracted.
pub fn all_decompressed_files_exist(entry: &HistoryEntry, details: &DestinationDetails) -> bool {
    entry
        .decompression
        .files_list
        .iter()
        .all(|file| extracted_path(&details.dir_path, file).is_some_and(|path| path.exists()))
}

/// Remove every file extracted for `entry`, then the directories left empty by the removal, deepest first.
///
/// This is best-effort: removal failures are ignored.
pub fn remove_all_decompressed_files(entry: &HistoryEntry, details: &DestinationDetails) {
    remove_extracted_files(&details.dir_path, &entry.decompression.files_list);
}

/// Remove `files` from `dir`, then the directories left empty by the removal, up to `dir` itself.
///
/// Paths that do not stay below `dir` are left alone.
pub fn remove_extracted_files(dir: &Path, files: &[String]) {
    let mut dirs = Vec::new();

    for file in files {
        let Some(path) = extracted_path(dir, file) else {
            tracing::debug!("Ignoring extracted file `{file}` outside of `{}`", dir.display());
            continue;
        };

        if let Err(err) = fs::remove_file(&path) {
            tracing::trace!("Cannot remove extracted file `{}`: {err}", path.display());
        }

        dirs.extend(
            path.ancestors()
                .skip(1)
                .take_while(|ancestor| ancestor.starts_with(dir))
                .map(Path::to_path_buf),
        );
    }

    dirs.sort_unstable_by(|a, b| b.components().count().cmp(&a.components().count()).then_with(|| a.cmp(b)));
    dirs.dedup();

    for dir in dirs {
        // only succeeds on empty directories
        let _ = fs::remove_dir(&dir);
    }
}

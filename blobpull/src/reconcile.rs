//! Per-request reconciliation between the requested state, the history and the filesystem.

use crate::archive;
use crate::{BlobRequest, DestinationDetails, Error, HistoryContents, HistoryEntry, Verdict};

/// Decide whether `request` must be fetched, cleaning up stale artifacts on the way.
///
/// A request is skipped when its history entry is still backed by the filesystem, either by the downloaded file or
/// by every file extracted from it. Otherwise it must be fetched from a fresh history entry, after having removed the
/// stale extracted files or the stale downloaded file. Cleanup is best-effort and never fails reconciliation.
///
/// # Errors
/// Fails with [`Error::Config`] when the destination cannot be resolved, before touching the filesystem.
pub fn process_blob_request(request: &BlobRequest, contents: &HistoryContents) -> Result<Verdict, Error> {
    let fingerprint = request.fingerprint();
    let decompress_digest = request.decompress_digest();
    let details = DestinationDetails::for_request(request)?;

    let must_fetch = |details: DestinationDetails| Verdict {
        request: request.clone(),
        entry: HistoryEntry::new(request),
        details,
        must_fetch: true,
        size_bytes: request.size_bytes,
        error_msg: None,
    };

    let Some(old_entry) = contents.get(&fingerprint) else {
        tracing::trace!("No history for `{}`", request.url);
        return Ok(must_fetch(details));
    };

    let skip = |details: DestinationDetails| Verdict {
        request: request.clone(),
        entry: old_entry.clone(),
        details,
        must_fetch: false,
        size_bytes: request.size_bytes,
        error_msg: None,
    };

    // a fingerprint mismatch always forces a fetch, whatever exists on disk
    let fingerprint_matches = old_entry.fingerprint == fingerprint;

    if !request.always_pull && fingerprint_matches && details.file_exists {
        tracing::debug!("Skipping `{}`: `{}` exists", request.url, details.file_path.display());
        return Ok(skip(details));
    }

    let old_details = match DestinationDetails::for_entry(old_entry) {
        Ok(old_details) => old_details,
        Err(err) => {
            tracing::debug!("Ignoring unresolvable history entry for `{}`: {err}", old_entry.url);
            return Ok(must_fetch(details));
        }
    };

    if !old_entry.decompression.files_list.is_empty() {
        let all_exist = archive::all_decompressed_files_exist(old_entry, &old_details);

        if !request.always_pull && fingerprint_matches && all_exist && old_entry.decompression.options_digest == decompress_digest {
            tracing::debug!("Skipping `{}`: all extracted files exist", request.url);
            return Ok(skip(details));
        }

        tracing::debug!("Removing stale extracted files of `{}`", old_entry.url);
        archive::remove_all_decompressed_files(old_entry, &old_details);

        return Ok(must_fetch(DestinationDetails::for_request(request)?));
    }

    if old_details.file_exists {
        tracing::debug!("Removing stale file `{}`", old_details.file_path.display());

        if let Err(err) = std::fs::remove_file(&old_details.file_path) {
            tracing::trace!("Cannot remove stale file `{}`: {err}", old_details.file_path.display());
        }

        return Ok(must_fetch(DestinationDetails::for_request(request)?));
    }

    Ok(must_fetch(details))
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::Path;

    use super::*;
    use crate::DecompressOptions;

    const URL: &str = "https://x/a.zip";

    fn request(dir: &Path) -> BlobRequest {
        BlobRequest::new(URL, dir.join("out").to_str().unwrap())
    }

    fn history(entries: impl IntoIterator<Item = HistoryEntry>) -> HistoryContents {
        entries.into_iter().map(|entry| (entry.fingerprint.clone(), entry)).collect()
    }

    fn extract_into(dir: &Path, entry: &mut HistoryEntry, files: &[&str]) {
        for file in files {
            let path = dir.join(file);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, file).unwrap();
            entry.decompression.files_list.push(file.to_string());
        }
    }

    #[test]
    fn test_empty_history_must_fetch() {
        let tmp = tempfile::tempdir().unwrap();
        let request = request(tmp.path()).with_decompress(true);

        let verdict = process_blob_request(&request, &HistoryContents::new()).unwrap();

        assert!(verdict.must_fetch);
        assert_eq!(verdict.entry, HistoryEntry::new(&request));
        assert!(verdict.entry.decompression.files_list.is_empty());
        assert_eq!(verdict.details.file_name, "a.zip");
    }

    #[test]
    fn test_existing_file_skips() {
        let tmp = tempfile::tempdir().unwrap();
        let request = request(tmp.path());
        let entry = HistoryEntry::new(&request);

        fs::create_dir_all(tmp.path().join("out")).unwrap();
        fs::write(tmp.path().join("out/a.zip"), "zip").unwrap();

        let verdict = process_blob_request(&request, &history([entry.clone()])).unwrap();

        assert!(!verdict.must_fetch);
        assert_eq!(verdict.entry, entry);
    }

    #[test]
    fn test_always_pull_must_fetch() {
        let tmp = tempfile::tempdir().unwrap();
        let request = request(tmp.path()).always_pull();
        let entry = HistoryEntry::new(&request);

        fs::create_dir_all(tmp.path().join("out")).unwrap();
        fs::write(tmp.path().join("out/a.zip"), "zip").unwrap();

        let verdict = process_blob_request(&request, &history([entry])).unwrap();

        assert!(verdict.must_fetch);
        assert!(!tmp.path().join("out/a.zip").exists());
    }

    #[test]
    fn test_fingerprint_mismatch_must_fetch() {
        let tmp = tempfile::tempdir().unwrap();
        let request = request(tmp.path());
        let mut entry = HistoryEntry::new(&request);
        entry.fingerprint = "tampered".into();

        fs::create_dir_all(tmp.path().join("out")).unwrap();
        fs::write(tmp.path().join("out/a.zip"), "zip").unwrap();

        let contents = [(request.fingerprint(), entry)].into_iter().collect();
        let verdict = process_blob_request(&request, &contents).unwrap();

        assert!(verdict.must_fetch);
        assert!(!tmp.path().join("out/a.zip").exists());
        assert_eq!(verdict.entry.fingerprint, request.fingerprint());
    }

    #[test]
    fn test_extracted_files_skip() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        let request = request(tmp.path()).with_decompress(true);
        let mut entry = HistoryEntry::new(&request);
        extract_into(&out, &mut entry, &["a.txt", "sub/b.txt"]);

        let verdict = process_blob_request(&request, &history([entry.clone()])).unwrap();

        assert!(!verdict.must_fetch);
        assert_eq!(verdict.entry, entry);
        assert!(out.join("sub/b.txt").exists());
    }

    #[test]
    fn test_missing_extracted_file_must_fetch() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        let request = request(tmp.path()).with_decompress(true);
        let mut entry = HistoryEntry::new(&request);
        extract_into(&out, &mut entry, &["a.txt", "sub/b.txt", "sub/c.txt"]);

        fs::remove_file(out.join("a.txt")).unwrap();
        fs::write(out.join("sub/unrelated.txt"), "x").unwrap();

        let verdict = process_blob_request(&request, &history([entry])).unwrap();

        assert!(verdict.must_fetch);
        assert!(verdict.entry.decompression.files_list.is_empty());
        assert!(!out.join("sub/b.txt").exists());
        assert!(!out.join("sub/c.txt").exists());
        assert!(out.join("sub/unrelated.txt").exists());
    }

    #[test]
    fn test_escaping_extracted_file_must_fetch() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        let request = request(tmp.path()).with_decompress(true);
        let mut entry = HistoryEntry::new(&request);
        extract_into(&out, &mut entry, &["a.txt"]);

        let victim = tmp.path().join("victim.txt");
        fs::write(&victim, "keep").unwrap();
        entry.decompression.files_list = vec!["../victim.txt".into(), "missing.txt".into(), "a.txt".into()];

        let verdict = process_blob_request(&request, &history([entry])).unwrap();

        assert!(verdict.must_fetch);
        assert!(victim.exists());
        assert!(!out.join("a.txt").exists());
    }

    #[test]
    fn test_changed_decompression_digest_must_fetch() {
        let tmp = tempfile::tempdir().unwrap();
        let out = tmp.path().join("out");
        let request = request(tmp.path()).with_decompress(DecompressOptions::default().strip(1));
        let mut entry = HistoryEntry::new(&request);
        entry.decompression.options_digest = "stale".into();
        extract_into(&out, &mut entry, &["a.txt"]);

        let verdict = process_blob_request(&request, &history([entry])).unwrap();

        assert!(verdict.must_fetch);
        assert!(!out.join("a.txt").exists());
        assert!(!out.exists());
    }

    #[test]
    fn test_missing_file_must_fetch() {
        let tmp = tempfile::tempdir().unwrap();
        let request = request(tmp.path());
        let entry = HistoryEntry::new(&request);

        let verdict = process_blob_request(&request, &history([entry])).unwrap();

        assert!(verdict.must_fetch);
        assert!(!verdict.details.file_exists);
    }

    #[test]
    fn test_file_dest_with_decompression_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let request = BlobRequest::new(URL, tmp.path().join("a.zip").to_str().unwrap()).with_decompress(true);

        let result = process_blob_request(&request, &HistoryContents::new());

        assert!(matches!(result, Err(Error::Config(_))));
    }
}

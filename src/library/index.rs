//! Recording index
//!
//! Enumerates the MP4 segments the transcode process writes, deriving each
//! recording's start time from its filename. Filenames are the only source
//! of truth for timestamps; nothing is read out of the file contents and no
//! persistent index is kept, so every listing is a fresh directory scan.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Pattern recordings are named after, minus the `.mp4` extension.
/// This is the parse-side counterpart of the transcoder's strftime option.
pub const RECORDING_STEM_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Recording library errors
#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Recording not found: {0}")]
    NotFound(String),

    #[error("Invalid recording name: {0}")]
    InvalidName(String),

    #[error("Destination already exists: {0}")]
    Conflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One recording file, with metadata derived from its name on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingEntry {
    pub filename: String,
    pub path: String,
    pub url: String,
    pub size_bytes: u64,
    /// Start time parsed from the filename, `%Y-%m-%dT%H:%M:%S`; None when
    /// the name does not follow the segment-naming convention.
    pub started_at: Option<String>,
    pub duration_sec: u32,
}

/// One page of results.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

/// Parse a recording start time out of a filename.
///
/// Pure function with a defined failure mode: names outside the segment
/// convention yield None rather than an error.
pub fn parse_start_time(name: &str) -> Option<NaiveDateTime> {
    let stem = Path::new(name).file_stem()?.to_str()?;
    NaiveDateTime::parse_from_str(stem, RECORDING_STEM_FORMAT).ok()
}

/// Scan `dir` for recordings, newest first.
///
/// Sorted descending by (start time, filename); entries whose names do not
/// parse sort with the empty key and therefore land last.
pub fn list_recordings(dir: &Path, segment_seconds: u32) -> Result<Vec<RecordingEntry>, LibraryError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)?.flatten() {
        let Some(filename) = entry.file_name().to_str().map(String::from) else {
            continue;
        };
        if !has_mp4_extension(&filename) {
            continue;
        }
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let started_at =
            parse_start_time(&filename).map(|dt| dt.format("%Y-%m-%dT%H:%M:%S").to_string());
        entries.push(RecordingEntry {
            url: format!("/videos/{}", filename),
            path: entry.path().to_string_lossy().into_owned(),
            size_bytes: metadata.len(),
            started_at,
            duration_sec: segment_seconds,
            filename,
        });
    }

    entries.sort_by(|a, b| {
        let ka = (a.started_at.as_deref().unwrap_or(""), a.filename.as_str());
        let kb = (b.started_at.as_deref().unwrap_or(""), b.filename.as_str());
        kb.cmp(&ka)
    });
    Ok(entries)
}

/// Drop entries outside the requested start-time range. Bounds are exclusive
/// and compared lexically against the ISO8601 start strings; entries without
/// a parsed start time pass both bounds.
pub fn filter_by_time(
    entries: Vec<RecordingEntry>,
    start_after: Option<&str>,
    start_before: Option<&str>,
) -> Vec<RecordingEntry> {
    entries
        .into_iter()
        .filter(|entry| {
            let Some(started) = entry.started_at.as_deref() else {
                return true;
            };
            if let Some(after) = start_after {
                if started <= after {
                    return false;
                }
            }
            if let Some(before) = start_before {
                if started >= before {
                    return false;
                }
            }
            true
        })
        .collect()
}

/// Offset pagination over an already-sorted list. `page` is 1-indexed;
/// out-of-range pages yield an empty item list with `has_next` false.
pub fn paginate<T>(items: Vec<T>, page: usize, page_size: usize) -> Page<T> {
    let total = items.len();
    let start = (page.saturating_sub(1)) * page_size;
    let end = (start + page_size).min(total);
    let items: Vec<T> = if start < total {
        items
            .into_iter()
            .skip(start)
            .take(page_size)
            .collect()
    } else {
        Vec::new()
    };
    Page {
        items,
        total,
        page,
        page_size,
        has_next: end < total,
        has_prev: start > 0,
    }
}

/// Cursor pagination: the first `limit` entries strictly older than `after`,
/// i.e. the next page going backward in time. Entries without a start time
/// are never part of a cursor walk.
pub fn cursor_page(
    entries: Vec<RecordingEntry>,
    after: Option<&str>,
    limit: usize,
) -> Page<RecordingEntry> {
    let items: Vec<RecordingEntry> = entries
        .into_iter()
        .filter(|entry| match (entry.started_at.as_deref(), after) {
            (Some(started), Some(after)) => started < after,
            (Some(_), None) => true,
            (None, _) => false,
        })
        .take(limit)
        .collect();
    let total = items.len();
    Page {
        has_next: total == limit,
        has_prev: false,
        total,
        page: 1,
        page_size: limit,
        items,
    }
}

/// Delete a recording. NotFound unless the name refers to an existing
/// regular `.mp4` file directly inside `dir`.
pub fn delete_recording(dir: &Path, filename: &str) -> Result<(), LibraryError> {
    let path = checked_recording_path(dir, filename)?;
    fs::remove_file(path)?;
    Ok(())
}

/// Rename a recording within its directory. The destination must carry the
/// `.mp4` extension and must not exist yet.
pub fn rename_recording(dir: &Path, filename: &str, new_name: &str) -> Result<(), LibraryError> {
    let src = checked_recording_path(dir, filename)?;
    if !is_plain_name(new_name) || !has_mp4_extension(new_name) {
        return Err(LibraryError::InvalidName(new_name.to_string()));
    }
    let dst = dir.join(new_name);
    if dst.exists() {
        return Err(LibraryError::Conflict(new_name.to_string()));
    }
    fs::rename(src, dst)?;
    Ok(())
}

/// Resolve `filename` against `dir`, insisting on an existing regular `.mp4`
/// file addressed by a bare name (no path components).
fn checked_recording_path(dir: &Path, filename: &str) -> Result<std::path::PathBuf, LibraryError> {
    if !is_plain_name(filename) || !has_mp4_extension(filename) {
        return Err(LibraryError::NotFound(filename.to_string()));
    }
    let path = dir.join(filename);
    match fs::metadata(&path) {
        Ok(metadata) if metadata.is_file() => Ok(path),
        _ => Err(LibraryError::NotFound(filename.to_string())),
    }
}

fn has_mp4_extension(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mp4"))
        .unwrap_or(false)
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && !name.contains('/') && !name.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    fn touch(dir: &Path, name: &str, bytes: &[u8]) {
        let mut file = File::create(dir.join(name)).expect("create file");
        file.write_all(bytes).expect("write file");
    }

    #[test]
    fn parses_start_time_from_segment_names() {
        let dt = parse_start_time("2024-01-01_10-00-00.mp4").expect("parse");
        assert_eq!(dt.format("%Y-%m-%dT%H:%M:%S").to_string(), "2024-01-01T10:00:00");
        assert!(parse_start_time("holiday-clip.mp4").is_none());
        assert!(parse_start_time("2024-01-01_10-00.mp4").is_none());
    }

    #[test]
    fn lists_newest_first_with_unparsable_names_last() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "2024-01-01_10-00-00.mp4", b"aa");
        touch(dir.path(), "2024-01-02_10-00-00.mp4", b"bbb");
        touch(dir.path(), "renamed-clip.mp4", b"c");
        touch(dir.path(), "notes.txt", b"ignored");

        let entries = list_recordings(dir.path(), 600).expect("list");
        let names: Vec<&str> = entries.iter().map(|e| e.filename.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "2024-01-02_10-00-00.mp4",
                "2024-01-01_10-00-00.mp4",
                "renamed-clip.mp4",
            ]
        );
        assert_eq!(entries[0].size_bytes, 3);
        assert_eq!(entries[0].url, "/videos/2024-01-02_10-00-00.mp4");
        assert_eq!(entries[0].duration_sec, 600);
        assert!(entries[2].started_at.is_none());
    }

    #[test]
    fn listing_is_idempotent_without_filesystem_changes() {
        let dir = tempfile::tempdir().expect("tempdir");
        for hour in [8, 9, 10, 11] {
            touch(dir.path(), &format!("2024-03-05_{:02}-00-00.mp4", hour), b"x");
        }
        let first = list_recordings(dir.path(), 600).expect("list");
        let second = list_recordings(dir.path(), 600).expect("list");
        let names = |entries: &[RecordingEntry]| -> Vec<String> {
            entries.iter().map(|e| e.filename.clone()).collect()
        };
        assert_eq!(names(&first), names(&second));
    }

    #[test]
    fn paginate_walks_a_120_item_list_in_fifties() {
        let items: Vec<u32> = (0..120).collect();

        let first = paginate(items.clone(), 1, 50);
        assert_eq!(first.items, (0..50).collect::<Vec<u32>>());
        assert!(first.has_next);
        assert!(!first.has_prev);
        assert_eq!(first.total, 120);

        let third = paginate(items.clone(), 3, 50);
        assert_eq!(third.items, (100..120).collect::<Vec<u32>>());
        assert!(!third.has_next);
        assert!(third.has_prev);

        let beyond = paginate(items, 4, 50);
        assert!(beyond.items.is_empty());
        assert!(!beyond.has_next);
    }

    fn entry(started_at: Option<&str>) -> RecordingEntry {
        let filename = started_at
            .map(|s| format!("{}.mp4", s.replace('T', "_").replace(':', "-")))
            .unwrap_or_else(|| "unnamed.mp4".to_string());
        RecordingEntry {
            url: format!("/videos/{}", filename),
            path: format!("/videos/{}", filename),
            size_bytes: 1,
            started_at: started_at.map(String::from),
            duration_sec: 600,
            filename,
        }
    }

    #[test]
    fn cursor_page_returns_strictly_older_entries() {
        let entries = vec![
            entry(Some("2024-01-03T00:00:00")),
            entry(Some("2024-01-02T00:00:00")),
            entry(Some("2024-01-01T00:00:00")),
            entry(None),
        ];
        let page = cursor_page(entries, Some("2024-01-02T00:00:00"), 10);
        assert_eq!(page.items.len(), 1);
        assert_eq!(
            page.items[0].started_at.as_deref(),
            Some("2024-01-01T00:00:00")
        );
        assert!(!page.has_next);
    }

    #[test]
    fn cursor_page_reports_more_when_the_limit_fills() {
        let entries = vec![
            entry(Some("2024-01-03T00:00:00")),
            entry(Some("2024-01-02T00:00:00")),
            entry(Some("2024-01-01T00:00:00")),
        ];
        let page = cursor_page(entries, None, 2);
        assert_eq!(page.items.len(), 2);
        assert!(page.has_next);
    }

    #[test]
    fn time_filters_are_exclusive_and_pass_unparsed_entries() {
        let entries = vec![
            entry(Some("2024-01-03T00:00:00")),
            entry(Some("2024-01-02T00:00:00")),
            entry(Some("2024-01-01T00:00:00")),
            entry(None),
        ];
        let filtered = filter_by_time(
            entries,
            Some("2024-01-01T00:00:00"),
            Some("2024-01-03T00:00:00"),
        );
        let starts: Vec<Option<&str>> = filtered.iter().map(|e| e.started_at.as_deref()).collect();
        assert_eq!(starts, vec![Some("2024-01-02T00:00:00"), None]);
    }

    #[test]
    fn delete_rejects_missing_and_non_mp4_targets() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "keep.txt", b"x");

        assert!(matches!(
            delete_recording(dir.path(), "absent.mp4"),
            Err(LibraryError::NotFound(_))
        ));
        assert!(matches!(
            delete_recording(dir.path(), "keep.txt"),
            Err(LibraryError::NotFound(_))
        ));
        assert!(matches!(
            delete_recording(dir.path(), "../escape.mp4"),
            Err(LibraryError::NotFound(_))
        ));
        assert!(dir.path().join("keep.txt").exists());
    }

    #[test]
    fn delete_removes_an_existing_recording() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "2024-01-01_10-00-00.mp4", b"x");
        delete_recording(dir.path(), "2024-01-01_10-00-00.mp4").expect("delete");
        assert!(!dir.path().join("2024-01-01_10-00-00.mp4").exists());
    }

    #[test]
    fn rename_validates_source_extension_and_destination() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "2024-01-01_10-00-00.mp4", b"src");
        touch(dir.path(), "taken.mp4", b"dst");

        assert!(matches!(
            rename_recording(dir.path(), "absent.mp4", "new.mp4"),
            Err(LibraryError::NotFound(_))
        ));
        assert!(matches!(
            rename_recording(dir.path(), "2024-01-01_10-00-00.mp4", "clip.avi"),
            Err(LibraryError::InvalidName(_))
        ));
        assert!(matches!(
            rename_recording(dir.path(), "2024-01-01_10-00-00.mp4", "taken.mp4"),
            Err(LibraryError::Conflict(_))
        ));
        // The failed attempts left both files untouched.
        assert_eq!(fs::read(dir.path().join("2024-01-01_10-00-00.mp4")).unwrap(), b"src");
        assert_eq!(fs::read(dir.path().join("taken.mp4")).unwrap(), b"dst");

        rename_recording(dir.path(), "2024-01-01_10-00-00.mp4", "front-door.mp4")
            .expect("rename");
        assert!(dir.path().join("front-door.mp4").exists());
        assert!(!dir.path().join("2024-01-01_10-00-00.mp4").exists());
    }
}

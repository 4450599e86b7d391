//! Thumbnail matching
//!
//! Associates a recording with the periodic snapshot closest to its start
//! time. Snapshots and segment boundaries are produced independently and are
//! not synchronized, so matching is tolerant: a direct probe over a small
//! minute window first, then a bounded scan for anything shortly after the
//! start.

use chrono::{Duration, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};

/// Snapshot filenames, minute precision. Parse-side counterpart of the
/// transcoder's strftime option.
pub const SNAPSHOT_MINUTE_FORMAT: &str = "%Y-%m-%d_%H%M";

/// Older snapshot files on disk still use the second-precision pattern.
pub const SNAPSHOT_LEGACY_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Patterns to try when parsing a snapshot name, in priority order.
const SNAPSHOT_STEM_FORMATS: [&str; 2] = [SNAPSHOT_MINUTE_FORMAT, SNAPSHOT_LEGACY_FORMAT];

/// Probe window around the recording start, in minutes.
const PROBE_WINDOW_MINUTES: i64 = 3;

/// Fallback acceptance window after the recording start, in minutes.
const FALLBACK_WINDOW_MINUTES: i64 = 5;

/// The fallback scan only considers the newest this-many snapshot names.
/// Policy bound: with very large snapshot volumes an older valid match
/// beyond this horizon is missed deliberately.
const FALLBACK_SCAN_LIMIT: usize = 500;

/// Parse a snapshot stem under the current pattern, then the legacy one.
pub fn parse_snapshot_stem(stem: &str) -> Option<NaiveDateTime> {
    SNAPSHOT_STEM_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(stem, format).ok())
}

/// Find the snapshot best matching a recording that started at `start`.
///
/// Phase one probes the expected minute-precision names for offsets of
/// -3..=+3 minutes directly (no directory scan); the smallest absolute
/// offset wins, the earlier offset on ties. Phase two scans the newest
/// snapshots for the closest one within five minutes after `start`.
pub fn find_snapshot(snapshot_dir: &Path, start: NaiveDateTime) -> Option<PathBuf> {
    let mut best: Option<(i64, PathBuf)> = None;
    for offset in -PROBE_WINDOW_MINUTES..=PROBE_WINDOW_MINUTES {
        let name = (start + Duration::minutes(offset)).format(SNAPSHOT_MINUTE_FORMAT);
        let path = snapshot_dir.join(format!("{}.jpg", name));
        if !path.is_file() {
            continue;
        }
        let magnitude = offset.abs();
        if best.as_ref().map(|(m, _)| magnitude < *m).unwrap_or(true) {
            best = Some((magnitude, path));
        }
    }
    if let Some((_, path)) = best {
        return Some(path);
    }

    fallback_scan(snapshot_dir, start)
}

/// Scan the newest snapshots for the smallest nonnegative delta from
/// `start`, capped at the fallback window. Name order is chronological
/// under both naming patterns.
fn fallback_scan(snapshot_dir: &Path, start: NaiveDateTime) -> Option<PathBuf> {
    let mut names: Vec<String> = fs::read_dir(snapshot_dir)
        .ok()?
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            let is_jpg = Path::new(&name)
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("jpg"))
                .unwrap_or(false);
            is_jpg.then_some(name)
        })
        .collect();
    names.sort();

    let upper = start + Duration::minutes(FALLBACK_WINDOW_MINUTES);
    let mut best: Option<(i64, &str)> = None;
    for name in names.iter().rev().take(FALLBACK_SCAN_LIMIT) {
        let Some(stem) = Path::new(name).file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(taken) = parse_snapshot_stem(stem) else {
            continue;
        };
        if taken < start || taken > upper {
            continue;
        }
        let delta = (taken - start).num_seconds();
        if best.as_ref().map(|(d, _)| delta < *d).unwrap_or(true) {
            best = Some((delta, name));
        }
    }
    best.map(|(_, name)| snapshot_dir.join(name))
}

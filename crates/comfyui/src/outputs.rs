//! Discovery of rendered files in the server's output directory.
//!
//! ComfyUI writes into `<root>/<YYYY-MM-DD>/` or directly into `<root>`
//! depending on the workflow's save node. A job's `/history` entry names
//! the files it saved; when it does not, the newest matching file wins.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Days, NaiveDate};

/// Extensions searched when none are configured.
pub const DEFAULT_OUTPUT_EXTENSIONS: &[&str] = &["mp4"];

/// Directories searched for `today`: its date partition, the previous
/// day's partition (renders that cross midnight), then the flat root.
pub fn candidate_dirs(root: &Path, today: NaiveDate) -> Vec<PathBuf> {
    let mut dirs = vec![root.join(today.format("%Y-%m-%d").to_string())];
    if let Some(yesterday) = today.checked_sub_days(Days::new(1)) {
        dirs.push(root.join(yesterday.format("%Y-%m-%d").to_string()));
    }
    dirs.push(root.to_path_buf());
    dirs
}

/// Most recently modified file with one of `extensions` under the
/// candidate directories, or `None`. Missing directories are skipped.
pub async fn find_latest_output(
    root: &Path,
    extensions: &[String],
    today: NaiveDate,
) -> std::io::Result<Option<PathBuf>> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for dir in candidate_dirs(root, today) {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !has_extension(&path, extensions) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata.modified()?;
            if newest.as_ref().is_none_or(|(best, _)| modified > *best) {
                newest = Some((modified, path));
            }
        }
    }

    Ok(newest.map(|(_, path)| path))
}

/// Output-relative paths of the files `job_id` saved, as listed in its
/// `/history` entry. Only `"type": "output"` items are returned; temp
/// previews are skipped.
pub fn history_output_files(history: &serde_json::Value, job_id: &str) -> Vec<PathBuf> {
    let Some(nodes) = history
        .get(job_id)
        .and_then(|entry| entry.get("outputs"))
        .and_then(|outputs| outputs.as_object())
    else {
        return Vec::new();
    };

    let mut files = Vec::new();
    for node in nodes.values() {
        let Some(kinds) = node.as_object() else {
            continue;
        };
        for item in kinds.values().filter_map(|v| v.as_array()).flatten() {
            let Some(filename) = item.get("filename").and_then(|f| f.as_str()) else {
                continue;
            };
            if item.get("type").and_then(|t| t.as_str()).is_some_and(|t| t != "output") {
                continue;
            }
            let subfolder = item.get("subfolder").and_then(|s| s.as_str()).unwrap_or("");
            files.push(Path::new(subfolder).join(filename));
        }
    }
    files
}

/// First of `listed` (relative to `root`) that has one of `extensions`
/// and exists on disk.
pub async fn resolve_listed_output(
    root: &Path,
    listed: &[PathBuf],
    extensions: &[String],
) -> Option<PathBuf> {
    for relative in listed {
        if relative.is_absolute() || !has_extension(relative, extensions) {
            continue;
        }
        let path = root.join(relative);
        if tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file()) {
            return Some(path);
        }
    }
    None
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    fn mp4() -> Vec<String> {
        vec!["mp4".to_string()]
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
    }

    fn touch(path: &Path, age: Duration) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let file = std::fs::File::create(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[test]
    fn candidates_include_previous_day_across_month_boundary() {
        let dirs = candidate_dirs(Path::new("/out"), day());
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/out/2026-03-01"),
                PathBuf::from("/out/2026-02-28"),
                PathBuf::from("/out"),
            ]
        );
    }

    #[tokio::test]
    async fn newest_file_across_partition_and_root_wins() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("2026-03-01/older.mp4"), Duration::from_secs(120));
        touch(&root.path().join("flat.mp4"), Duration::from_secs(10));
        touch(&root.path().join("2026-02-28/oldest.mp4"), Duration::from_secs(600));

        let found = find_latest_output(root.path(), &mp4(), day()).await.unwrap();
        assert_eq!(found, Some(root.path().join("flat.mp4")));
    }

    #[tokio::test]
    async fn other_extensions_are_ignored() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("2026-03-01/clip.mp4"), Duration::from_secs(300));
        touch(&root.path().join("2026-03-01/preview.png"), Duration::from_secs(1));

        let found = find_latest_output(root.path(), &mp4(), day()).await.unwrap();
        assert_eq!(found, Some(root.path().join("2026-03-01/clip.mp4")));
    }

    #[tokio::test]
    async fn extension_match_is_case_insensitive() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("CLIP.MP4"), Duration::from_secs(1));

        let found = find_latest_output(root.path(), &mp4(), day()).await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn empty_or_missing_root_is_none() {
        let root = tempfile::tempdir().unwrap();
        assert_eq!(find_latest_output(root.path(), &mp4(), day()).await.unwrap(), None);

        let missing = root.path().join("nope");
        assert_eq!(find_latest_output(&missing, &mp4(), day()).await.unwrap(), None);
    }

    #[test]
    fn history_lists_saved_outputs_and_skips_temp_previews() {
        let history = json!({
            "job-1": {"outputs": {
                "9": {"gifs": [
                    {"filename": "lv_00003.mp4", "subfolder": "2026-03-01", "type": "output"},
                    {"filename": "lv_00003.png", "subfolder": "", "type": "temp"}
                ]},
                "12": {"text": ["not a file"]}
            }}
        });
        assert_eq!(
            history_output_files(&history, "job-1"),
            vec![PathBuf::from("2026-03-01/lv_00003.mp4")]
        );
        assert!(history_output_files(&history, "job-2").is_empty());
    }

    #[tokio::test]
    async fn listed_output_wins_over_newer_file() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("2026-03-01/mine.mp4"), Duration::from_secs(60));
        touch(&root.path().join("2026-03-01/theirs.mp4"), Duration::from_secs(1));

        let listed = vec![
            PathBuf::from("2026-03-01/preview.png"),
            PathBuf::from("2026-03-01/mine.mp4"),
        ];
        let found = resolve_listed_output(root.path(), &listed, &mp4()).await;
        assert_eq!(found, Some(root.path().join("2026-03-01/mine.mp4")));
    }

    #[tokio::test]
    async fn listed_output_missing_on_disk_is_none() {
        let root = tempfile::tempdir().unwrap();
        let listed = vec![PathBuf::from("gone.mp4")];
        assert_eq!(resolve_listed_output(root.path(), &listed, &mp4()).await, None);
    }
}

use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use walkdir::WalkDir;
use log::{debug, info};
use crate::transcode::is_temp_output;

/// A video file found on disk. Only the path is held; contents are never read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFile {
    pub path: PathBuf,
    /// Lower-cased extension without the leading dot
    pub extension: String,
}

impl VideoFile {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lower-cased extension of `path` if it is on the allow-list
fn matching_extension(path: &Path, extensions: &[String]) -> Option<String> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    extensions
        .iter()
        .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&ext))
        .then_some(ext)
}

/// Recursively collect video files under `root`.
///
/// Entries are visited in file-name order within each directory so that the
/// result is stable for a fixed filesystem state. The whole list is built
/// before returning, which keeps outputs written later in the run from being
/// picked up as new inputs. Any traversal error aborts the scan.
pub fn discover_videos(root: &Path, extensions: &[String]) -> Result<Vec<VideoFile>> {
    let meta = std::fs::metadata(root)
        .with_context(|| format!("Target directory is not accessible: {}", root.display()))?;
    if !meta.is_dir() {
        anyhow::bail!("Target path is not a directory: {}", root.display());
    }

    info!("Scanning directory: {}", root.display());

    let mut results = Vec::new();
    let mut entry_count = 0;
    let walker = WalkDir::new(root).follow_links(false).sort_by_file_name();
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to read directory entry under {}", root.display()))?;
        entry_count += 1;

        // Log progress every 1000 entries
        if entry_count % 1000 == 0 {
            info!("Scanned {} entries so far in {}...", entry_count, root.display());
        }

        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(extension) = matching_extension(path, extensions) else {
            continue;
        };

        if is_temp_output(path) {
            debug!("Ignoring leftover temp output: {}", path.display());
            continue;
        }

        debug!("Found video file: {}", path.display());
        results.push(VideoFile {
            path: path.to_path_buf(),
            extension,
        });
    }

    info!("Finished scanning {}: {} entries, {} video files", root.display(), entry_count, results.len());
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::fs;

    fn default_exts() -> Vec<String> {
        vec!["mp4".to_string(), "mkv".to_string(), "avi".to_string()]
    }

    fn touch(root: &Path, rel: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"x").unwrap();
        path
    }

    #[test]
    fn test_discovers_exact_set_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        let expected: BTreeSet<PathBuf> = [
            touch(root, "a.mp4"),
            touch(root, "B.MKV"),
            touch(root, "nested/c.Avi"),
            touch(root, "nested/deeper/d.mkv"),
        ]
        .into_iter()
        .collect();

        touch(root, "notes.txt");
        touch(root, "nested/cover.jpg");
        touch(root, "noextension");
        touch(root, "nested/deeper/clip.mov");
        // A directory whose name looks like a video must not be returned
        fs::create_dir_all(root.join("folder.mp4")).unwrap();

        let found = discover_videos(root, &default_exts()).unwrap();
        let found_set: BTreeSet<PathBuf> = found.iter().map(|v| v.path.clone()).collect();

        assert_eq!(found.len(), found_set.len(), "no duplicates");
        assert_eq!(found_set, expected);
    }

    #[test]
    fn test_extension_is_lowercased() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "MOVIE.MKV");

        let found = discover_videos(dir.path(), &default_exts()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].extension, "mkv");
    }

    #[test]
    fn test_order_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.mp4", "a.mkv", "sub/z.avi", "b.avi"] {
            touch(dir.path(), name);
        }

        let first = discover_videos(dir.path(), &default_exts()).unwrap();
        let second = discover_videos(dir.path(), &default_exts()).unwrap();
        assert_eq!(first, second);

        let names: Vec<_> = first
            .iter()
            .map(|v| v.path.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            names,
            vec![
                PathBuf::from("a.mkv"),
                PathBuf::from("b.avi"),
                PathBuf::from("c.mp4"),
                PathBuf::from("sub/z.avi"),
            ]
        );
    }

    #[test]
    fn test_skips_temp_outputs() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "movie.mkv");
        touch(dir.path(), "movie.hevc-tmp.mp4");

        let found = discover_videos(dir.path(), &default_exts()).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].path.ends_with("movie.mkv"));
    }

    #[test]
    fn test_custom_extensions_accept_leading_dot() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.mov");
        touch(dir.path(), "b.mp4");

        let found = discover_videos(dir.path(), &[".MOV".to_string()]).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].path.ends_with("a.mov"));
    }

    #[test]
    fn test_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_videos(dir.path(), &default_exts()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_videos(&dir.path().join("missing"), &default_exts()).is_err());
    }

    #[test]
    fn test_file_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = touch(dir.path(), "a.mp4");
        assert!(discover_videos(&file, &default_exts()).is_err());
    }
}

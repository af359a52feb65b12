//! Directory browsing for impulse response files
//!
//! Lets a slot step to the previous/next impulse response sitting in the same
//! folder as the one currently loaded.

use std::path::{Path, PathBuf};

/// Extensions recognised as impulse response files
pub const IR_EXTENSIONS: [&str; 4] = ["wav", "aif", "aiff", "flac"];

/// Check whether a path has an impulse response extension
pub fn is_impulse_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| IR_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// List impulse response files directly inside `dir`, sorted by file name.
///
/// Subdirectories are not descended into. An unreadable directory yields an
/// empty list.
pub fn list_impulse_files(dir: &Path) -> Vec<PathBuf> {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return Vec::new(),
    };

    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_impulse_file(path))
        .collect();

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    files
}

/// Find the impulse response `step` positions away from `current` in its
/// folder, wrapping around at both ends.
///
/// Returns `None` if `current` has no parent folder or is not itself among
/// the folder's impulse files.
pub fn sibling_impulse(current: &Path, step: isize) -> Option<PathBuf> {
    let parent = current.parent()?;
    let files = list_impulse_files(parent);
    if files.is_empty() {
        return None;
    }

    let index = files.iter().position(|f| f.file_name() == current.file_name())?;
    let len = files.len() as isize;
    let next = (index as isize + step).rem_euclid(len) as usize;
    Some(files[next].clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"").unwrap();
        path
    }

    #[test]
    fn test_lists_only_impulse_files_sorted() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "b.wav");
        touch(dir.path(), "a.AIFF");
        touch(dir.path(), "notes.txt");
        touch(dir.path(), "c.flac");
        std::fs::create_dir(dir.path().join("sub.wav")).unwrap();

        let names: Vec<String> = list_impulse_files(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.AIFF", "b.wav", "c.flac"]);
    }

    #[test]
    fn test_sibling_wraps_both_ways() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "a.wav");
        let b = touch(dir.path(), "b.wav");
        let c = touch(dir.path(), "c.wav");

        assert_eq!(sibling_impulse(&a, 1), Some(b.clone()));
        assert_eq!(sibling_impulse(&c, 1), Some(a.clone()));
        assert_eq!(sibling_impulse(&a, -1), Some(c.clone()));
        assert_eq!(sibling_impulse(&b, -1), Some(a));
    }

    #[test]
    fn test_sibling_of_unknown_file() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.wav");
        assert_eq!(sibling_impulse(&dir.path().join("gone.wav"), 1), None);
    }

    #[test]
    fn test_single_file_returns_itself() {
        let dir = tempfile::tempdir().unwrap();
        let a = touch(dir.path(), "only.wav");
        assert_eq!(sibling_impulse(&a, 1), Some(a.clone()));
        assert_eq!(sibling_impulse(&a, -1), Some(a));
    }
}

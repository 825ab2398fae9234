//! Recursive enumeration of the files to deploy.
//!
//! Paths are rendered relative to the walk root in the form
//! `<subdir>/<filename>`, with the root itself rendered as `.`
//! (`./a.txt`, `./sub/b.py`).
//!
//! Within a directory, files come before subdirectories and names are sorted,
//! so two walks over an unchanged tree yield the same sequence. Symlinks are
//! not followed: a link to a directory is skipped entirely, which also means
//! symlink cycles cannot cause unbounded recursion. Links to files, including
//! dangling ones, are yielded like regular files.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use walkdir::{DirEntry, WalkDir};

use super::error::DeployError;

/// A file discovered during the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the walk root, e.g. `./sub/b.py`
    pub relative: String,
    /// Directory part of `relative`, e.g. `./sub` (`.` for the root)
    pub subdir: String,
    /// Location on the local filesystem
    pub local: PathBuf,
}

/// Walk `root` depth-first and collect every non-directory entry.
///
/// Any traversal error (permission denied, entry vanished mid-walk) aborts
/// the walk.
pub fn walk(root: &Path) -> Result<Vec<FileEntry>, DeployError> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .sort_by(files_first)
        .into_iter()
    {
        let entry = entry?;
        if !is_deployable(&entry) {
            continue;
        }

        let relative_path = entry.path().strip_prefix(root).map_err(|_| {
            DeployError::Config(format!(
                "{} is outside of {}",
                entry.path().display(),
                root.display()
            ))
        })?;

        entries.push(file_entry(relative_path, entry.path()));
    }

    Ok(entries)
}

fn files_first(a: &DirEntry, b: &DirEntry) -> Ordering {
    a.file_type()
        .is_dir()
        .cmp(&b.file_type().is_dir())
        .then_with(|| a.file_name().cmp(b.file_name()))
}

fn is_deployable(entry: &DirEntry) -> bool {
    let file_type = entry.file_type();
    if file_type.is_dir() {
        return false;
    }
    // Links to directories are treated as directories that are never entered.
    !(file_type.is_symlink() && entry.path().is_dir())
}

fn file_entry(relative_path: &Path, local: &Path) -> FileEntry {
    let mut subdir = String::from(".");
    if let Some(parent) = relative_path.parent() {
        for component in parent.components() {
            subdir.push('/');
            subdir.push_str(&component.as_os_str().to_string_lossy());
        }
    }

    let name = relative_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    FileEntry {
        relative: format!("{subdir}/{name}"),
        subdir,
        local: local.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, relative.as_bytes()).unwrap();
    }

    fn relative_paths(entries: &[FileEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.relative.as_str()).collect()
    }

    mod enumeration {
        use super::*;

        #[test]
        fn test_yields_all_files_and_no_directories() {
            let dir = TempDir::new().unwrap();
            touch(dir.path(), "a.txt");
            touch(dir.path(), "sub/b.py");
            touch(dir.path(), "sub/.hidden");

            let entries = walk(dir.path()).unwrap();
            let found: HashSet<_> = relative_paths(&entries).into_iter().collect();

            let expected: HashSet<_> = ["./a.txt", "./sub/b.py", "./sub/.hidden"]
                .into_iter()
                .collect();
            assert_eq!(found, expected);
            assert_eq!(entries.len(), 3, "no duplicates expected");
        }

        #[test]
        fn test_empty_directory_yields_nothing() {
            let dir = TempDir::new().unwrap();
            fs::create_dir(dir.path().join("empty")).unwrap();

            let entries = walk(dir.path()).unwrap();
            assert!(entries.is_empty());
        }

        #[test]
        fn test_subdir_and_local_path() {
            let dir = TempDir::new().unwrap();
            touch(dir.path(), "a/b/c.sh");
            touch(dir.path(), "top.py");

            let entries = walk(dir.path()).unwrap();
            let nested = entries.iter().find(|e| e.relative == "./a/b/c.sh").unwrap();
            assert_eq!(nested.subdir, "./a/b");
            assert_eq!(nested.local, dir.path().join("a").join("b").join("c.sh"));

            let top = entries.iter().find(|e| e.relative == "./top.py").unwrap();
            assert_eq!(top.subdir, ".");
        }
    }

    mod ordering {
        use super::*;

        #[test]
        fn test_files_before_subdirectories_then_sorted() {
            let dir = TempDir::new().unwrap();
            touch(dir.path(), "z.txt");
            touch(dir.path(), "a/inner.txt");
            touch(dir.path(), "b.txt");

            let entries = walk(dir.path()).unwrap();
            assert_eq!(
                relative_paths(&entries),
                vec!["./b.txt", "./z.txt", "./a/inner.txt"]
            );
        }

        #[test]
        fn test_repeated_walks_are_identical() {
            let dir = TempDir::new().unwrap();
            for name in ["x/1", "x/2", "y/3", "4", "x/z/5"] {
                touch(dir.path(), name);
            }

            let first = walk(dir.path()).unwrap();
            let second = walk(dir.path()).unwrap();
            assert_eq!(first, second);
        }
    }

    #[cfg(unix)]
    mod symlinks {
        use super::*;
        use std::os::unix::fs::symlink;

        #[test]
        fn test_directory_symlink_cycle_is_not_followed() {
            let dir = TempDir::new().unwrap();
            touch(dir.path(), "sub/file.txt");
            symlink(dir.path(), dir.path().join("sub").join("loop")).unwrap();

            let entries = walk(dir.path()).unwrap();
            assert_eq!(relative_paths(&entries), vec!["./sub/file.txt"]);
        }

        #[test]
        fn test_file_symlink_is_yielded() {
            let dir = TempDir::new().unwrap();
            touch(dir.path(), "real.txt");
            symlink(dir.path().join("real.txt"), dir.path().join("alias.txt")).unwrap();

            let entries = walk(dir.path()).unwrap();
            assert_eq!(relative_paths(&entries), vec!["./alias.txt", "./real.txt"]);
        }
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = TempDir::new().unwrap();
        let result = walk(&dir.path().join("nope"));
        assert!(matches!(result, Err(DeployError::Walk(_))));
    }
}

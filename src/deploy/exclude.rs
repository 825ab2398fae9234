//! Exclusion list loading.
//!
//! The exclusion file is plain text with one shell-glob pattern per line.
//! When the file does not exist it is created with three default entries
//! before being read back:
//!
//! 1. the exclusion file itself
//! 2. the launcher script ([`LAUNCHER_ENTRY`])
//! 3. [`DOTFILE_PATTERN`], matching any dotfile or dot-prefixed directory
//!
//! Blank lines are skipped. `#` has no special meaning.

use std::fs;
use std::path::{Component, Path};

use tracing::{debug, info};

use super::error::DeployError;
use super::pattern::PatternSet;

/// Launcher script conventionally kept at the project root.
pub const LAUNCHER_ENTRY: &str = "./deploy.py";

/// Matches any path containing a dot-prefixed segment.
pub const DOTFILE_PATTERN: &str = "*/.*";

/// Default content for a freshly created exclusion file.
pub fn default_entries(exclude_entry: &str) -> [String; 3] {
    [
        exclude_entry.to_string(),
        LAUNCHER_ENTRY.to_string(),
        DOTFILE_PATTERN.to_string(),
    ]
}

/// Render a configured exclusion path the way the walker renders paths.
///
/// Relative paths gain a `./` prefix so the default entry matches the file
/// itself; absolute paths are kept as given.
pub fn walker_form(configured: &str) -> String {
    let path = Path::new(configured);
    match path.components().next() {
        Some(Component::CurDir) | Some(Component::RootDir) | Some(Component::Prefix(_)) | None => {
            configured.to_string()
        }
        _ => format!("./{configured}"),
    }
}

/// Load the exclusion patterns stored at `path`.
///
/// `entry` is how the exclusion file refers to itself in the default set.
/// A missing file is created first. Lines keep their order and lose trailing
/// whitespace; blank lines are dropped.
pub fn load_exclusions(path: &Path, entry: &str) -> Result<Vec<String>, DeployError> {
    if !path.exists() {
        let content: String = default_entries(entry)
            .iter()
            .map(|line| format!("{line}\n"))
            .collect();
        fs::write(path, content).map_err(|source| DeployError::ExcludeFile {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Created default exclusion file {}", path.display());
    }

    let content = fs::read_to_string(path).map_err(|source| DeployError::ExcludeFile {
        path: path.to_path_buf(),
        source,
    })?;

    let patterns: Vec<String> = content
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();

    debug!(
        "Loaded {} exclusion pattern(s) from {}",
        patterns.len(),
        path.display()
    );
    Ok(patterns)
}

/// Load the exclusion file and compile it into a [`PatternSet`].
pub fn load_exclusion_set(path: &Path, entry: &str) -> Result<PatternSet, DeployError> {
    load_exclusions(path, entry).map(PatternSet::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    mod defaults {
        use super::*;

        #[test]
        fn test_creates_file_with_three_default_lines() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join(".ignore");

            let patterns = load_exclusions(&path, "./.ignore").unwrap();

            assert_eq!(patterns, vec!["./.ignore", "./deploy.py", "*/.*"]);
            let written = fs::read_to_string(&path).unwrap();
            assert_eq!(written, "./.ignore\n./deploy.py\n*/.*\n");
        }

        #[test]
        fn test_second_load_does_not_mutate_file() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join(".ignore");

            let first = load_exclusions(&path, "./.ignore").unwrap();
            let before = fs::read(&path).unwrap();
            let second = load_exclusions(&path, "./.ignore").unwrap();
            let after = fs::read(&path).unwrap();

            assert_eq!(first, second);
            assert_eq!(before, after);
        }

        #[test]
        fn test_custom_entry_is_written() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("skip.txt");

            let patterns = load_exclusions(&path, "./skip.txt").unwrap();
            assert_eq!(patterns[0], "./skip.txt");
        }
    }

    mod existing_file {
        use super::*;

        #[test]
        fn test_preserves_order_and_strips_trailing_whitespace() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join(".ignore");
            fs::write(&path, "*.log  \n./build/*\t\n*.tmp").unwrap();

            let patterns = load_exclusions(&path, "./.ignore").unwrap();
            assert_eq!(patterns, vec!["*.log", "./build/*", "*.tmp"]);
        }

        #[test]
        fn test_blank_lines_are_dropped() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join(".ignore");
            fs::write(&path, "*.log\n\n   \n*.tmp\n").unwrap();

            let patterns = load_exclusions(&path, "./.ignore").unwrap();
            assert_eq!(patterns, vec!["*.log", "*.tmp"]);
        }

        #[test]
        fn test_hash_lines_are_patterns() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join(".ignore");
            fs::write(&path, "# not a comment\n").unwrap();

            let patterns = load_exclusions(&path, "./.ignore").unwrap();
            assert_eq!(patterns, vec!["# not a comment"]);
        }

        #[test]
        fn test_empty_file_yields_no_patterns() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join(".ignore");
            fs::write(&path, "").unwrap();

            let set = load_exclusion_set(&path, "./.ignore").unwrap();
            assert!(set.is_empty());
        }
    }

    mod errors {
        use super::*;

        #[test]
        fn test_unwritable_location_is_reported() {
            let dir = TempDir::new().unwrap();
            let path = dir.path().join("missing").join(".ignore");

            let err = load_exclusions(&path, "./.ignore").unwrap_err();
            assert!(matches!(err, DeployError::ExcludeFile { .. }));
        }
    }

    mod walker_form_rendering {
        use super::*;

        #[test]
        fn test_plain_relative_path_gains_prefix() {
            assert_eq!(walker_form(".ignore"), "./.ignore");
            assert_eq!(walker_form("conf/skip"), "./conf/skip");
        }

        #[test]
        fn test_dot_prefixed_path_is_kept() {
            assert_eq!(walker_form("./.ignore"), "./.ignore");
        }

        #[test]
        fn test_absolute_path_is_kept() {
            assert_eq!(walker_form("/etc/ev3.ignore"), "/etc/ev3.ignore");
        }
    }
}

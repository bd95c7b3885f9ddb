//! # File Pattern Expansion
//!
//! Expands `*` and `?` patterns in the filename component of scan inputs.
//! Matches are sorted so the scan's file order is deterministic regardless of
//! directory iteration order.

use eyre::{bail, Result, WrapErr};
use std::path::{Path, PathBuf};

pub fn expand_patterns(patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        if has_glob(pattern) {
            let mut matches = expand_one(Path::new(pattern))?;
            if matches.is_empty() {
                bail!("no files found that match the pattern '{}'", pattern);
            }
            matches.sort();
            files.extend(matches);
        } else {
            let path = PathBuf::from(pattern);
            if !path.is_file() {
                bail!("file '{}' does not exist", pattern);
            }
            files.push(path);
        }
    }
    Ok(files)
}

fn has_glob(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

fn expand_one(pattern: &Path) -> Result<Vec<PathBuf>> {
    let file_pattern = match pattern.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => bail!("invalid glob pattern '{}'", pattern.display()),
    };
    let parent = match pattern.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if has_glob(&parent.to_string_lossy()) {
        bail!(
            "glob characters are only supported in the filename component: '{}'",
            pattern.display()
        );
    }

    let mut matches = Vec::new();
    let entries = std::fs::read_dir(&parent)
        .wrap_err_with(|| format!("cannot read directory '{}'", parent.display()))?;
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        if let Some(name) = name.to_str() {
            if glob_match(file_pattern.as_bytes(), name.as_bytes()) {
                matches.push(entry.path());
            }
        }
    }
    Ok(matches)
}

fn glob_match(pattern: &[u8], name: &[u8]) -> bool {
    match (pattern.first(), name.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], name)
                || (!name.is_empty() && glob_match(pattern, &name[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &name[1..]),
        (Some(a), Some(b)) if a == b => glob_match(&pattern[1..], &name[1..]),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn glob_match_basics() {
        assert!(glob_match(b"*.json", b"data.json"));
        assert!(glob_match(b"part-?.json", b"part-1.json"));
        assert!(!glob_match(b"*.json", b"data.jsonl"));
        assert!(glob_match(b"*", b"anything"));
        assert!(!glob_match(b"part-?.json", b"part-12.json"));
    }

    #[test]
    fn expand_sorts_matches() {
        let dir = tempdir().unwrap();
        for name in ["b.json", "a.json", "c.txt"] {
            File::create(dir.path().join(name)).unwrap();
        }
        let pattern = dir.path().join("*.json").to_string_lossy().into_owned();
        let files = expand_patterns(&[pattern]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[test]
    fn missing_file_errors() {
        let err = expand_patterns(&["/definitely/not/here.json".to_string()]).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn empty_glob_errors() {
        let dir = tempdir().unwrap();
        let pattern = dir.path().join("*.json").to_string_lossy().into_owned();
        let err = expand_patterns(&[pattern]).unwrap_err();
        assert!(err.to_string().contains("no files found"));
    }
}

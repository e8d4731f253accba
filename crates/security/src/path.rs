//! Path resolution and validation for file-touching tools.
//!
//! Relative paths resolve against the loop's working directory. Resolved
//! paths are checked against forbidden locations (e.g. ~/.ssh) and tested for
//! containment in the working directory so the permission manager can ask
//! before a tool reaches outside it.

use std::path::{Component, Path, PathBuf};

/// Error returned when path validation fails.
#[derive(Debug, thiserror::Error)]
pub enum PathValidationError {
    #[error("Path '{path}' matches forbidden pattern '{pattern}'")]
    ForbiddenPath { path: String, pattern: String },

    #[error("Path is empty")]
    Empty,
}

/// Resolve `path` against `working_dir` into an absolute path.
///
/// `.` and `..` are folded lexically, then symlinks are resolved for the
/// longest prefix that exists, so a not-yet-created file still resolves
/// through a symlinked parent directory.
pub fn resolve_path(path: &str, working_dir: &Path) -> PathBuf {
    let expanded = expand_tilde(path);
    let raw = Path::new(&expanded);
    let joined = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        working_dir.join(raw)
    };
    canonicalize_existing_prefix(&normalize_lexically(&joined))
}

/// Validate that `path` is safe to access and return its resolved form.
pub fn validate_path(
    path: &str,
    working_dir: &Path,
    forbidden_paths: &[String],
) -> Result<PathBuf, PathValidationError> {
    if path.trim().is_empty() {
        return Err(PathValidationError::Empty);
    }

    let resolved = resolve_path(path, working_dir);
    let resolved_str = normalize_for_compare(&resolved);

    for forbidden in forbidden_paths {
        let forbidden_resolved = resolve_path(forbidden, working_dir);
        let forbidden_str = normalize_for_compare(&forbidden_resolved);
        if resolved_str == forbidden_str || resolved_str.starts_with(&format!("{forbidden_str}/")) {
            return Err(PathValidationError::ForbiddenPath {
                path: path.into(),
                pattern: forbidden.clone(),
            });
        }
    }

    Ok(resolved)
}

/// Whether `path` lies inside `root` (both resolved).
pub fn is_within(path: &Path, root: &Path) -> bool {
    let root = canonicalize_existing_prefix(&normalize_lexically(root));
    path.starts_with(&root)
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn canonicalize_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut tail = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut result = canonical;
            for part in tail.iter().rev() {
                result.push(part);
            }
            return result;
        }
        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                tail.push(name);
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}

fn normalize_for_compare(path: &Path) -> String {
    let s = path.to_string_lossy().replace('\\', "/");
    // Strip the Windows extended-length prefix that canonicalize() adds.
    let s = s.strip_prefix("//?/").unwrap_or(&s).to_string();
    if cfg!(target_os = "windows") {
        s.to_lowercase()
    } else {
        s
    }
}

/// Expand ~ to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if path.starts_with("~/") || path == "~" {
        if let Some(home) = home_dir() {
            return path.replacen('~', &home, 1);
        }
    }
    path.to_string()
}

fn home_dir() -> Option<String> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE").ok()
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME").ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_resolve_against_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_path("src/main.rs", dir.path());
        assert!(resolved.ends_with("src/main.rs"));
        assert!(is_within(&resolved, dir.path()));
    }

    #[test]
    fn parent_components_fold_before_containment_check() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("project");
        std::fs::create_dir(&inner).unwrap();

        let escaped = resolve_path("../secret.txt", &inner);
        assert!(!is_within(&escaped, &inner));
        assert!(is_within(&escaped, dir.path()));
    }

    #[test]
    fn absolute_paths_are_kept() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = resolve_path("/definitely/elsewhere.txt", dir.path());
        assert_eq!(resolved, PathBuf::from("/definitely/elsewhere.txt"));
        assert!(!is_within(&resolved, dir.path()));
    }

    #[test]
    fn forbidden_path_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let secret = dir.path().join("secrets");
        std::fs::create_dir(&secret).unwrap();
        let forbidden = vec![secret.to_string_lossy().to_string()];

        let err = validate_path("secrets/key.pem", dir.path(), &forbidden).unwrap_err();
        assert!(matches!(err, PathValidationError::ForbiddenPath { .. }));

        // A sibling sharing the prefix is not forbidden.
        assert!(validate_path("secrets-public/readme", dir.path(), &forbidden).is_ok());
    }

    #[test]
    fn forbidden_with_tilde_expansion() {
        if let Some(home) = home_dir() {
            let forbidden = vec!["~/.ssh".into()];
            let ssh_path = format!("{home}/.ssh/id_rsa");
            assert!(validate_path(&ssh_path, Path::new("/"), &forbidden).is_err());
        }
    }

    #[test]
    fn empty_path_rejected() {
        assert!(matches!(
            validate_path("  ", Path::new("/tmp"), &[]),
            Err(PathValidationError::Empty)
        ));
    }
}

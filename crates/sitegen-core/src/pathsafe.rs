//! Path containment and symlink traversal checks.
//!
//! Containment is decided lexically: paths are made absolute and `.`/`..`
//! components are folded away without consulting the filesystem. Because a
//! lexically contained path can still leave the root through a symlink,
//! callers that read or write pair [`resolve_within_root`] or
//! [`is_within_root`] with [`ensure_no_symlink_traversal`].

use std::{
    fs, io,
    path::{Component, Path, PathBuf},
};

use thiserror::Error;

/// Path safety violations.
#[derive(Debug, Error)]
pub enum PathError {
    /// The path escapes the root directory.
    #[error("path resolves outside root: {}", .0.display())]
    OutsideRoot(PathBuf),

    /// A component between the root and the target is a symbolic link.
    #[error("symlink traversal is not allowed: {}", .0.display())]
    SymlinkTraversal(PathBuf),

    /// A path could not be resolved or inspected.
    #[error("inspect {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result type for path safety checks.
pub type Result<T> = std::result::Result<T, PathError>;

/// Make `path` absolute and fold `.` and `..` components lexically.
///
/// Symlinks are not resolved. `..` at the filesystem root stays at the root.
pub fn absolutize(path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    Ok(normalize(&absolute))
}

fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => normalized.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::Normal(part) => normalized.push(part),
        }
    }
    normalized
}

fn absolutize_checked(path: &Path) -> Result<PathBuf> {
    absolutize(path).map_err(|source| PathError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Join `relative` onto `root` and require the result to stay inside `root`.
///
/// Leading slashes in `relative` are treated as part of the relative path, so
/// `"/etc/passwd"` resolves to `<root>/etc/passwd` rather than escaping.
pub fn resolve_within_root(root: &Path, relative: &str) -> Result<PathBuf> {
    let root = absolutize_checked(root)?;
    let resolved = normalize(&root.join(relative.trim_start_matches('/')));

    if !resolved.starts_with(&root) {
        return Err(PathError::OutsideRoot(PathBuf::from(relative)));
    }

    Ok(resolved)
}

/// Whether `target` is `root` itself or lexically below it.
///
/// Paths that cannot be made absolute are reported as outside.
#[must_use]
pub fn is_within_root(root: &Path, target: &Path) -> bool {
    match (absolutize(root), absolutize(target)) {
        (Ok(root), Ok(target)) => target.starts_with(&root),
        _ => false,
    }
}

/// Reject `target` if any existing component between `root` and `target` is a
/// symbolic link.
///
/// The walk stops with success at the first component that does not exist yet.
pub fn ensure_no_symlink_traversal(root: &Path, target: &Path) -> Result<()> {
    let root = absolutize_checked(root)?;
    let target = absolutize_checked(target)?;

    let relative = target
        .strip_prefix(&root)
        .map_err(|_| PathError::OutsideRoot(target.clone()))?;

    let mut current = root.clone();
    for component in relative.components() {
        current.push(component);

        match fs::symlink_metadata(&current) {
            Ok(metadata) if metadata.file_type().is_symlink() => {
                return Err(PathError::SymlinkTraversal(current));
            }
            Ok(_) => {}
            // Nothing past a missing component can be a symlink yet.
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(source) => {
                return Err(PathError::Io {
                    path: current,
                    source,
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_absolutize_folds_dot_segments() {
        let path = absolutize(Path::new("/srv/site/./pages/../index.html")).unwrap();
        assert_eq!(path, PathBuf::from("/srv/site/index.html"));

        let at_root = absolutize(Path::new("/../etc")).unwrap();
        assert_eq!(at_root, PathBuf::from("/etc"));
    }

    #[test]
    fn test_is_within_root() {
        let root = Path::new("/srv/site");

        assert!(is_within_root(root, Path::new("/srv/site")));
        assert!(is_within_root(root, Path::new("/srv/site/css/style.css")));
        assert!(is_within_root(root, Path::new("/srv/site/a/../b.html")));

        assert!(!is_within_root(root, Path::new("/srv")));
        assert!(!is_within_root(root, Path::new("/srv/site/../secret.html")));
        assert!(!is_within_root(root, Path::new("/srv/site-other/index.html")));
    }

    #[test]
    fn test_resolve_within_root_accepts_nested_paths() {
        let root = Path::new("/srv/site");

        let resolved = resolve_within_root(root, "_css/colors.css").unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/site/_css/colors.css"));

        let itself = resolve_within_root(root, ".").unwrap();
        assert_eq!(itself, PathBuf::from("/srv/site"));
    }

    #[test]
    fn test_resolve_within_root_keeps_leading_slash_inside() {
        let resolved = resolve_within_root(Path::new("/srv/site"), "/etc/passwd").unwrap();
        assert_eq!(resolved, PathBuf::from("/srv/site/etc/passwd"));
    }

    #[test]
    fn test_resolve_within_root_rejects_escape() {
        let err = resolve_within_root(Path::new("/srv/site"), "../secret.css").unwrap_err();
        assert!(matches!(err, PathError::OutsideRoot(_)));
        assert!(err.to_string().contains("outside root"));
        assert!(err.to_string().contains("../secret.css"));

        let sneaky = resolve_within_root(Path::new("/srv/site"), "css/../../secret.css");
        assert!(sneaky.is_err());
    }

    #[test]
    fn test_symlink_check_allows_missing_tail() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("exists")).unwrap();

        let target = dir.path().join("exists/not-yet/file.css");
        ensure_no_symlink_traversal(dir.path(), &target).unwrap();
    }

    #[test]
    fn test_symlink_check_rejects_outside_target() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();

        let err = ensure_no_symlink_traversal(&root, &dir.path().join("other")).unwrap_err();
        assert!(err.to_string().contains("outside root"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_check_rejects_final_symlink() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        fs::create_dir_all(&root).unwrap();
        fs::write(dir.path().join("secret.css"), "secret").unwrap();
        std::os::unix::fs::symlink("../secret.css", root.join("link.css")).unwrap();

        let err = ensure_no_symlink_traversal(&root, &root.join("link.css")).unwrap_err();
        assert!(matches!(err, PathError::SymlinkTraversal(_)));
        assert!(err.to_string().contains("symlink traversal"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_check_rejects_intermediate_symlink() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("root");
        let outside = dir.path().join("outside");
        fs::create_dir_all(&root).unwrap();
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("data.txt"), "data").unwrap();
        std::os::unix::fs::symlink(&outside, root.join("linked")).unwrap();

        let target = root.join("linked/data.txt");
        assert!(is_within_root(&root, &target));
        let err = ensure_no_symlink_traversal(&root, &target).unwrap_err();
        assert!(err.to_string().contains("symlink traversal"));
    }

    #[test]
    fn test_symlink_check_accepts_plain_tree() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/c.html"), "c").unwrap();

        ensure_no_symlink_traversal(dir.path(), &dir.path().join("a/b/c.html")).unwrap();
        ensure_no_symlink_traversal(dir.path(), dir.path()).unwrap();
    }
}

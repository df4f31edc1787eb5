//! Zip-slip protection for every path that comes from untrusted input:
//! archive entry names and request-supplied relative paths.

use std::path::{Component, Path, PathBuf};

use crate::error::{EngineError, Result};

/// Join `path` onto `root`, clean the result lexically and require it to sit
/// strictly below the cleaned root.
///
/// Absolute names are rejected, as are names whose `..` segments climb above
/// the starting directory, even when they would land back inside the root.
/// The root itself is not a valid target either.
pub fn sanitize_path<R: AsRef<Path>, P: AsRef<Path>>(root: R, path: P) -> Result<PathBuf> {
    let path = path.as_ref();
    let relative = clean_path(path);
    let climbs = matches!(relative.components().next(), Some(Component::ParentDir));

    if path.has_root() || climbs {
        return Err(EngineError::PathTraversal {
            path: path.to_path_buf(),
        });
    }

    let root = clean_path(root.as_ref());
    let resolved = clean_path(&root.join(relative));

    if resolved == root || !resolved.starts_with(&root) {
        return Err(EngineError::PathTraversal {
            path: path.to_path_buf(),
        });
    }
    Ok(resolved)
}

/// Like [`sanitize_path`], but an empty or `.` path resolves to the root.
pub fn resolve_within<R: AsRef<Path>, P: AsRef<Path>>(root: R, path: P) -> Result<PathBuf> {
    if is_root_relative(path.as_ref()) {
        return Ok(clean_path(root.as_ref()));
    }
    sanitize_path(root, path)
}

/// True when a relative path cleans down to nothing, e.g. `./` in a tarball.
pub fn is_root_relative(path: &Path) -> bool {
    clean_path(path).as_os_str().is_empty()
}

/// Lexical cleaning: drops `.`, resolves `..` against preceding normal
/// components and never climbs above a root. Leading `..` of a relative path
/// are kept.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut parts: Vec<Component<'_>> = Vec::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match parts.last() {
                Some(Component::Normal(_)) => {
                    parts.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => parts.push(component),
            },
            other => parts.push(other),
        }
    }

    parts.iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> &'static Path {
        Path::new("/srv/downloads")
    }

    #[test]
    fn confined_names_are_joined() {
        assert_eq!(
            sanitize_path(root(), "movie/part1.mkv").unwrap(),
            Path::new("/srv/downloads/movie/part1.mkv")
        );
        assert_eq!(
            sanitize_path(root(), "a/./b/../c.txt").unwrap(),
            Path::new("/srv/downloads/a/c.txt")
        );
        assert_eq!(
            sanitize_path("/srv/downloads/", "x").unwrap(),
            Path::new("/srv/downloads/x")
        );
    }

    #[test]
    fn parent_segments_are_rejected() {
        for name in [
            "../evil.sh",
            "a/../../evil.sh",
            "../downloads/x",
            "a/b/../../../etc/passwd",
        ] {
            let err = sanitize_path(root(), name).unwrap_err();
            assert!(matches!(err, EngineError::PathTraversal { .. }), "{name} accepted");
        }
    }

    #[test]
    fn sibling_with_shared_prefix_is_rejected() {
        assert!(sanitize_path(root(), "../downloads-other/file").is_err());
    }

    #[test]
    fn absolute_names_are_rejected() {
        assert!(sanitize_path(root(), "/etc/passwd").is_err());
        assert!(sanitize_path(root(), "/srv/downloads/inside").is_err());
    }

    #[test]
    fn root_itself_is_not_a_target() {
        assert!(sanitize_path(root(), "").is_err());
        assert!(sanitize_path(root(), "a/..").is_err());
        assert_eq!(resolve_within(root(), "").unwrap(), root());
        assert_eq!(resolve_within(root(), "./").unwrap(), root());
    }

    #[test]
    fn relative_roots_are_cleaned() {
        assert_eq!(
            sanitize_path("./downloads", "x/y").unwrap(),
            Path::new("downloads/x/y")
        );
        assert!(sanitize_path("./downloads", "../x").is_err());
    }

    #[test]
    fn cleaning() {
        assert_eq!(clean_path(Path::new("/a/../../b")), Path::new("/b"));
        assert_eq!(clean_path(Path::new("../a/./b/..")), Path::new("../a"));
        assert!(is_root_relative(Path::new("./")));
        assert!(!is_root_relative(Path::new("../")));
    }
}

//! Host-side staging of files that get bind-mounted into tool containers.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tempfile::TempDir;
use uuid::Uuid;

const CALL_PREFIX: &str = "modelbench-call-";
const SHARED_PREFIX: &str = "modelbench-shared-";

fn temp_dir_in(root: Option<&Path>, prefix: &str) -> io::Result<TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(prefix);
    match root {
        Some(root) => builder.tempdir_in(root),
        None => builder.tempdir(),
    }
}

/// Private scratch directory for a single tool call.
///
/// The directory and everything staged in it are deleted when this value is
/// dropped, whatever way the call ends.
#[derive(Debug)]
pub struct CallWorkspace {
    dir: TempDir,
}

impl CallWorkspace {
    pub fn new(root: Option<&Path>) -> io::Result<Self> {
        Ok(Self {
            dir: temp_dir_in(root, CALL_PREFIX)?,
        })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `contents` to a uniquely named file; `label` only makes the name
    /// recognisable.
    pub fn stage(&self, label: &str, contents: &[u8]) -> io::Result<PathBuf> {
        let path = self
            .dir
            .path()
            .join(format!("{}-{}", sanitize(label), Uuid::new_v4().simple()));
        std::fs::write(&path, contents)?;
        Ok(path)
    }
}

/// Directory shared by every tool call within one executor's lifetime.
///
/// Created on first use, reused afterwards, deleted once on [`close`]
/// (or on drop if `close` was never reached).
///
/// [`close`]: SharedDirectory::close
#[derive(Debug, Default)]
pub struct SharedDirectory {
    dir: Mutex<Option<TempDir>>,
}

impl SharedDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path of the shared directory, creating it on the first call.
    pub fn get_or_create(&self, root: Option<&Path>) -> io::Result<PathBuf> {
        let mut guard = self
            .dir
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "shared directory lock poisoned"))?;
        if let Some(dir) = guard.as_ref() {
            return Ok(dir.path().to_path_buf());
        }
        let dir = temp_dir_in(root, SHARED_PREFIX)?;
        let path = dir.path().to_path_buf();
        // Tool images may run as an unprivileged user.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o777))?;
        }
        *guard = Some(dir);
        Ok(path)
    }

    /// Path of the shared directory if it has been created.
    pub fn path(&self) -> Option<PathBuf> {
        self.dir
            .lock()
            .ok()
            .and_then(|g| g.as_ref().map(|d| d.path().to_path_buf()))
    }

    /// Delete the directory. Subsequent calls are no-ops.
    pub fn close(&self) -> io::Result<()> {
        let taken = match self.dir.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        match taken {
            Some(dir) => dir.close(),
            None => Ok(()),
        }
    }
}

/// Keep names to characters that are safe in file and container names.
pub(crate) fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches(|c: char| matches!(c, '.' | '-' | '_'));
    if trimmed.is_empty() {
        "tool".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_workspace_removed_on_drop() {
        let root = tempfile::tempdir().unwrap();
        let ws = CallWorkspace::new(Some(root.path())).unwrap();
        let staged = ws.stage("input", b"payload").unwrap();
        assert_eq!(std::fs::read(&staged).unwrap(), b"payload");

        let dir = ws.path().to_path_buf();
        drop(ws);
        assert!(!dir.exists());
        assert!(!staged.exists());
    }

    #[test]
    fn test_stage_names_are_unique() {
        let ws = CallWorkspace::new(None).unwrap();
        let a = ws.stage("input", b"a").unwrap();
        let b = ws.stage("input", b"b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_shared_directory_is_created_once() {
        let root = tempfile::tempdir().unwrap();
        let shared = SharedDirectory::new();
        assert!(shared.path().is_none());

        let first = shared.get_or_create(Some(root.path())).unwrap();
        for _ in 0..5 {
            assert_eq!(shared.get_or_create(Some(root.path())).unwrap(), first);
        }
        let created = std::fs::read_dir(root.path()).unwrap().count();
        assert_eq!(created, 1);

        shared.close().unwrap();
        assert!(!first.exists());
        shared.close().unwrap();
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("web search"), "web_search");
        assert_eq!(sanitize("../etc"), "etc");
        assert_eq!(sanitize("..."), "tool");
        assert_eq!(sanitize("py-3.12"), "py-3.12");
    }
}

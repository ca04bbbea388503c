//! File-system access for assets

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{AssetError, AssetResult};

/// Directory that relative asset paths resolve against
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetRoot {
    root: PathBuf,
}

impl AssetRoot {
    /// Create a root at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Get the root directory
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Resolve a path; absolute paths are returned unchanged
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }

    /// Read a whole file below the root
    pub fn read(&self, path: impl AsRef<Path>) -> AssetResult<Vec<u8>> {
        let path = self.resolve(path);
        std::fs::read(&path).map_err(|source| AssetError::ReadFailed { path, source })
    }
}

/// Pick a file name `<stem>-<uuid>.<extension>` in `directory` that does not
/// exist yet.
pub fn unique_artifact_path(directory: &Path, stem: &str, extension: &str) -> PathBuf {
    let stem = sanitize_stem(stem);
    loop {
        let candidate = directory.join(format!("{stem}-{}.{extension}", Uuid::new_v4().simple()));
        if !candidate.exists() {
            return candidate;
        }
    }
}

/// Keep file names portable: anything outside `[A-Za-z0-9_-]` becomes `_`
fn sanitize_stem(stem: &str) -> String {
    let sanitized: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if sanitized.is_empty() {
        "asset".to_string()
    } else {
        sanitized
    }
}

/// File name component of an artifact path
pub fn file_name(path: &Path) -> AssetResult<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| AssetError::InvalidData(format!("'{}' has no file name", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_and_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), [1u8, 2, 3]).unwrap();

        let root = AssetRoot::new(dir.path());
        assert_eq!(root.read("a.bin").unwrap(), vec![1, 2, 3]);
        assert!(matches!(root.read("missing.bin"), Err(AssetError::ReadFailed { .. })));
    }

    #[test]
    fn test_unique_names_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_artifact_path(dir.path(), "Mesh 0/prim", "bmesh");
        std::fs::write(&first, b"").unwrap();
        let second = unique_artifact_path(dir.path(), "Mesh 0/prim", "bmesh");

        assert_ne!(first, second);
        assert_eq!(first.parent(), Some(dir.path()));
        let name = file_name(&first).unwrap();
        assert!(name.starts_with("Mesh_0_prim-"));
        assert!(name.ends_with(".bmesh"));
    }

    #[test]
    fn test_empty_stem() {
        assert_eq!(sanitize_stem(""), "asset");
    }
}

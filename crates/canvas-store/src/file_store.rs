//! Canvas documents on disk
//!
//! One JSON document per session at `<root>/<blake3(session id)>.json`.
//! Hashing keeps arbitrary session ids safe as file names. Writes go to a
//! temporary file in the same directory which is then renamed over the
//! target, so an interrupted save leaves the previous document intact.

use std::io::Write;
use std::path::{Path, PathBuf};

use canvas_engine::{CanvasSnapshot, PersistencePort};
use tempfile::NamedTempFile;

use crate::error::{Result, StoreError};

/// File-backed canvas store
#[derive(Debug, Clone)]
pub struct FileCanvasStore {
    root: PathBuf,
}

impl FileCanvasStore {
    /// Create a store rooted at `root`. The directory is created on first save.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Document path for a session; `None` for blank ids
    pub fn path_for(&self, session_id: &str) -> Option<PathBuf> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return None;
        }
        let name = blake3::hash(session_id.as_bytes()).to_hex();
        Some(self.root.join(format!("{}.json", name)))
    }

    /// Read a session's document; `None` if nothing is stored
    pub fn read(&self, session_id: &str) -> Result<Option<CanvasSnapshot>> {
        let Some(path) = self.path_for(session_id) else {
            return Ok(None);
        };
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let snapshot = CanvasSnapshot::from_json_slice(&bytes)?;
        log::debug!("Read canvas '{}' from {:?}", session_id, path);
        Ok(Some(snapshot))
    }

    /// Replace a session's document
    pub fn write(&self, session_id: &str, snapshot: &CanvasSnapshot) -> Result<()> {
        let path = self.path_for(session_id).ok_or(StoreError::EmptySessionId)?;
        std::fs::create_dir_all(&self.root)?;

        let bytes = serde_json::to_vec(snapshot)?;
        let mut tmp = NamedTempFile::new_in(&self.root)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| StoreError::Io(e.error))?;

        log::debug!(
            "Saved canvas '{}' to {:?} ({} nodes, {} bytes)",
            session_id,
            path,
            snapshot.nodes.len(),
            bytes.len()
        );
        Ok(())
    }

    /// Delete a session's document. Returns whether a file was removed.
    pub fn remove(&self, session_id: &str) -> Result<bool> {
        let Some(path) = self.path_for(session_id) else {
            return Ok(false);
        };
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)?;
        log::info!("Deleted canvas '{}' ({:?})", session_id, path);
        Ok(true)
    }
}

impl PersistencePort for FileCanvasStore {
    fn load(&self, session_id: &str) -> canvas_engine::Result<Option<CanvasSnapshot>> {
        Ok(self.read(session_id)?)
    }

    fn save(&self, session_id: &str, snapshot: &CanvasSnapshot) -> canvas_engine::Result<()> {
        Ok(self.write(session_id, snapshot)?)
    }

    fn delete(&self, session_id: &str) -> canvas_engine::Result<()> {
        self.remove(session_id)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canvas_engine::{CanvasError, CanvasNode, NodeData, Position, Viewport};

    fn sample() -> CanvasSnapshot {
        let node = CanvasNode {
            id: "n1".to_string(),
            kind: "text".to_string(),
            position: Position::new(1.0, 2.0),
            z_index: 1,
            data: NodeData::default(),
        };
        CanvasSnapshot::new(vec![node], Vec::new(), Viewport::default())
    }

    #[test]
    fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCanvasStore::new(dir.path().join("canvases"));

        assert!(store.read("project-1").unwrap().is_none());
        store.write("project-1", &sample()).unwrap();
        assert_eq!(store.read("project-1").unwrap(), Some(sample()));

        assert!(store.remove("project-1").unwrap());
        assert!(!store.remove("project-1").unwrap());
        assert!(store.read("project-1").unwrap().is_none());
    }

    #[test]
    fn test_file_name_is_hashed() {
        let store = FileCanvasStore::new("/data");
        let path = store.path_for("../../etc/passwd").unwrap();
        assert_eq!(path.parent(), Some(Path::new("/data")));
        let stem = path.file_stem().unwrap().to_str().unwrap();
        assert_eq!(stem.len(), 64);
        assert!(stem.chars().all(|c| c.is_ascii_hexdigit()));
        // Surrounding whitespace does not change the document
        assert_eq!(store.path_for(" a "), store.path_for("a"));
    }

    #[test]
    fn test_blank_session_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCanvasStore::new(dir.path());
        assert!(matches!(store.write("  ", &sample()), Err(StoreError::EmptySessionId)));
        assert!(store.read("").unwrap().is_none());
        assert!(!store.remove(" ").unwrap());
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCanvasStore::new(dir.path());
        store.write("p", &CanvasSnapshot::default()).unwrap();
        store.write("p", &sample()).unwrap();
        assert_eq!(store.read("p").unwrap(), Some(sample()));
        let files = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(files, 1);
    }

    #[test]
    fn test_unsupported_version_surfaces_through_port() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCanvasStore::new(dir.path());
        let path = store.path_for("p").unwrap();
        std::fs::write(&path, r#"{"version": 7, "nodes": [], "edges": []}"#).unwrap();
        let err = PersistencePort::load(&store, "p").unwrap_err();
        assert!(matches!(err, CanvasError::UnsupportedVersion(7)));
    }
}

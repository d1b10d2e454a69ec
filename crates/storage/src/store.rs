//! Content-addressed object store
//!
//! A bare store on the local filesystem: `objects/<2-hex>/<30-hex>` files
//! holding canonical object bytes. Writes are idempotent (an object that
//! already exists is a no-op) and atomic (temp file + rename). Reads verify
//! the content hash against the requested id and fail with `StoreCorrupt` on
//! mismatch.

use crate::object::{EntryMode, Commit, Object, Tree};
use chrondb_core::{ChronError, ChronResult, ObjectId};
use std::path::{Path, PathBuf};
use tracing::debug;

/// On-disk content-addressed store
pub struct ObjectStore {
    root: PathBuf,
}

impl ObjectStore {
    /// Open (and create if needed) the store under `<data_dir>/objects`.
    pub fn open(data_dir: &Path) -> ChronResult<Self> {
        let root = data_dir.join("objects");
        std::fs::create_dir_all(&root)?;
        Ok(ObjectStore { root })
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        self.root.join(id.hex_prefix()).join(id.hex_rest())
    }

    /// Check whether an object exists without reading it.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.object_path(id).exists()
    }

    /// Write an object; returns its id.
    ///
    /// Writing bytes that already exist is a no-op, which is what makes
    /// object writes idempotent under recovery replay.
    pub fn put(&self, object: &Object) -> ChronResult<ObjectId> {
        let bytes = object.canonical_bytes();
        let id = ObjectId::hash(&bytes);
        let path = self.object_path(&id);
        if path.exists() {
            return Ok(id);
        }
        let dir = path
            .parent()
            .ok_or_else(|| ChronError::internal("object path has no parent"))?;
        std::fs::create_dir_all(dir)?;
        // Temp in the same directory so the rename is atomic on one filesystem.
        let tmp = dir.join(format!(".tmp-{}", id.hex_rest()));
        std::fs::write(&tmp, &bytes)?;
        match std::fs::rename(&tmp, &path) {
            Ok(()) => {}
            Err(e) => {
                let _ = std::fs::remove_file(&tmp);
                // A concurrent writer may have won the rename; that is fine.
                if !path.exists() {
                    return Err(e.into());
                }
            }
        }
        debug!(id = %id, kind = object.kind(), "object written");
        Ok(id)
    }

    /// Write a blob.
    pub fn put_blob(&self, bytes: Vec<u8>) -> ChronResult<ObjectId> {
        self.put(&Object::Blob(bytes))
    }

    /// Write a tree.
    pub fn put_tree(&self, tree: Tree) -> ChronResult<ObjectId> {
        self.put(&Object::Tree(tree))
    }

    /// Write a commit.
    pub fn put_commit(&self, commit: Commit) -> ChronResult<ObjectId> {
        self.put(&Object::Commit(commit))
    }

    /// Read and verify an object.
    pub fn get(&self, id: &ObjectId) -> ChronResult<Object> {
        let path = self.object_path(id);
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ChronError::not_found(format!("object {}", id)))
            }
            Err(e) => return Err(e.into()),
        };
        let actual = ObjectId::hash(&bytes);
        if actual != *id {
            return Err(ChronError::corrupt(format!(
                "object {} hashes to {}",
                id, actual
            )));
        }
        Object::parse(&bytes)
    }

    /// Read an object that must be a blob.
    pub fn get_blob(&self, id: &ObjectId) -> ChronResult<Vec<u8>> {
        match self.get(id)? {
            Object::Blob(bytes) => Ok(bytes),
            other => Err(ChronError::corrupt(format!(
                "object {} is a {}, expected blob",
                id,
                other.kind()
            ))),
        }
    }

    /// Read an object that must be a tree.
    pub fn get_tree(&self, id: &ObjectId) -> ChronResult<Tree> {
        match self.get(id)? {
            Object::Tree(tree) => Ok(tree),
            other => Err(ChronError::corrupt(format!(
                "object {} is a {}, expected tree",
                id,
                other.kind()
            ))),
        }
    }

    /// Read an object that must be a commit.
    pub fn get_commit(&self, id: &ObjectId) -> ChronResult<Commit> {
        match self.get(id)? {
            Object::Commit(commit) => Ok(commit),
            other => Err(ChronError::corrupt(format!(
                "object {} is a {}, expected commit",
                id,
                other.kind()
            ))),
        }
    }

    /// Walk tree edges from a commit by path components.
    ///
    /// Returns the object id at the path, or `None` when any component is
    /// absent. Intermediate components must be directories.
    pub fn resolve(&self, commit_id: &ObjectId, path: &[&str]) -> ChronResult<Option<ObjectId>> {
        let commit = self.get_commit(commit_id)?;
        let mut current = commit.tree;
        if path.is_empty() {
            return Ok(Some(current));
        }
        for (i, component) in path.iter().enumerate() {
            let tree = self.get_tree(&current)?;
            match tree.get(component) {
                None => return Ok(None),
                Some(entry) => {
                    let last = i == path.len() - 1;
                    if last {
                        return Ok(Some(entry.id));
                    }
                    if entry.mode != EntryMode::Dir {
                        return Ok(None);
                    }
                    current = entry.id;
                }
            }
        }
        Ok(None)
    }

    /// Ids of every object currently in the store.
    ///
    /// Used by the remote transport to compute missing sets; the store is
    /// expected to stay small enough per instance for a directory walk.
    pub fn list_ids(&self) -> ChronResult<Vec<ObjectId>> {
        let mut out = Vec::new();
        for prefix in std::fs::read_dir(&self.root)? {
            let prefix = prefix?;
            if !prefix.file_type()?.is_dir() {
                continue;
            }
            let prefix_name = prefix.file_name().to_string_lossy().to_string();
            for entry in std::fs::read_dir(prefix.path())? {
                let entry = entry?;
                let rest = entry.file_name().to_string_lossy().to_string();
                if rest.starts_with('.') {
                    continue;
                }
                if let Ok(id) = ObjectId::from_hex(&format!("{}{}", prefix_name, rest)) {
                    out.push(id);
                }
            }
        }
        Ok(out)
    }

    /// Store root (the `objects/` directory).
    pub fn root(&self) -> &Path {
        &self.root
    }
}

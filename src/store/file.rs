//! One JSON file per record: `<data_dir>/<namespace>/<id>.json`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Namespace, Store, StoreError};

pub struct FileStore {
    root: PathBuf,
    // Serializes existence checks with the write that follows them.
    write_lock: Mutex<()>,
}

fn not_found(ns: Namespace, id: &str) -> StoreError {
    StoreError::NotFound {
        namespace: ns,
        id: id.to_string(),
    }
}

/// IDs come from request paths; anything that could escape the namespace
/// directory simply does not exist.
fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl FileStore {
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        for ns in [Namespace::Containers, Namespace::Services] {
            tokio::fs::create_dir_all(root.join(ns.as_str())).await?;
        }
        log::info!("Opened file store at {root:?}");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn path(&self, ns: Namespace, id: &str) -> Result<PathBuf, StoreError> {
        if !is_safe_id(id) {
            return Err(not_found(ns, id));
        }
        Ok(self.root.join(ns.as_str()).join(format!("{id}.json")))
    }

    async fn write_atomic(&self, path: &Path, value: &[u8]) -> Result<(), StoreError> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn insert(&self, ns: Namespace, id: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path(ns, id)?;
        let _guard = self.write_lock.lock().await;
        if tokio::fs::try_exists(&path).await? {
            return Err(StoreError::AlreadyExists {
                namespace: ns,
                id: id.to_string(),
            });
        }
        self.write_atomic(&path, &value).await
    }

    async fn replace(&self, ns: Namespace, id: &str, value: Vec<u8>) -> Result<(), StoreError> {
        let path = self.path(ns, id)?;
        let _guard = self.write_lock.lock().await;
        if !tokio::fs::try_exists(&path).await? {
            return Err(not_found(ns, id));
        }
        self.write_atomic(&path, &value).await
    }

    async fn get(&self, ns: Namespace, id: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.path(ns, id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found(ns, id)),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, ns: Namespace) -> Result<Vec<Vec<u8>>, StoreError> {
        let mut entries = tokio::fs::read_dir(self.root.join(ns.as_str())).await?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut values = Vec::with_capacity(paths.len());
        for path in paths {
            match tokio::fs::read(&path).await {
                Ok(bytes) => values.push(bytes),
                // Deleted between read_dir and read.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(values)
    }

    async fn remove(&self, ns: Namespace, id: &str) -> Result<(), StoreError> {
        let path = self.path(ns, id)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found(ns, id)),
            Err(e) => Err(e.into()),
        }
    }
}

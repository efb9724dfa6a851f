use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::key::BufferKey;

const WRITE_PROBE: &str = ".write-probe";

/// The directory persisted values live in, one flat file per key, named by
/// the key's hex encoding. A root the buffer created itself is removed when
/// the root drops; a caller-supplied directory is left in place.
#[derive(Debug)]
pub(crate) struct ScratchRoot {
    path: PathBuf,
    // Present only for roots the buffer created; dropping it removes the tree.
    _owned: Option<TempDir>,
}

impl ScratchRoot {
    pub fn create(dir: Option<PathBuf>) -> Result<Self> {
        let root = match dir {
            Some(path) => {
                fs::create_dir_all(&path).map_err(|e| {
                    Error::Uninitialised(format!(
                        "cannot create scratch root {}: {e}",
                        path.display()
                    ))
                })?;
                Self { path, _owned: None }
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("DB-")
                    .tempdir()
                    .map_err(|e| Error::Uninitialised(format!("cannot create scratch root: {e}")))?;
                Self {
                    path: temp.path().to_path_buf(),
                    _owned: Some(temp),
                }
            }
        };
        root.probe()?;
        Ok(root)
    }

    // A directory can exist yet refuse writes; prove it takes files before
    // the worker depends on it.
    fn probe(&self) -> Result<()> {
        let probe = self.path.join(WRITE_PROBE);
        fs::write(&probe, b"probe").map_err(|e| {
            Error::Uninitialised(format!(
                "scratch root {} is not writable: {e}",
                self.path.display()
            ))
        })?;
        fs::remove_file(&probe).map_err(|e| {
            Error::Uninitialised(format!(
                "cannot remove probe file in {}: {e}",
                self.path.display()
            ))
        })?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_for<K: BufferKey>(&self, key: &K) -> PathBuf {
        self.path.join(key.file_name())
    }

    pub fn write<K: BufferKey>(&self, key: &K, value: &[u8]) -> Result<()> {
        fs::write(self.file_for(key), value)?;
        Ok(())
    }

    pub fn read<K: BufferKey>(&self, key: &K) -> Result<Vec<u8>> {
        Ok(fs::read(self.file_for(key))?)
    }

    pub fn size<K: BufferKey>(&self, key: &K) -> Result<u64> {
        Ok(fs::metadata(self.file_for(key))?.len())
    }

    pub fn remove<K: BufferKey>(&self, key: &K) -> Result<()> {
        fs::remove_file(self.file_for(key))?;
        Ok(())
    }

    /// Best-effort removal for abandoned writes; a missing file is fine.
    pub fn discard<K: BufferKey>(&self, key: &K) {
        let _ = fs::remove_file(self.file_for(key));
    }
}

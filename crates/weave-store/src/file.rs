// SPDX-License-Identifier: MIT OR Apache-2.0
//! The one-file-per-digest filesystem backend.

use crate::StoreError;
use crate::backend::Backend;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use weave_core::{Digest, Packed};

/// Backend that files each packed resource at
/// `<root>/<digest[..2]>/<digest>`, with the canonical byte encoding as
/// file contents.
///
/// Writes go through a temp file in the shard directory followed by a
/// rename, so a partially written object is never visible to readers.
/// Commits of a digest that already exists are no-ops.
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
}

impl FileBackend {
    /// Open (creating if needed) a file backend rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the root directory cannot be created.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            context: format!("create store root {}", root.display()),
            source,
        })?;
        Ok(Self { root })
    }

    /// The root directory of this backend.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, digest: &Digest) -> PathBuf {
        self.root.join(&digest.as_str()[..2]).join(digest.as_str())
    }
}

impl Backend for FileBackend {
    fn commit(&self, digest: &Digest, packed: &Packed) -> Result<(), StoreError> {
        let path = self.object_path(digest);
        if path.is_file() {
            return Ok(());
        }

        let shard = path.parent().unwrap_or(&self.root);
        std::fs::create_dir_all(shard).map_err(|source| StoreError::Io {
            context: format!("create shard dir {}", shard.display()),
            source,
        })?;

        let bytes = packed.canonical_bytes()?;
        let mut tmp = tempfile::NamedTempFile::new_in(shard).map_err(|source| StoreError::Io {
            context: format!("create temp file in {}", shard.display()),
            source,
        })?;
        tmp.write_all(&bytes).map_err(|source| StoreError::Io {
            context: format!("write object {}", digest.short()),
            source,
        })?;
        match tmp.persist(&path) {
            Ok(_) => {
                debug!(target: "weave.store", digest = %digest.short(), path = %path.display(), "object written");
                Ok(())
            }
            // A concurrent commit of the same digest may have won the
            // rename; equal content makes that a success.
            Err(_) if path.is_file() => Ok(()),
            Err(err) => Err(StoreError::Io {
                context: format!("persist object {}", digest.short()),
                source: err.error,
            }),
        }
    }

    fn has(&self, digest: &Digest) -> Result<bool, StoreError> {
        Ok(self.object_path(digest).is_file())
    }

    fn get(&self, digest: &Digest) -> Result<Option<Packed>, StoreError> {
        let path = self.object_path(digest);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    context: format!("read object {}", path.display()),
                    source,
                });
            }
        };
        Ok(Some(Packed::from_slice(&bytes)?))
    }
}

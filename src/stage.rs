//! Local materialization of remote objects.
//!
//! A [`StagingArea`] is the directory staged files land in: either one the
//! caller supplied (created if absent, never removed) or a process-generated
//! temporary directory that is removed when the area is dropped. Each
//! download is owned by a [`StagedFile`] guard which deletes the file when
//! it goes out of scope, so the file is released on every exit path of the
//! per-object iteration.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

use crate::config::RetryConfig;
use crate::connector_s3::ObjectStore;
use crate::models::{ObjectMetadata, SourceObject};
use crate::retry::retry_transient;

/// Hex characters of the key hash prefixed to staged file names.
const NAME_HASH_LEN: usize = 12;

/// Longest basename, in bytes, kept in a staged file name. Leaves room for
/// the hash prefix under the common 255-byte file name limit.
const MAX_BASENAME_BYTES: usize = 200;

/// Extensions longer than this are not preserved when shortening a name.
const MAX_EXTENSION_BYTES: usize = 16;

/// Directory that staged files are written to.
#[derive(Debug)]
pub struct StagingArea {
    dir: PathBuf,
    /// Present only for a generated directory that is removed on drop.
    temp: Option<TempDir>,
    cleanup: bool,
    generated: bool,
}

impl StagingArea {
    /// Prepare a staging directory.
    ///
    /// With `local_dir` the directory is created if needed and left in place
    /// afterwards. Without it a temporary directory is generated; it is
    /// removed at the end of the run when `cleanup` is set and kept (along
    /// with every staged file) otherwise.
    pub fn new(local_dir: Option<&Path>, cleanup: bool) -> Result<Self> {
        match local_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).with_context(|| {
                    format!("Failed to create staging directory: {}", dir.display())
                })?;
                Ok(Self {
                    dir: dir.to_path_buf(),
                    temp: None,
                    cleanup,
                    generated: false,
                })
            }
            None => {
                let temp = tempfile::Builder::new()
                    .prefix("rca-ingest-")
                    .tempdir()
                    .context("Failed to create temporary staging directory")?;
                if cleanup {
                    Ok(Self {
                        dir: temp.path().to_path_buf(),
                        temp: Some(temp),
                        cleanup,
                        generated: true,
                    })
                } else {
                    Ok(Self {
                        dir: temp.keep(),
                        temp: None,
                        cleanup,
                        generated: true,
                    })
                }
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Whether staged files are deleted after processing.
    pub fn cleanup(&self) -> bool {
        self.cleanup
    }

    /// True when the directory was generated by this process.
    pub fn is_generated(&self) -> bool {
        self.generated
    }

    /// Local path a given object key is staged at.
    ///
    /// Keys that share a basename in different "folders" map to distinct
    /// files; the original extension is kept for decoder selection, even
    /// when an overlong basename is shortened.
    pub fn file_path_for(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        let name = bounded_basename(object_basename(key), MAX_BASENAME_BYTES);
        self.dir
            .join(format!("{}-{}", &digest[..NAME_HASH_LEN], name))
    }

    /// Release the area at the end of a run.
    ///
    /// A generated directory is removed with everything left in it. Removal
    /// failures are logged and ignored. Dropping the area without calling
    /// this removes the directory as well, silently.
    pub fn close(self) {
        if let Some(temp) = self.temp {
            let path = temp.path().to_path_buf();
            if let Err(e) = temp.close() {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove staging directory");
            }
        }
    }
}

/// Last path segment of an object key.
pub fn object_basename(key: &str) -> &str {
    match key.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        _ => "object",
    }
}

/// Shorten `name` to at most `max` bytes on a char boundary, keeping a short
/// extension intact.
fn bounded_basename(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    let ext = match name.rfind('.') {
        Some(dot) if dot > 0 && name.len() - dot <= MAX_EXTENSION_BYTES => &name[dot..],
        _ => "",
    };
    let stem = &name[..name.len() - ext.len()];
    let mut cut = max - ext.len();
    while !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &stem[..cut], ext)
}

/// A local copy of one object, deleted on drop when cleanup is enabled.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    remove_on_drop: bool,
}

impl StagedFile {
    fn new(path: PathBuf, remove_on_drop: bool) -> Self {
        Self {
            path,
            remove_on_drop,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.remove_on_drop {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove staged file");
            }
        }
    }
}

/// Download `object` into `area` and look up its metadata.
///
/// The returned guard owns the local file. If the download or metadata
/// lookup fails the partially written file is removed before returning.
pub async fn stage_object(
    store: &dyn ObjectStore,
    object: &SourceObject,
    area: &StagingArea,
    retry: &RetryConfig,
) -> Result<(StagedFile, ObjectMetadata)> {
    let staged = StagedFile::new(area.file_path_for(&object.key), area.cleanup());

    let bytes = retry_transient(retry, "download", || {
        store.download_to(&object.key, staged.path())
    })
    .await
    .with_context(|| format!("Failed to download s3://{}/{}", store.bucket(), object.key))?;

    let metadata = retry_transient(retry, "head", || store.head_object(&object.key))
        .await
        .with_context(|| format!("Failed to read metadata of s3://{}/{}", store.bucket(), object.key))?;

    tracing::debug!(key = %object.key, bytes, path = %staged.path().display(), "staged object");
    Ok((staged, metadata))
}

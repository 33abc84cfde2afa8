//! Blob storage boundary.
//!
//! The pipeline reads model outputs through [`BlobFetcher`] and publishes
//! derived artifacts through [`BlobWriter`]. [`LocalBlobStore`] keeps blobs as
//! files under a root directory; the S3 store lives in `s3_store`.

use crate::{PostprocessError, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

/// A listed blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub name: String,
    pub created: DateTime<Utc>,
    pub size: u64,
}

pub trait BlobFetcher {
    fn fetch(&self, path: &str) -> Result<Vec<u8>>;

    /// Every blob whose name starts with `prefix`
    fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>>;

    fn download_to(&self, path: &str, dest: &Path) -> Result<()> {
        let bytes = self.fetch(path)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(dest, bytes)?;
        Ok(())
    }
}

pub trait BlobWriter {
    /// Store `bytes` at `path`. With `overwrite` false an existing blob is an
    /// error ([`PostprocessError::BlobExists`]), never skipped or replaced.
    fn write(&self, path: &str, bytes: &[u8], overwrite: bool) -> Result<()>;

    fn upload_file(&self, path: &str, local: &Path, overwrite: bool) -> Result<()> {
        let bytes = fs::read(local)?;
        self.write(path, &bytes, overwrite)
    }

    /// Human readable location of `path`, for logs
    fn location(&self, path: &str) -> String;
}

/// A container that is both read and written, such as the post-processing output
pub trait BlobStore: BlobFetcher + BlobWriter {}

impl<T: BlobFetcher + BlobWriter + ?Sized> BlobStore for T {}

/// Blobs stored as files under `root`
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
}

impl LocalBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative.components().any(|c| !matches!(c, Component::Normal(_))) {
            return Err(PostprocessError::Validation(format!("invalid blob path {:?}", path)));
        }
        Ok(self.root.join(relative))
    }

    /// Move a fully written temp file into place
    fn commit(&self, tmp: &Path, dest: &Path, overwrite: bool, path: &str) -> Result<()> {
        if overwrite {
            fs::rename(tmp, dest)?;
            return Ok(());
        }
        // hard_link refuses to replace an existing file
        let linked = fs::hard_link(tmp, dest);
        let _ = fs::remove_file(tmp);
        match linked {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(PostprocessError::BlobExists(path.to_string()))
            }
            Err(e) => Err(PostprocessError::Io(e)),
        }
    }

    fn staging_path(dest: &Path) -> PathBuf {
        let name = dest
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        dest.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
    }

    fn prepare(&self, path: &str, overwrite: bool) -> Result<PathBuf> {
        let dest = self.resolve(path)?;
        if !overwrite && dest.exists() {
            return Err(PostprocessError::BlobExists(path.to_string()));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(dest)
    }
}

impl BlobFetcher for LocalBlobStore {
    fn fetch(&self, path: &str) -> Result<Vec<u8>> {
        let source = self.resolve(path)?;
        fs::read(&source).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PostprocessError::BlobNotFound(path.to_string())
            } else {
                PostprocessError::Io(e)
            }
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<BlobEntry>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut entries = Vec::new();
        for file in walk(&self.root)? {
            let Ok(relative) = file.strip_prefix(&self.root) else { continue };
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            if !name.starts_with(prefix) || is_staging(&name) {
                continue;
            }
            let meta = fs::metadata(&file)?;
            let created: SystemTime = meta.created().or_else(|_| meta.modified())?;
            entries.push(BlobEntry {
                name,
                created: DateTime::<Utc>::from(created),
                size: meta.len(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn download_to(&self, path: &str, dest: &Path) -> Result<()> {
        let source = self.resolve(path)?;
        if !source.is_file() {
            return Err(PostprocessError::BlobNotFound(path.to_string()));
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&source, dest)?;
        Ok(())
    }
}

impl BlobWriter for LocalBlobStore {
    fn write(&self, path: &str, bytes: &[u8], overwrite: bool) -> Result<()> {
        let dest = self.prepare(path, overwrite)?;
        let tmp = Self::staging_path(&dest);
        fs::write(&tmp, bytes)?;
        self.commit(&tmp, &dest, overwrite, path)
    }

    fn upload_file(&self, path: &str, local: &Path, overwrite: bool) -> Result<()> {
        let dest = self.prepare(path, overwrite)?;
        let tmp = Self::staging_path(&dest);
        fs::copy(local, &tmp)?;
        self.commit(&tmp, &dest, overwrite, path)
    }

    fn location(&self, path: &str) -> String {
        self.root.join(path).display().to_string()
    }
}

fn is_staging(name: &str) -> bool {
    name.rsplit('/')
        .next()
        .is_some_and(|file| file.starts_with('.') && file.ends_with(".tmp"))
}

fn walk(path: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let p = entry.path();
        if p.is_dir() {
            files.extend(walk(&p)?);
        } else {
            files.push(p);
        }
    }
    Ok(files)
}

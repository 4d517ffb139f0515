//! File-per-key medium.
//!
//! A canonical key `session/proj-1/sess-9` lives at
//! `<root>/session.d/proj-1.d/sess-9.rec`. Inner segments map to `.d`
//! directories and leaves to `.rec` files, so the record for key `b` and the
//! directory holding `b.rec/c` never share a name.
//!
//! Writes go to a hidden temp file in the same directory, are synced, renamed
//! over the target, and the directory is synced again. Readers only ever see
//! a complete old or complete new value.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::medium::{Medium, MediumError, MediumResult};

const EXTENSION: &str = "rec";
const DIR_EXTENSION: &str = "d";
const TEMP_SUFFIX: &str = ".tmp";

/// Medium storing each key as a file under a root directory.
#[derive(Clone, Debug)]
pub struct FileMedium {
    root: PathBuf,
}

impl FileMedium {
    /// Use `root` as the data directory, creating it if needed.
    pub async fn open(root: impl Into<PathBuf>) -> MediumResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        debug!(root = %root.display(), "file medium opened");
        Ok(Self { root })
    }

    /// The data directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every canonical key stored under the root, sorted.
    ///
    /// Walks the whole directory tree. Meant for offline tooling such as
    /// migration and verification, not for serving reads.
    pub fn keys(&self) -> MediumResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in WalkDir::new(&self.root).min_depth(1) {
            let entry = entry.map_err(|e| MediumError::Io(e.into()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            if let Some(key) = key_from_relative(relative) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn path_for(&self, key: &str) -> MediumResult<PathBuf> {
        let invalid = |reason| MediumError::InvalidKey {
            key: key.to_string(),
            reason,
        };
        let mut path = self.root.clone();
        let mut segments = key.split('/').peekable();
        while let Some(segment) = segments.next() {
            if segment.is_empty() {
                return Err(invalid("empty segment"));
            }
            if segment == "." || segment == ".." {
                return Err(invalid("relative path segment"));
            }
            if segment.starts_with('.') {
                return Err(invalid("segment starts with a dot"));
            }
            if segment.contains(['\\', '\0']) {
                return Err(invalid("segment contains a reserved character"));
            }
            if segments.peek().is_some() {
                path.push(format!("{segment}.{DIR_EXTENSION}"));
            } else {
                path.push(format!("{segment}.{EXTENSION}"));
            }
        }
        Ok(path)
    }
}

/// Map a path relative to the root back to its canonical key.
fn key_from_relative(relative: &Path) -> Option<String> {
    let mut names = Vec::new();
    for component in relative.components() {
        names.push(component.as_os_str().to_str()?);
    }
    let leaf = names.pop()?;
    let dir_suffix = format!(".{DIR_EXTENSION}");
    let mut segments = Vec::with_capacity(names.len() + 1);
    for name in names {
        segments.push(visible_stem(name, &dir_suffix)?);
    }
    segments.push(visible_stem(leaf, &format!(".{EXTENSION}"))?);
    Some(segments.join("/"))
}

fn visible_stem<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    let stem = name.strip_suffix(suffix)?;
    (!stem.is_empty() && !stem.starts_with('.')).then_some(stem)
}

/// Flush a directory entry so a completed rename survives a crash.
#[cfg(unix)]
async fn sync_dir(dir: &Path) -> std::io::Result<()> {
    tokio::fs::File::open(dir).await?.sync_all().await
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

#[async_trait]
impl Medium for FileMedium {
    async fn read(&self, key: &str) -> MediumResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> MediumResult<()> {
        let path = self.path_for(key)?;
        let (Some(parent), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(MediumError::InvalidKey {
                key: key.to_string(),
                reason: "key does not name a file",
            });
        };
        tokio::fs::create_dir_all(parent).await?;

        let temp_path = parent.join(format!(
            ".{}.{}{TEMP_SUFFIX}",
            file_name.to_string_lossy(),
            uuid::Uuid::now_v7().simple()
        ));
        let result = async {
            let mut file = tokio::fs::File::create(&temp_path).await?;
            file.write_all(bytes).await?;
            file.sync_all().await?;
            drop(file);
            tokio::fs::rename(&temp_path, &path).await
        }
        .await;

        if let Err(e) = result {
            if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await {
                if cleanup.kind() != ErrorKind::NotFound {
                    warn!(path = %temp_path.display(), error = %cleanup, "failed to remove temp file");
                }
            }
            return Err(e.into());
        }
        sync_dir(parent).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> MediumResult<bool> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

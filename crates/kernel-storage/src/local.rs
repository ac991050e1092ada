//! Local-disk backend (scheme `"file"`). `spec.md` §4.2: durable single-file
//! blobs, written via a temp file + atomic rename so a crash mid-write never
//! leaves a partially-written object visible under its real name.

use std::path::{Component, Path, PathBuf};

use futures::future::BoxFuture;
use kernel_common::error::{KernelError, Result};
use kernel_common::traits::StorageBackend;

pub struct LocalDiskBackend {
    root: PathBuf,
}

impl LocalDiskBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Strips the `file://` prefix and resolves the remainder against
    /// `root`, rejecting `..` components so a crafted URI can't escape it.
    fn resolve(&self, uri: &str) -> Result<PathBuf> {
        let relative = uri
            .strip_prefix("file://")
            .ok_or_else(|| KernelError::ValidationFailed(format!("not a file:// uri: {uri}")))?;
        let relative = Path::new(relative);
        for component in relative.components() {
            match component {
                Component::Normal(_) => {}
                _ => {
                    return Err(KernelError::ValidationFailed(format!(
                        "unsafe path component in uri: {uri}"
                    )))
                }
            }
        }
        Ok(self.root.join(relative))
    }
}

impl StorageBackend for LocalDiskBackend {
    fn scheme(&self) -> &str {
        "file"
    }

    fn save<'a>(&'a self, uri: &'a str, data: &'a [u8]) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = self.resolve(uri)?;
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| KernelError::internal(e.to_string()))?;
            }
            let tmp_path = path.with_extension("tmp-write");
            tokio::fs::write(&tmp_path, data)
                .await
                .map_err(|e| KernelError::internal(e.to_string()))?;
            tokio::fs::rename(&tmp_path, &path)
                .await
                .map_err(|e| KernelError::internal(e.to_string()))?;
            Ok(())
        })
    }

    fn load<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let path = self.resolve(uri)?;
            tokio::fs::read(&path)
                .await
                .map_err(|_| KernelError::NotFound(uri.to_string()))
        })
    }

    fn delete<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let path = self.resolve(uri)?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(KernelError::internal(e.to_string())),
            }
        })
    }

    fn exists<'a>(&'a self, uri: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let path = self.resolve(uri)?;
            Ok(tokio::fs::metadata(&path).await.is_ok())
        })
    }

    fn list<'a>(&'a self) -> BoxFuture<'a, Result<Vec<(String, u64)>>> {
        Box::pin(async move {
            let mut entries = Vec::new();
            let mut stack = vec![self.root.clone()];
            while let Some(dir) = stack.pop() {
                let mut read_dir = match tokio::fs::read_dir(&dir).await {
                    Ok(rd) => rd,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(KernelError::internal(e.to_string())),
                };
                while let Some(entry) = read_dir
                    .next_entry()
                    .await
                    .map_err(|e| KernelError::internal(e.to_string()))?
                {
                    let file_type = entry
                        .file_type()
                        .await
                        .map_err(|e| KernelError::internal(e.to_string()))?;
                    if file_type.is_dir() {
                        stack.push(entry.path());
                        continue;
                    }
                    let relative = entry
                        .path()
                        .strip_prefix(&self.root)
                        .unwrap_or(&entry.path())
                        .to_string_lossy()
                        .replace(std::path::MAIN_SEPARATOR, "/");
                    let len = entry
                        .metadata()
                        .await
                        .map_err(|e| KernelError::internal(e.to_string()))?
                        .len();
                    entries.push((format!("file://{relative}"), len));
                }
            }
            Ok(entries)
        })
    }

    fn supports_listing(&self) -> bool {
        true
    }
}

use std::collections::HashMap;
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{FaasError, Result};

/// Blob store for function source text, addressed by locator.
#[async_trait]
pub trait CodeStore: Send + Sync {
    async fn save_code(&self, locator: &str, source: &str) -> Result<()>;

    async fn get_code(&self, locator: &str) -> Result<String>;

    async fn delete_code(&self, locator: &str) -> Result<()>;
}

/// Code blobs as files below a base directory.
#[derive(Debug, Clone)]
pub struct LocalCodeStore {
    base: PathBuf,
}

impl LocalCodeStore {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn resolve(&self, locator: &str) -> Result<PathBuf> {
        let relative = Path::new(locator);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if locator.is_empty() || escapes {
            return Err(FaasError::validation(format!(
                "invalid code locator: {}",
                locator
            )));
        }
        Ok(self.base.join(relative))
    }
}

#[async_trait]
impl CodeStore for LocalCodeStore {
    async fn save_code(&self, locator: &str, source: &str) -> Result<()> {
        let path = self.resolve(locator)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, source).await?;
        tracing::debug!(path = %path.display(), "Code saved");
        Ok(())
    }

    async fn get_code(&self, locator: &str) -> Result<String> {
        let path = self.resolve(locator)?;
        Ok(tokio::fs::read_to_string(&path).await?)
    }

    async fn delete_code(&self, locator: &str) -> Result<()> {
        let path = self.resolve(locator)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process code store.
#[derive(Debug, Default)]
pub struct MemoryCodeStore {
    blobs: RwLock<HashMap<String, String>>,
}

impl MemoryCodeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CodeStore for MemoryCodeStore {
    async fn save_code(&self, locator: &str, source: &str) -> Result<()> {
        self.blobs
            .write()
            .await
            .insert(locator.to_string(), source.to_string());
        Ok(())
    }

    async fn get_code(&self, locator: &str) -> Result<String> {
        self.blobs.read().await.get(locator).cloned().ok_or_else(|| {
            FaasError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no code stored at {}", locator),
            ))
        })
    }

    async fn delete_code(&self, locator: &str) -> Result<()> {
        self.blobs.write().await.remove(locator);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn local_store_round_trips_nested_locator() {
        let dir = TempDir::new().unwrap();
        let store = LocalCodeStore::new(dir.path());

        store
            .save_code("functions/abc.py", "def handler(e): return e")
            .await
            .unwrap();
        assert!(dir.path().join("functions/abc.py").exists());
        assert_eq!(
            store.get_code("functions/abc.py").await.unwrap(),
            "def handler(e): return e"
        );

        store.delete_code("functions/abc.py").await.unwrap();
        assert!(store.get_code("functions/abc.py").await.is_err());
        // Deleting twice is fine
        store.delete_code("functions/abc.py").await.unwrap();
    }

    #[tokio::test]
    async fn local_store_rejects_escaping_locators() {
        let dir = TempDir::new().unwrap();
        let store = LocalCodeStore::new(dir.path());

        for locator in ["../outside.py", "/etc/passwd", "functions/../../x", ""] {
            let err = store.save_code(locator, "x").await.unwrap_err();
            assert!(err.is_validation(), "{} should be rejected", locator);
        }
    }

    #[tokio::test]
    async fn memory_store_missing_blob_is_error() {
        let store = MemoryCodeStore::new();
        assert!(store.get_code("functions/none.js").await.is_err());
        store.save_code("functions/a.js", "x").await.unwrap();
        assert_eq!(store.get_code("functions/a.js").await.unwrap(), "x");
    }
}

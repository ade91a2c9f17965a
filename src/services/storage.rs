use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::config::Settings;

/// Local-filesystem object store addressed by slash-separated object keys,
/// mirrored to public URLs under the configured base URL.
#[derive(Debug, Clone)]
pub(crate) struct StorageService {
    root: PathBuf,
    public_base_url: String,
}

impl StorageService {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let root = PathBuf::from(&settings.storage().root);
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create storage root {}", root.display()))?;

        Ok(Self { root, public_base_url: settings.storage().public_base_url.clone() })
    }

    pub(crate) fn public_url(&self, object_key: &str) -> String {
        format!("{}/{}", self.public_base_url, object_key)
    }

    /// Maps a public URL served by this instance back to its object key.
    pub(crate) fn key_from_public_url(&self, url: &str) -> Option<String> {
        url.strip_prefix(&self.public_base_url)
            .map(|rest| rest.trim_start_matches('/').to_string())
            .filter(|key| !key.is_empty())
    }

    pub(crate) fn local_path(&self, object_key: &str) -> Result<PathBuf> {
        let relative = Path::new(object_key);
        if relative.is_absolute()
            || relative.components().any(|part| matches!(part, std::path::Component::ParentDir))
        {
            anyhow::bail!("invalid object key: {object_key}");
        }

        Ok(self.root.join(relative))
    }

    pub(crate) async fn put_object(&self, object_key: &str, bytes: &[u8]) -> Result<String> {
        let path = self.local_path(object_key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(self.public_url(object_key))
    }

    pub(crate) async fn read_object(&self, object_key: &str) -> Result<Vec<u8>> {
        let path = self.local_path(object_key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> StorageService {
        StorageService {
            root: std::env::temp_dir().join("probook-storage-test"),
            public_base_url: "http://localhost:8000/media".to_string(),
        }
    }

    #[test]
    fn public_url_roundtrip() {
        let storage = service();
        let url = storage.public_url("user/u1/exports/c1.pdf");
        assert_eq!(url, "http://localhost:8000/media/user/u1/exports/c1.pdf");
        assert_eq!(storage.key_from_public_url(&url).as_deref(), Some("user/u1/exports/c1.pdf"));
    }

    #[test]
    fn foreign_url_is_not_a_key() {
        let storage = service();
        assert!(storage.key_from_public_url("https://elsewhere.example/a.png").is_none());
    }

    #[test]
    fn local_path_rejects_traversal() {
        let storage = service();
        assert!(storage.local_path("../../etc/passwd").is_err());
        assert!(storage.local_path("/etc/passwd").is_err());
        assert!(storage.local_path("user/u1/a.png").is_ok());
    }
}

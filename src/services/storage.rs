use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Filesystem home for uploaded originals.
#[derive(Debug, Clone)]
pub struct OriginalStorage {
    image_dir: PathBuf,
}

impl OriginalStorage {
    pub fn new(image_dir: PathBuf) -> Self {
        Self { image_dir }
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub async fn ensure_storage_dir(&self) -> io::Result<()> {
        if !self.image_dir.exists() {
            fs::create_dir_all(&self.image_dir).await?;
        }
        Ok(())
    }

    /// Unique stored name: `[prefix_]<uuid>.<ext>`, keeping the uploaded
    /// extension when it has one.
    pub fn generate_file_name(
        prefix: Option<&str>,
        original_name: Option<&str>,
        fallback_extension: &str,
    ) -> String {
        let extension = original_name
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .map(|ext| sanitize(&ext.to_lowercase()))
            .filter(|ext| !ext.is_empty())
            .unwrap_or_else(|| fallback_extension.to_string());

        let id = Uuid::new_v4().simple();
        match prefix.map(sanitize).filter(|p| !p.is_empty()) {
            Some(prefix) => format!("{prefix}_{id}.{extension}"),
            None => format!("{id}.{extension}"),
        }
    }

    pub fn path_for(&self, stored_file_name: &str) -> PathBuf {
        self.image_dir.join(stored_file_name)
    }

    pub async fn write(&self, stored_file_name: &str, bytes: &[u8]) -> io::Result<PathBuf> {
        self.ensure_storage_dir().await?;
        let path = self.path_for(stored_file_name);
        fs::write(&path, bytes).await?;
        debug!("Stored original {} ({} bytes)", path.display(), bytes.len());
        Ok(path)
    }

    pub async fn read(&self, stored_file_name: &str) -> io::Result<Vec<u8>> {
        fs::read(self.path_for(stored_file_name)).await
    }

    /// Remove an original. `Ok(false)` when it was already gone.
    pub async fn delete(&self, stored_file_name: &str) -> io::Result<bool> {
        match fs::remove_file(self.path_for(stored_file_name)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_names_keep_extension_and_prefix() {
        let name = OriginalStorage::generate_file_name(Some("news/../x"), Some("Photo.JPG"), "png");
        assert!(name.starts_with("newsx_"));
        assert!(name.ends_with(".jpg"));

        let bare = OriginalStorage::generate_file_name(None, Some("noext"), "webp");
        assert!(bare.ends_with(".webp"));
        assert!(!bare.contains('_'));

        assert_ne!(
            OriginalStorage::generate_file_name(None, None, "png"),
            OriginalStorage::generate_file_name(None, None, "png")
        );
    }

    #[tokio::test]
    async fn test_write_read_delete() {
        let dir = tempfile::tempdir().unwrap();
        let storage = OriginalStorage::new(dir.path().join("images"));

        storage.write("a.png", b"bytes").await.unwrap();
        assert_eq!(storage.read("a.png").await.unwrap(), b"bytes");
        assert!(storage.delete("a.png").await.unwrap());
        assert!(!storage.delete("a.png").await.unwrap());
    }
}

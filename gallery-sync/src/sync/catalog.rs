use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use super::persist::{StoreError, load_json};

#[derive(Debug, Clone, Deserialize)]
struct ProtectedFolder {
    folder: String,
    #[serde(default)]
    password: Value,
}

impl ProtectedFolder {
    /// Only a literal `true` flag protects a folder.
    fn is_protected(&self) -> bool {
        self.password == Value::Bool(true)
    }
}

/// Collections listed in `galleryMetadata.json`; those flagged with
/// `"password": true` are password-protected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct GalleryCatalog {
    categories: BTreeMap<String, Vec<ProtectedFolder>>,
}

impl GalleryCatalog {
    pub async fn load(path: &Path) -> Result<Self, StoreError> {
        load_json(path).await
    }

    /// True when `path` lives in `{category}/{folder}/` for a listed folder.
    pub fn is_protected(&self, path: &str) -> bool {
        let mut segments = path.splitn(3, '/');
        let (Some(category), Some(collection), Some(_)) =
            (segments.next(), segments.next(), segments.next())
        else {
            return false;
        };
        self.categories
            .get(category)
            .is_some_and(|folders| {
                folders
                    .iter()
                    .any(|entry| entry.folder == collection && entry.is_protected())
            })
    }

    pub fn protected_count(&self) -> usize {
        self.categories
            .values()
            .flatten()
            .filter(|entry| entry.is_protected())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reads_protected_folders() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("galleryMetadata.json");
        std::fs::write(
            &path,
            r#"{
                "portfolio": [{"folder": "private-shoot", "password": true}],
                "events": [
                    {"folder": "wedding", "password": true},
                    {"folder": "gala", "password": true},
                    {"folder": "public", "password": false},
                    {"folder": "open-day"},
                    {"folder": "legacy", "password": "hunter2"}
                ]
            }"#,
        )
        .unwrap();

        let catalog = GalleryCatalog::load(&path).await.unwrap();
        assert_eq!(catalog.protected_count(), 3);
        assert!(catalog.is_protected("events/wedding/01.jpg"));
        assert!(catalog.is_protected("portfolio/private-shoot/a.png"));
        assert!(!catalog.is_protected("events/public/01.jpg"));
        assert!(!catalog.is_protected("events/open-day/01.jpg"));
        assert!(!catalog.is_protected("events/legacy/01.jpg"));
        assert!(!catalog.is_protected("events/unlisted/01.jpg"));
        assert!(!catalog.is_protected("portfolio/wedding/01.jpg"));
        assert!(!catalog.is_protected("images/logo.png"));
    }

    #[tokio::test]
    async fn missing_file_protects_nothing() {
        let dir = tempdir().unwrap();
        let catalog = GalleryCatalog::load(&dir.path().join("absent.json"))
            .await
            .unwrap();
        assert_eq!(catalog.protected_count(), 0);
        assert!(!catalog.is_protected("events/wedding/01.jpg"));
    }
}

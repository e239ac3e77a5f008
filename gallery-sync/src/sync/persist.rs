use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Reads a JSON document, returning `T::default()` when the file is absent.
pub async fn load_json<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_slice(&raw).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn to_pretty_json<T: Serialize>(value: &T, path: &Path) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Writes next to the target and renames over it, so readers only ever see
/// the previous or the new document.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let body = to_pretty_json(value, path)?;
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let partial = partial_path(path);
    let mut file = tokio::fs::File::create(&partial).await.map_err(io_err)?;
    file.write_all(&body).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    drop(file);
    tokio::fs::rename(&partial, path).await.map_err(io_err)?;
    Ok(())
}

fn partial_path(target: &Path) -> PathBuf {
    target.with_extension(format!(
        "{}partial",
        target
            .extension()
            .map(|ext| format!("{}.", ext.to_string_lossy()))
            .unwrap_or_default()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_loads_default() {
        let dir = tempdir().unwrap();
        let value: BTreeMap<String, String> =
            load_json(&dir.path().join("absent.json")).await.unwrap();
        assert!(value.is_empty());
    }

    #[tokio::test]
    async fn atomic_write_replaces_and_leaves_no_partial() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("_data/state.json");
        let mut value = BTreeMap::new();
        value.insert("b".to_string(), "2".to_string());
        value.insert("a".to_string(), "1".to_string());

        write_json_atomic(&target, &value).await.unwrap();

        let text = std::fs::read_to_string(&target).unwrap();
        assert_eq!(text, "{\n  \"a\": \"1\",\n  \"b\": \"2\"\n}");
        assert!(!partial_path(&target).exists());
        assert_eq!(
            partial_path(&target),
            dir.path().join("_data/state.json.partial")
        );
    }

    #[tokio::test]
    async fn malformed_json_is_reported() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("bad.json");
        std::fs::write(&target, b"{ nope").unwrap();
        let err = load_json::<BTreeMap<String, String>>(&target)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Json { .. }));
    }
}

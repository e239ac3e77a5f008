use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::keys::DERIVED_EXTENSION;
use super::metadata_source::Dimensions;
use super::persist::{StoreError, load_json, write_json_atomic};

/// One published asset, as read by the site templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    pub url: String,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "type")]
    pub encoding: String,
    #[serde(default)]
    pub preview: Preview,
}

impl AssetRecord {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedRecord {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub encoding: String,
}

impl DerivedRecord {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }
}

/// Serialized as an object, or `null` when no preview is available.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<PreviewFields>", into = "Option<PreviewFields>")]
pub enum Preview {
    Derived(DerivedRecord),
    #[default]
    Missing,
}

// Older indexes wrote `{url: null, width: null, ...}` for failed previews.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PreviewFields {
    url: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    #[serde(rename = "type", default)]
    encoding: Option<String>,
}

impl From<Option<PreviewFields>> for Preview {
    fn from(fields: Option<PreviewFields>) -> Self {
        let Some(fields) = fields else {
            return Preview::Missing;
        };
        match (fields.url, fields.width, fields.height) {
            (Some(url), Some(width), Some(height)) => Preview::Derived(DerivedRecord {
                url,
                width,
                height,
                encoding: fields
                    .encoding
                    .unwrap_or_else(|| DERIVED_EXTENSION.to_string()),
            }),
            _ => Preview::Missing,
        }
    }
}

impl From<Preview> for Option<PreviewFields> {
    fn from(preview: Preview) -> Self {
        match preview {
            Preview::Derived(record) => Some(PreviewFields {
                url: Some(record.url),
                width: Some(record.width),
                height: Some(record.height),
                encoding: Some(record.encoding),
            }),
            Preview::Missing => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetadataIndex {
    path: PathBuf,
    records: BTreeMap<String, AssetRecord>,
}

impl MetadataIndex {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: BTreeMap::new(),
        }
    }

    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = load_json(&path).await?;
        Ok(Self { path, records })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, path: &str) -> Option<&AssetRecord> {
        self.records.get(path)
    }

    pub fn upsert(&mut self, path: impl Into<String>, record: AssetRecord) {
        self.records.insert(path.into(), record);
    }

    pub fn remove(&mut self, path: &str) -> Option<AssetRecord> {
        self.records.remove(path)
    }

    pub fn records(&self) -> &BTreeMap<String, AssetRecord> {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub async fn persist(&self) -> Result<(), StoreError> {
        write_json_atomic(&self.path, &self.records).await
    }
}

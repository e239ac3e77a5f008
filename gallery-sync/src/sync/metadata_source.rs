use std::collections::BTreeMap;
use std::io::Cursor;
use std::str::FromStr;

use image::{ImageFormat, ImageReader};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::metadata::AssetRecord;
use super::preview::DerivationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub dimensions: Dimensions,
    /// Short encoding name as published in the index (`jpg`, `png`, `webp`).
    pub encoding: String,
}

impl ImageInfo {
    pub fn content_type(&self) -> &'static str {
        content_type_for(&self.encoding)
    }
}

/// Supplies width/height/encoding for an original asset.
pub trait MetadataSource: Send + Sync {
    fn probe(&self, path: &str, bytes: &[u8]) -> Result<ImageInfo, DerivationError>;
}

#[derive(Debug, Error)]
#[error("unknown metadata source: {0}")]
pub struct UnknownMetadataSource(String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MetadataSourceKind {
    #[default]
    Decode,
    KeyEmbedded,
    CachedIndex,
}

impl FromStr for MetadataSourceKind {
    type Err = UnknownMetadataSource;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "decode" => Ok(MetadataSourceKind::Decode),
            "key" | "key-embedded" => Ok(MetadataSourceKind::KeyEmbedded),
            "cached" | "cached-index" => Ok(MetadataSourceKind::CachedIndex),
            other => Err(UnknownMetadataSource(other.to_string())),
        }
    }
}

impl MetadataSourceKind {
    /// True when the backend needs the dimension tags of the bucket listing.
    pub fn reads_key_tags(&self) -> bool {
        matches!(self, MetadataSourceKind::KeyEmbedded)
    }

    /// `previous` holds trusted index records and `tagged` the dimensions
    /// read from tagged bucket keys, both keyed by asset path.
    pub fn build(
        &self,
        previous: &BTreeMap<String, AssetRecord>,
        tagged: &BTreeMap<String, Dimensions>,
    ) -> Box<dyn MetadataSource> {
        match self {
            MetadataSourceKind::Decode => Box::new(DecodedHeader),
            MetadataSourceKind::KeyEmbedded => Box::new(KeyEmbedded::new(tagged.clone())),
            MetadataSourceKind::CachedIndex => Box::new(CachedIndex::new(previous.clone())),
        }
    }
}

/// Reads the image header; never decodes pixel data.
#[derive(Debug, Default, Clone, Copy)]
pub struct DecodedHeader;

impl MetadataSource for DecodedHeader {
    fn probe(&self, _path: &str, bytes: &[u8]) -> Result<ImageInfo, DerivationError> {
        probe_header(bytes)
    }
}

/// Takes dimensions from the `__w{W}h{H}` tag of the asset's bucket key and
/// the encoding from its extension. Assets with no tagged key are decoded.
#[derive(Debug, Default, Clone)]
pub struct KeyEmbedded {
    tagged: BTreeMap<String, Dimensions>,
}

impl KeyEmbedded {
    pub fn new(tagged: BTreeMap<String, Dimensions>) -> Self {
        Self { tagged }
    }
}

impl MetadataSource for KeyEmbedded {
    fn probe(&self, path: &str, bytes: &[u8]) -> Result<ImageInfo, DerivationError> {
        if bytes.is_empty() {
            return Err(DerivationError::Empty);
        }
        let Some(dimensions) = self.tagged.get(path).copied() else {
            return probe_header(bytes);
        };
        let encoding = ImageFormat::from_path(path)
            .map(encoding_name)
            .map_err(|_| DerivationError::UnknownFormat)?;
        Ok(ImageInfo {
            dimensions,
            encoding,
        })
    }
}

/// Reuses what the previous index recorded, decoding only unseen paths.
#[derive(Debug, Default, Clone)]
pub struct CachedIndex {
    records: BTreeMap<String, AssetRecord>,
}

impl CachedIndex {
    pub fn new(records: BTreeMap<String, AssetRecord>) -> Self {
        Self { records }
    }
}

impl MetadataSource for CachedIndex {
    fn probe(&self, path: &str, bytes: &[u8]) -> Result<ImageInfo, DerivationError> {
        if bytes.is_empty() {
            return Err(DerivationError::Empty);
        }
        match self.records.get(path) {
            Some(record) => Ok(ImageInfo {
                dimensions: record.dimensions(),
                encoding: record.encoding.clone(),
            }),
            None => probe_header(bytes),
        }
    }
}

pub fn probe_header(bytes: &[u8]) -> Result<ImageInfo, DerivationError> {
    if bytes.is_empty() {
        return Err(DerivationError::Empty);
    }
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(DerivationError::Unreadable)?;
    let format = reader.format().ok_or(DerivationError::UnknownFormat)?;
    let (width, height) = reader.into_dimensions()?;
    Ok(ImageInfo {
        dimensions: Dimensions { width, height },
        encoding: encoding_name(format),
    })
}

pub fn encoding_name(format: ImageFormat) -> String {
    match format {
        ImageFormat::Jpeg => "jpg".to_string(),
        ImageFormat::Png => "png".to_string(),
        ImageFormat::WebP => "webp".to_string(),
        other => other
            .extensions_str()
            .first()
            .map(|ext| ext.to_string())
            .unwrap_or_else(|| "bin".to_string()),
    }
}

pub fn content_type_for(encoding: &str) -> &'static str {
    match encoding {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use super::metadata::{AssetRecord, Preview};
use super::metadata_source::Dimensions;

pub const DERIVED_SUFFIX: &str = "_preview";
pub const DERIVED_EXTENSION: &str = "webp";
pub const DERIVED_CONTENT_TYPE: &str = "image/webp";

#[derive(Debug, Error)]
#[error("unknown key scheme: {0}")]
pub struct UnknownKeyScheme(String);

/// How asset paths are turned into bucket keys.
///
/// `Plain` keys are the relative path itself; `DimensionTagged` keys carry
/// `__w{W}h{H}` before the extension so dimensions can be read back from a
/// bare listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyScheme {
    #[default]
    Plain,
    DimensionTagged,
}

impl FromStr for KeyScheme {
    type Err = UnknownKeyScheme;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "plain" => Ok(KeyScheme::Plain),
            "tagged" | "dimension-tagged" => Ok(KeyScheme::DimensionTagged),
            other => Err(UnknownKeyScheme(other.to_string())),
        }
    }
}

impl KeyScheme {
    pub fn original_key(&self, path: &str, dimensions: Dimensions) -> String {
        match self {
            KeyScheme::Plain => path.to_string(),
            KeyScheme::DimensionTagged => {
                let (stem, ext) = split_extension(path);
                match ext {
                    Some(ext) => format!("{stem}{}.{ext}", dimension_tag(dimensions)),
                    None => format!("{stem}{}", dimension_tag(dimensions)),
                }
            }
        }
    }

    pub fn derived_key(&self, path: &str, dimensions: Dimensions) -> String {
        let (stem, _) = split_extension(path);
        match self {
            KeyScheme::Plain => format!("{stem}{DERIVED_SUFFIX}.{DERIVED_EXTENSION}"),
            KeyScheme::DimensionTagged => format!(
                "{stem}{DERIVED_SUFFIX}{}.{DERIVED_EXTENSION}",
                dimension_tag(dimensions)
            ),
        }
    }

    /// Keys a retained path is expected to occupy in the bucket.
    ///
    /// Plain keys only depend on the path. Tagged keys need the recorded
    /// dimensions, so a path without a record expects nothing.
    pub fn expected_keys(&self, path: &str, record: Option<&AssetRecord>) -> Vec<String> {
        match self {
            KeyScheme::Plain => vec![path.to_string(), plain_derived_key(path)],
            KeyScheme::DimensionTagged => {
                let Some(record) = record else {
                    return Vec::new();
                };
                let mut keys = vec![self.original_key(path, record.dimensions())];
                if let Preview::Derived(derived) = &record.preview {
                    keys.push(self.derived_key(path, derived.dimensions()));
                }
                keys
            }
        }
    }
}

pub fn plain_derived_key(path: &str) -> String {
    KeyScheme::Plain.derived_key(path, Dimensions::default())
}

/// True for file names produced by the deriver (`{stem}_preview.{ext}`).
pub fn is_derived_name(file_name: &str) -> bool {
    let (stem, _) = split_extension(file_name);
    stem.ends_with(DERIVED_SUFFIX) || stem.contains(&format!("{DERIVED_SUFFIX}__w"))
}

pub fn local_derived_path(original: &Path) -> PathBuf {
    let stem = original
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default();
    original.with_file_name(format!("{stem}{DERIVED_SUFFIX}.{DERIVED_EXTENSION}"))
}

/// Reads `__w{W}h{H}.` out of a tagged key.
pub fn parse_dimension_tag(key: &str) -> Option<Dimensions> {
    let (_, name) = key.rsplit_once('/').unwrap_or(("", key));
    let start = name.rfind("__w")?;
    let tag = &name[start + 3..];
    let (width, rest) = tag.split_once('h')?;
    let (height, _) = rest.split_once('.')?;
    Some(Dimensions {
        width: width.parse().ok()?,
        height: height.parse().ok()?,
    })
}

/// Splits a tagged key into the asset path it was made from and its
/// dimensions: `a/1__w10h20.jpg` gives `a/1.jpg`.
pub fn strip_dimension_tag(key: &str) -> Option<(String, Dimensions)> {
    let dimensions = parse_dimension_tag(key)?;
    let name_start = key.rfind('/').map(|idx| idx + 1).unwrap_or(0);
    let tag_start = name_start + key[name_start..].rfind("__w")?;
    let tag_end = tag_start + key[tag_start..].find('.')?;
    Some((
        format!("{}{}", &key[..tag_start], &key[tag_end..]),
        dimensions,
    ))
}

fn dimension_tag(dimensions: Dimensions) -> String {
    format!("__w{}h{}", dimensions.width, dimensions.height)
}

// Only the final path segment is inspected so dotted folder names survive.
fn split_extension(path: &str) -> (&str, Option<&str>) {
    let name_start = path.rfind('/').map(|idx| idx + 1).unwrap_or(0);
    match path[name_start..].rfind('.') {
        Some(dot) if dot > 0 => {
            let split = name_start + dot;
            (&path[..split], Some(&path[split + 1..]))
        }
        _ => (path, None),
    }
}

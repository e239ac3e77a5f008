use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::keys::is_derived_name;
use super::state::Fingerprint;

const ORIGINAL_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Portfolio,
    Events,
    Standalone,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Portfolio => "portfolio",
            Category::Events => "events",
            Category::Standalone => "standalone",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootLayout {
    /// `root/{collection}/{file}`
    Collections,
    /// `root/{file}`
    Flat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRoot {
    pub dir: String,
    pub category: Category,
    pub layout: RootLayout,
    pub optional: bool,
}

impl ScanRoot {
    pub fn new(dir: impl Into<String>, category: Category, layout: RootLayout) -> Self {
        Self {
            dir: dir.into(),
            category,
            layout,
            optional: true,
        }
    }

    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    pub fn contains(&self, path: &str) -> bool {
        path.strip_prefix(self.dir.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

pub fn default_roots() -> Vec<ScanRoot> {
    vec![
        ScanRoot::new("portfolio", Category::Portfolio, RootLayout::Collections),
        ScanRoot::new("events", Category::Events, RootLayout::Collections),
        ScanRoot::new("images", Category::Standalone, RootLayout::Flat),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    /// Relative, `/`-separated path; also the plain bucket key.
    pub path: String,
    pub full_path: PathBuf,
    pub category: Category,
    pub size_bytes: u64,
    pub modified: SystemTime,
}

impl AssetDescriptor {
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_stat(self.size_bytes, self.modified)
    }
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan root {} is unreadable: {source}", .root.display())]
    Unreadable {
        root: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("scan root {} does not exist", .0.display())]
    MissingRoot(PathBuf),
}

#[derive(Debug)]
pub struct RootFailure {
    pub root: ScanRoot,
    pub error: ScanError,
}

#[derive(Debug, Default)]
pub struct ScanOutcome {
    pub assets: Vec<AssetDescriptor>,
    pub failed_roots: Vec<RootFailure>,
}

impl ScanOutcome {
    pub fn is_shielded(&self, path: &str) -> bool {
        self.failed_roots
            .iter()
            .any(|failure| failure.root.contains(path))
    }
}

#[derive(Debug, Clone)]
pub struct FileScanner {
    content_root: PathBuf,
    roots: Vec<ScanRoot>,
}

impl FileScanner {
    pub fn new(content_root: impl Into<PathBuf>, roots: Vec<ScanRoot>) -> Self {
        Self {
            content_root: content_root.into(),
            roots,
        }
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    /// Scans every root; a failing root is reported and does not stop the
    /// others.
    pub async fn scan(&self) -> ScanOutcome {
        let mut outcome = ScanOutcome::default();
        for root in &self.roots {
            match self.scan_root(root).await {
                Ok(assets) => {
                    tracing::debug!(root = %root.dir, count = assets.len(), "scanned root");
                    outcome.assets.extend(assets);
                }
                Err(error) => {
                    tracing::warn!(root = %root.dir, %error, "scan root failed");
                    outcome.failed_roots.push(RootFailure {
                        root: root.clone(),
                        error,
                    });
                }
            }
        }
        outcome
    }

    pub async fn scan_root(&self, root: &ScanRoot) -> Result<Vec<AssetDescriptor>, ScanError> {
        let root_path = self.content_root.join(&root.dir);
        match tokio::fs::metadata(&root_path).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(ScanError::Unreadable {
                    root: root_path,
                    source: io::Error::new(io::ErrorKind::InvalidInput, "not a directory"),
                });
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                if root.optional {
                    return Ok(Vec::new());
                }
                return Err(ScanError::MissingRoot(root_path));
            }
            Err(source) => {
                return Err(ScanError::Unreadable {
                    root: root_path,
                    source,
                });
            }
        }

        let mut assets = Vec::new();
        match root.layout {
            RootLayout::Flat => {
                scan_folder(&root_path, &root.dir, root.category, &mut assets).await?;
            }
            RootLayout::Collections => {
                for collection in list_subdirectories(&root_path).await? {
                    let relative = format!("{}/{}", root.dir, collection);
                    let folder = root_path.join(&collection);
                    scan_folder(&folder, &relative, root.category, &mut assets).await?;
                }
            }
        }
        Ok(assets)
    }
}

async fn list_subdirectories(dir: &Path) -> Result<Vec<String>, ScanError> {
    let unreadable = |source| ScanError::Unreadable {
        root: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(unreadable)?;
    let mut out = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        // Symlinked folders are not followed.
        let file_type = entry.file_type().await.map_err(unreadable)?;
        if file_type.is_dir() {
            out.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    out.sort();
    Ok(out)
}

async fn scan_folder(
    folder: &Path,
    relative: &str,
    category: Category,
    out: &mut Vec<AssetDescriptor>,
) -> Result<(), ScanError> {
    let unreadable = |source| ScanError::Unreadable {
        root: folder.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(folder).await.map_err(unreadable)?;
    while let Some(entry) = entries.next_entry().await.map_err(unreadable)? {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_original_name(&name) {
            continue;
        }
        let full_path = entry.path();
        let meta = tokio::fs::metadata(&full_path).await.map_err(unreadable)?;
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().map_err(unreadable)?;
        out.push(AssetDescriptor {
            path: format!("{relative}/{name}"),
            full_path,
            category,
            size_bytes: meta.len(),
            modified,
        });
    }
    Ok(())
}

pub fn is_original_name(file_name: &str) -> bool {
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return false;
    };
    let ext = ext.to_ascii_lowercase();
    ORIGINAL_EXTENSIONS.contains(&ext.as_str()) && !is_derived_name(file_name)
}

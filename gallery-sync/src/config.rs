use std::fmt;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use gallery_store::BucketCredentials;
use thiserror::Error;
use url::Url;

use crate::sync::keys::KeyScheme;
use crate::sync::metadata_source::MetadataSourceKind;

const DEFAULT_SITE_DIR: &str = "src";
const DEFAULT_BUCKET: &str = "photos";
const DEFAULT_PUBLIC_URL: &str = "https://r2.pbsv.photo";
const MIN_DEFAULT_CONCURRENCY: usize = 4;

const CONTENT_DIR_NAME: &str = "content";
const DATA_DIR_NAME: &str = "_data";
const STATE_FILE_NAME: &str = "uploadState.json";
const INDEX_FILE_NAME: &str = "imageMetadata.json";
const CATALOG_FILE_NAME: &str = "galleryMetadata.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub site_dir: PathBuf,
    pub bucket: String,
    pub public_url: Url,
    pub concurrency: usize,
    pub key_scheme: KeyScheme,
    pub metadata_source: MetadataSourceKind,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let site_dir = read("GALLERY_SITE_DIR")
            .map(|value| expand_with_home(&value))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SITE_DIR));
        let bucket = read("GALLERY_BUCKET").unwrap_or_else(|| DEFAULT_BUCKET.to_string());
        let public_url = parse_public_url(
            &read("GALLERY_PUBLIC_URL").unwrap_or_else(|| DEFAULT_PUBLIC_URL.to_string()),
        )?;
        let concurrency = read("GALLERY_SYNC_CONCURRENCY")
            .and_then(|value| value.trim().parse::<usize>().ok())
            .map(|value| value.max(1))
            .unwrap_or_else(default_concurrency);
        let key_scheme = match read("GALLERY_KEY_SCHEME") {
            Some(value) => value
                .parse::<KeyScheme>()
                .map_err(|err| invalid("GALLERY_KEY_SCHEME", err))?,
            None => KeyScheme::default(),
        };
        let metadata_source = match read("GALLERY_METADATA_SOURCE") {
            Some(value) => value
                .parse::<MetadataSourceKind>()
                .map_err(|err| invalid("GALLERY_METADATA_SOURCE", err))?,
            None => MetadataSourceKind::default(),
        };

        Ok(Self {
            site_dir,
            bucket,
            public_url,
            concurrency,
            key_scheme,
            metadata_source,
        })
    }

    pub fn with_site_dir(mut self, site_dir: impl AsRef<Path>) -> Self {
        self.site_dir = expand_with_home(&site_dir.as_ref().to_string_lossy());
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn content_dir(&self) -> PathBuf {
        self.site_dir.join(CONTENT_DIR_NAME)
    }

    pub fn state_file(&self) -> PathBuf {
        self.site_dir.join(DATA_DIR_NAME).join(STATE_FILE_NAME)
    }

    pub fn index_file(&self) -> PathBuf {
        self.site_dir.join(DATA_DIR_NAME).join(INDEX_FILE_NAME)
    }

    pub fn catalog_file(&self) -> PathBuf {
        self.site_dir.join(DATA_DIR_NAME).join(CATALOG_FILE_NAME)
    }
}

/// Bucket credentials; only ever read from the environment.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteCredentials {
    pub endpoint: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

impl RemoteCredentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |name: &'static str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::Missing(name))
        };
        let endpoint = require("R2_ENDPOINT")?;
        Url::parse(&endpoint).map_err(|err| invalid("R2_ENDPOINT", err))?;
        Ok(Self {
            endpoint,
            access_key_id: require("R2_ACCESS_KEY_ID")?,
            secret_access_key: require("R2_SECRET_ACCESS_KEY")?,
        })
    }

    pub fn to_bucket_credentials(&self) -> BucketCredentials {
        BucketCredentials {
            endpoint: self.endpoint.clone(),
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
        }
    }
}

fn parse_public_url(value: &str) -> Result<Url, ConfigError> {
    // Stored with a trailing slash so the base always names a directory.
    let normalized = format!("{}/", value.trim().trim_end_matches('/'));
    Url::parse(&normalized).map_err(|err| invalid("GALLERY_PUBLIC_URL", err))
}

fn invalid(name: &'static str, err: impl fmt::Display) -> ConfigError {
    ConfigError::Invalid {
        name,
        message: err.to_string(),
    }
}

fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        .max(MIN_DEFAULT_CONCURRENCY)
}

fn expand_with_home(value: &str) -> PathBuf {
    let Some(home) = dirs::home_dir() else {
        return PathBuf::from(value);
    };
    if value == "~" {
        return home;
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_follow_the_site_layout() {
        let config = SyncConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.site_dir, PathBuf::from("src"));
        assert_eq!(config.bucket, "photos");
        assert_eq!(config.public_url.as_str(), "https://r2.pbsv.photo/");
        assert!(config.concurrency >= 4);
        assert_eq!(config.key_scheme, KeyScheme::Plain);
        assert_eq!(config.metadata_source, MetadataSourceKind::Decode);
        assert_eq!(config.content_dir(), PathBuf::from("src/content"));
        assert_eq!(
            config.state_file(),
            PathBuf::from("src/_data/uploadState.json")
        );
        assert_eq!(
            config.index_file(),
            PathBuf::from("src/_data/imageMetadata.json")
        );
        assert_eq!(
            config.catalog_file(),
            PathBuf::from("src/_data/galleryMetadata.json")
        );
    }

    #[test]
    fn reads_overrides() {
        let config = SyncConfig::from_lookup(lookup(&[
            ("GALLERY_SITE_DIR", "/srv/site"),
            ("GALLERY_BUCKET", "gallery"),
            ("GALLERY_PUBLIC_URL", "https://cdn.example/photos"),
            ("GALLERY_SYNC_CONCURRENCY", "0"),
            ("GALLERY_KEY_SCHEME", "tagged"),
            ("GALLERY_METADATA_SOURCE", "cached"),
        ]))
        .unwrap();
        assert_eq!(config.site_dir, PathBuf::from("/srv/site"));
        assert_eq!(config.bucket, "gallery");
        assert_eq!(config.public_url.as_str(), "https://cdn.example/photos/");
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.key_scheme, KeyScheme::DimensionTagged);
        assert_eq!(config.metadata_source, MetadataSourceKind::CachedIndex);
    }

    #[test]
    fn rejects_unknown_scheme() {
        let err = SyncConfig::from_lookup(lookup(&[("GALLERY_KEY_SCHEME", "hashed")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "GALLERY_KEY_SCHEME",
                ..
            }
        ));
    }

    #[test]
    fn garbage_concurrency_falls_back_to_default() {
        let config =
            SyncConfig::from_lookup(lookup(&[("GALLERY_SYNC_CONCURRENCY", "lots")])).unwrap();
        assert!(config.concurrency >= 4);
        assert_eq!(config.with_concurrency(0).concurrency, 1);
    }

    #[test]
    fn credentials_require_all_three_variables() {
        let err = RemoteCredentials::from_lookup(lookup(&[
            ("R2_ENDPOINT", "https://account.r2.example"),
            ("R2_ACCESS_KEY_ID", "id"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("R2_SECRET_ACCESS_KEY")));

        let creds = RemoteCredentials::from_lookup(lookup(&[
            ("R2_ENDPOINT", "https://account.r2.example"),
            ("R2_ACCESS_KEY_ID", "id"),
            ("R2_SECRET_ACCESS_KEY", "secret"),
        ]))
        .unwrap();
        assert!(!format!("{creds:?}").contains("\"secret\""));
        assert_eq!(creds.to_bucket_credentials().access_key_id, "id");
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let err = RemoteCredentials::from_lookup(lookup(&[
            ("R2_ENDPOINT", "not a url"),
            ("R2_ACCESS_KEY_ID", "id"),
            ("R2_SECRET_ACCESS_KEY", "secret"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "R2_ENDPOINT", .. }));
    }

    #[test]
    fn expands_home_prefix() {
        let Some(home) = dirs::home_dir() else {
            return;
        };
        assert_eq!(expand_with_home("~/site"), home.join("site"));
        assert_eq!(expand_with_home("/abs"), PathBuf::from("/abs"));
    }
}

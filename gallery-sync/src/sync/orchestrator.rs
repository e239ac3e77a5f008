use std::collections::{BTreeMap, BTreeSet};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;

use futures_util::TryStreamExt;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinError;
use url::Url;

use super::catalog::GalleryCatalog;
use super::keys::{KeyScheme, strip_dimension_tag};
use super::metadata::{AssetRecord, DerivedRecord, MetadataIndex, Preview};
use super::metadata_source::{Dimensions, MetadataSource, MetadataSourceKind};
use super::persist::StoreError;
use super::pool::{PoolError, WorkerPool};
use super::preview::{DerivationError, PreviewDeriver};
use super::remote::{RemoteError, RemoteObject, RemoteStore};
use super::scanner::{AssetDescriptor, FileScanner};
use super::state::{self, StateSnapshot, StateStore};
use super::summary::{FailureKind, PassPhase, PassSummary, format_bytes};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("state error: {0}")]
    Store(#[from] StoreError),
    #[error("worker pool error: {0}")]
    Pool(#[from] PoolError),
    #[error("pass halted: {source}")]
    Halted {
        #[source]
        source: RemoteError,
        summary: Box<PassSummary>,
    },
}

impl SyncError {
    /// Partial summary of a halted pass.
    pub fn summary(&self) -> Option<&PassSummary> {
        match self {
            SyncError::Halted { summary, .. } => Some(summary),
            _ => None,
        }
    }
}

/// Everything workers write during a pass.
#[derive(Default)]
struct Ledger {
    next_state: StateSnapshot,
    next_records: BTreeMap<String, AssetRecord>,
    summary: PassSummary,
    fatal: Option<RemoteError>,
}

/// What a path looked like after the last successful pass.
#[derive(Default)]
struct Previous {
    state: StateSnapshot,
    records: BTreeMap<String, AssetRecord>,
}

impl Previous {
    fn carry(&self, path: &str, ledger: &mut Ledger) {
        if let Some(fingerprint) = self.state.get(path) {
            ledger
                .next_state
                .insert(path.to_string(), fingerprint.clone());
        }
        if let Some(record) = self.records.get(path) {
            ledger.next_records.insert(path.to_string(), record.clone());
        }
    }
}

pub struct SyncOrchestrator {
    scanner: FileScanner,
    state: StateStore,
    index_path: PathBuf,
    catalog_path: Option<PathBuf>,
    remote: Arc<dyn RemoteStore>,
    public_url: Url,
    key_scheme: KeyScheme,
    metadata_source: MetadataSourceKind,
    pool: WorkerPool,
    deriver: PreviewDeriver,
}

impl SyncOrchestrator {
    pub fn new(
        scanner: FileScanner,
        state: StateStore,
        index_path: PathBuf,
        remote: Arc<dyn RemoteStore>,
        public_url: Url,
    ) -> Self {
        Self {
            scanner,
            state,
            index_path,
            catalog_path: None,
            remote,
            public_url,
            key_scheme: KeyScheme::default(),
            metadata_source: MetadataSourceKind::default(),
            pool: WorkerPool::new(1),
            deriver: PreviewDeriver::new(),
        }
    }

    pub fn with_catalog(mut self, path: PathBuf) -> Self {
        self.catalog_path = Some(path);
        self
    }

    pub fn with_key_scheme(mut self, scheme: KeyScheme) -> Self {
        self.key_scheme = scheme;
        self
    }

    pub fn with_metadata_source(mut self, source: MetadataSourceKind) -> Self {
        self.metadata_source = source;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.pool = WorkerPool::new(concurrency);
        self
    }

    /// Runs one full pass. State and index are only written when the pass
    /// reaches `Persisting`.
    pub async fn run_pass(&self) -> Result<PassSummary, SyncError> {
        enter(PassPhase::Scanning);
        let scan = self.scanner.scan().await;

        enter(PassPhase::Diffing);
        let previous = Previous {
            state: self.state.load().await?,
            records: MetadataIndex::load(self.index_path.clone())
                .await?
                .records()
                .clone(),
        };
        let catalog = match &self.catalog_path {
            Some(path) => GalleryCatalog::load(path).await?,
            None => GalleryCatalog::default(),
        };

        let mut ledger = Ledger::default();
        ledger.summary.concurrency = self.pool.concurrency();
        for failure in &scan.failed_roots {
            ledger.summary.record_failure(
                failure.root.dir.clone(),
                FailureKind::Scan,
                failure.error.to_string(),
            );
        }

        let current: StateSnapshot = scan
            .assets
            .iter()
            .map(|asset| (asset.path.clone(), asset.fingerprint()))
            .collect();
        let diff = state::diff(&current, &previous.state);

        let shielded: BTreeSet<String> = previous
            .state
            .keys()
            .chain(previous.records.keys())
            .filter(|path| !current.contains_key(*path) && scan.is_shielded(path))
            .cloned()
            .collect();
        for path in &shielded {
            tracing::debug!(%path, "root unreadable, keeping previous entry");
            previous.carry(path, &mut ledger);
        }

        let mut pending = Vec::new();
        for asset in scan.assets {
            let unchanged = diff.unchanged.contains(&asset.path);
            if unchanged && previous.records.contains_key(&asset.path) {
                previous.carry(&asset.path, &mut ledger);
                ledger.summary.unchanged += 1;
            } else {
                if unchanged {
                    tracing::debug!(path = %asset.path, "record missing, uploading again");
                }
                pending.push(asset);
            }
        }
        let retained: BTreeSet<String> = current.keys().cloned().chain(shielded).collect();

        tracing::info!(
            unchanged = diff.unchanged.len(),
            changed = diff.changed_or_new.len(),
            removed = diff.removed.len(),
            pending = pending.len(),
            "diff complete"
        );

        // Recorded dimensions are stale for files known to have changed.
        let trusted = |path: &str| {
            !diff.changed_or_new.contains(path) || !previous.state.contains_key(path)
        };
        let cacheable: BTreeMap<String, AssetRecord> = previous
            .records
            .iter()
            .filter(|(path, _)| trusted(path.as_str()))
            .map(|(path, record)| (path.clone(), record.clone()))
            .collect();
        let tagged: BTreeMap<String, Dimensions> = if self.metadata_source.reads_key_tags() {
            self.listed_dimension_tags(&mut ledger)
                .await
                .into_iter()
                .filter(|(path, _)| trusted(path.as_str()))
                .collect()
        } else {
            BTreeMap::new()
        };
        let source: Arc<dyn MetadataSource> =
            Arc::from(self.metadata_source.build(&cacheable, &tagged));

        let ledger = Arc::new(Mutex::new(ledger));
        let previous = Arc::new(previous);

        enter(PassPhase::Uploading);
        let uploader = Arc::new(Uploader {
            remote: self.remote.clone(),
            source,
            deriver: self.deriver,
            key_scheme: self.key_scheme,
            public_url: self.public_url.clone(),
            previous: previous.clone(),
            ledger: ledger.clone(),
        });
        self.pool
            .run(pending, move |asset| {
                let uploader = uploader.clone();
                async move { uploader.upload(asset).await }
            })
            .await?;
        check_fatal(&ledger).await?;

        enter(PassPhase::Listing);
        ledger.lock().await.summary.stats.list_requests += 1;
        let listed: Result<Vec<RemoteObject>, RemoteError> =
            self.remote.list().try_collect().await;

        match listed {
            Ok(objects) => {
                enter(PassPhase::Reconciling);
                let orphans = {
                    let guard = ledger.lock().await;
                    let expected: BTreeSet<String> = retained
                        .iter()
                        .flat_map(|path| {
                            self.key_scheme
                                .expected_keys(path, guard.next_records.get(path))
                        })
                        .collect();
                    objects
                        .into_iter()
                        .map(|object| object.key)
                        .filter(|key| !expected.contains(key))
                        .collect::<Vec<_>>()
                };
                tracing::info!(count = orphans.len(), "orphaned objects");
                let deleter = Arc::new(Deleter {
                    remote: self.remote.clone(),
                    ledger: ledger.clone(),
                });
                self.pool
                    .run(orphans, move |key| {
                        let deleter = deleter.clone();
                        async move { deleter.delete(key).await }
                    })
                    .await?;
                check_fatal(&ledger).await?;
            }
            Err(error) => {
                tracing::warn!(%error, "listing failed, skipping orphan cleanup");
                let mut guard = ledger.lock().await;
                guard.summary.listing_failed = true;
                guard
                    .summary
                    .record_failure("bucket", FailureKind::Listing, error.to_string());
            }
        }

        enter(PassPhase::Persisting);
        let mut guard = ledger.lock().await;
        let ledger = &mut *guard;
        let mut index = MetadataIndex::empty(self.index_path.clone());
        for (path, record) in std::mem::take(&mut ledger.next_records) {
            index.upsert(path, record);
        }
        self.state.persist(&ledger.next_state).await?;
        index.persist().await?;

        let summary = &mut ledger.summary;
        summary.total_assets = index.len();
        summary.protected_assets = index
            .records()
            .keys()
            .filter(|path| catalog.is_protected(path))
            .count();
        summary.public_assets = summary.total_assets - summary.protected_assets;
        summary.final_phase = PassPhase::Done;
        enter(PassPhase::Done);
        Ok(summary.clone())
    }

    /// Dimensions of every tagged key in the bucket, keyed by asset path.
    /// A failed listing leaves every asset to the header decode.
    async fn listed_dimension_tags(&self, ledger: &mut Ledger) -> BTreeMap<String, Dimensions> {
        ledger.summary.stats.list_requests += 1;
        let listed: Result<Vec<RemoteObject>, RemoteError> =
            self.remote.list().try_collect().await;
        match listed {
            Ok(objects) => objects
                .iter()
                .filter_map(|object| strip_dimension_tag(&object.key))
                .collect(),
            Err(error) => {
                tracing::warn!(%error, "listing for key tags failed, decoding headers");
                BTreeMap::new()
            }
        }
    }
}

fn enter(phase: PassPhase) {
    tracing::info!(%phase, "sync phase");
}

async fn check_fatal(ledger: &Mutex<Ledger>) -> Result<(), SyncError> {
    let mut guard = ledger.lock().await;
    let Some(source) = guard.fatal.take() else {
        return Ok(());
    };
    guard.summary.final_phase = PassPhase::Failed;
    enter(PassPhase::Failed);
    tracing::error!(error = %source, "credentials rejected, halting pass");
    Err(SyncError::Halted {
        source,
        summary: Box::new(guard.summary.clone()),
    })
}

#[derive(Debug, Error)]
enum UploadFailure {
    #[error(transparent)]
    Derivation(#[from] DerivationError),
    #[error("preview worker failed: {0}")]
    Blocking(#[from] JoinError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

struct Uploader {
    remote: Arc<dyn RemoteStore>,
    source: Arc<dyn MetadataSource>,
    deriver: PreviewDeriver,
    key_scheme: KeyScheme,
    public_url: Url,
    previous: Arc<Previous>,
    ledger: Arc<Mutex<Ledger>>,
}

impl Uploader {
    async fn upload(&self, asset: AssetDescriptor) -> ControlFlow<()> {
        let fingerprint = asset.fingerprint();
        let failure = match self.publish(&asset).await {
            Ok(record) => {
                let mut ledger = self.ledger.lock().await;
                ledger.next_state.insert(asset.path.clone(), fingerprint);
                ledger.next_records.insert(asset.path.clone(), record);
                ledger.summary.uploaded += 1;
                return ControlFlow::Continue(());
            }
            Err(failure) => failure,
        };

        let mut ledger = self.ledger.lock().await;
        match failure {
            UploadFailure::Remote(error) if error.is_pass_fatal() => {
                ledger
                    .summary
                    .record_failure(asset.path.clone(), FailureKind::Remote, error.to_string());
                ledger.fatal.get_or_insert(error);
                ControlFlow::Break(())
            }
            failure => {
                let kind = match failure {
                    UploadFailure::Remote(_) => FailureKind::Remote,
                    _ => FailureKind::Derivation,
                };
                tracing::warn!(path = %asset.path, error = %failure, "asset skipped");
                ledger
                    .summary
                    .record_failure(asset.path.clone(), kind, failure.to_string());
                ledger.summary.skipped += 1;
                self.previous.carry(&asset.path, &mut ledger);
                ControlFlow::Continue(())
            }
        }
    }

    async fn publish(&self, asset: &AssetDescriptor) -> Result<AssetRecord, UploadFailure> {
        let bytes = tokio::fs::read(&asset.full_path)
            .await
            .map_err(DerivationError::Unreadable)?;

        let source = self.source.clone();
        let deriver = self.deriver;
        let path = asset.path.clone();
        let category = asset.category;
        let (bytes, info, preview) = tokio::task::spawn_blocking(move || {
            let info = source.probe(&path, &bytes)?;
            let preview = deriver.derive(&bytes, category)?;
            Ok::<_, DerivationError>((bytes, info, preview))
        })
        .await??;

        let original_key = self.key_scheme.original_key(&asset.path, info.dimensions);
        let derived_key = self
            .key_scheme
            .derived_key(&asset.path, preview.info.dimensions);

        self.put(&original_key, bytes, info.content_type()).await?;
        self.put(&derived_key, preview.bytes, preview.info.content_type())
            .await?;

        Ok(AssetRecord {
            url: self.url_for(&original_key),
            width: info.dimensions.width,
            height: info.dimensions.height,
            encoding: info.encoding,
            preview: Preview::Derived(DerivedRecord {
                url: self.url_for(&derived_key),
                width: preview.info.dimensions.width,
                height: preview.info.dimensions.height,
                encoding: preview.info.encoding,
            }),
        })
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), RemoteError> {
        let size = bytes.len() as u64;
        let result = self.remote.put(key, bytes, content_type).await;
        let mut ledger = self.ledger.lock().await;
        ledger.summary.stats.put_requests += 1;
        if result.is_ok() {
            ledger.summary.stats.bytes_uploaded += size;
            tracing::info!(%key, size = %format_bytes(size), "uploaded");
        }
        result
    }

    fn url_for(&self, key: &str) -> String {
        public_url_for(&self.public_url, key)
    }
}

/// Appends `key` to `base` one percent-encoded segment at a time, so `#`,
/// `?` and spaces in file names stay part of the path.
pub fn public_url_for(base: &Url, key: &str) -> String {
    let mut url = base.clone();
    match url.path_segments_mut() {
        Ok(mut segments) => {
            segments.pop_if_empty().extend(key.split('/'));
        }
        Err(()) => return format!("{}/{key}", base.as_str().trim_end_matches('/')),
    }
    url.to_string()
}

struct Deleter {
    remote: Arc<dyn RemoteStore>,
    ledger: Arc<Mutex<Ledger>>,
}

impl Deleter {
    async fn delete(&self, key: String) -> ControlFlow<()> {
        let result = self.remote.delete(&key).await;
        let mut ledger = self.ledger.lock().await;
        ledger.summary.stats.delete_requests += 1;
        match result {
            Ok(()) => {
                tracing::info!(%key, "deleted orphan");
                ledger.summary.deleted += 1;
                ControlFlow::Continue(())
            }
            Err(error) => {
                ledger
                    .summary
                    .record_failure(key.clone(), FailureKind::Remote, error.to_string());
                if error.is_pass_fatal() {
                    ledger.fatal.get_or_insert(error);
                    return ControlFlow::Break(());
                }
                tracing::warn!(%key, %error, "delete failed");
                ControlFlow::Continue(())
            }
        }
    }
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;

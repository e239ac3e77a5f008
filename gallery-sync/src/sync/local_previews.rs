use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::keys::local_derived_path;
use super::pool::{PoolError, WorkerPool};
use super::preview::{DerivationError, PreviewDeriver};
use super::scanner::{AssetDescriptor, FileScanner};
use super::summary::{FailureKind, ItemFailure};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PreviewReport {
    pub generated: usize,
    pub existing: usize,
    pub failures: Vec<ItemFailure>,
}

impl PreviewReport {
    pub fn failed(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl fmt::Display for PreviewReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Previews: {} generated, {} already present, {} failed",
            self.generated,
            self.existing,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(
                f,
                "\n  [{}] {}: {}",
                failure.kind, failure.subject, failure.message
            )?;
        }
        Ok(())
    }
}

/// Writes `{stem}_preview.webp` beside every scanned original that has none.
pub async fn generate_local_previews(
    scanner: &FileScanner,
    pool: WorkerPool,
    deriver: PreviewDeriver,
) -> Result<PreviewReport, PoolError> {
    let scan = scanner.scan().await;
    let report = Arc::new(Mutex::new(PreviewReport::default()));
    {
        let mut guard = report.lock().await;
        for failure in &scan.failed_roots {
            guard.failures.push(ItemFailure {
                subject: failure.root.dir.clone(),
                kind: FailureKind::Scan,
                message: failure.error.to_string(),
            });
        }
    }

    let sink = report.clone();
    pool.run(scan.assets, move |asset| {
        let sink = sink.clone();
        async move {
            let outcome = write_preview(&asset, deriver).await;
            let mut report = sink.lock().await;
            match outcome {
                Ok(true) => report.generated += 1,
                Ok(false) => report.existing += 1,
                Err(error) => {
                    tracing::warn!(path = %asset.path, %error, "preview failed");
                    report.failures.push(ItemFailure {
                        subject: asset.path.clone(),
                        kind: FailureKind::Derivation,
                        message: error.to_string(),
                    });
                }
            }
            ControlFlow::Continue(())
        }
    })
    .await?;

    let report = report.lock().await.clone();
    Ok(report)
}

async fn write_preview(
    asset: &AssetDescriptor,
    deriver: PreviewDeriver,
) -> Result<bool, DerivationError> {
    let target = local_derived_path(&asset.full_path);
    if tokio::fs::try_exists(&target)
        .await
        .map_err(DerivationError::Unreadable)?
    {
        tracing::debug!(path = %asset.path, "preview exists");
        return Ok(false);
    }

    let bytes = tokio::fs::read(&asset.full_path)
        .await
        .map_err(DerivationError::Unreadable)?;
    let category = asset.category;
    let preview = tokio::task::spawn_blocking(move || deriver.derive(&bytes, category))
        .await
        .map_err(|err| DerivationError::Unreadable(std::io::Error::other(err)))??;
    tokio::fs::write(&target, &preview.bytes)
        .await
        .map_err(DerivationError::Unreadable)?;
    tracing::info!(
        path = %target.display(),
        width = preview.info.dimensions.width,
        height = preview.info.dimensions.height,
        "preview written"
    );
    Ok(true)
}

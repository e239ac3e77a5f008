use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Scan,
    Derivation,
    Remote,
    Listing,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Scan => "scan",
            FailureKind::Derivation => "derivation",
            FailureKind::Remote => "remote",
            FailureKind::Listing => "listing",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemFailure {
    /// Asset path, scan root or remote key the failure belongs to.
    pub subject: String,
    pub kind: FailureKind,
    pub message: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TransferStats {
    pub bytes_uploaded: u64,
    pub put_requests: u64,
    pub delete_requests: u64,
    /// One per listing pass, however many pages it took.
    pub list_requests: u64,
}

impl TransferStats {
    pub fn total_requests(&self) -> u64 {
        self.put_requests + self.delete_requests + self.list_requests
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassPhase {
    #[default]
    Scanning,
    Diffing,
    Uploading,
    Listing,
    Reconciling,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for PassPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PassPhase::Scanning => "scanning",
            PassPhase::Diffing => "diffing",
            PassPhase::Uploading => "uploading",
            PassPhase::Listing => "listing",
            PassPhase::Reconciling => "reconciling",
            PassPhase::Persisting => "persisting",
            PassPhase::Done => "done",
            PassPhase::Failed => "failed",
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub uploaded: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub total_assets: usize,
    pub public_assets: usize,
    pub protected_assets: usize,
    pub concurrency: usize,
    pub stats: TransferStats,
    pub failures: Vec<ItemFailure>,
    pub listing_failed: bool,
    pub final_phase: PassPhase,
}

impl PassSummary {
    pub fn record_failure(
        &mut self,
        subject: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) {
        self.failures.push(ItemFailure {
            subject: subject.into(),
            kind,
            message: message.into(),
        });
    }

    pub fn failed(&self) -> bool {
        self.final_phase == PassPhase::Failed || !self.failures.is_empty()
    }

    pub fn failures_of(&self, kind: FailureKind) -> impl Iterator<Item = &ItemFailure> {
        self.failures.iter().filter(move |failure| failure.kind == kind)
    }
}

impl fmt::Display for PassSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Sync {}", self.final_phase)?;
        writeln!(
            f,
            "  Uploaded:  {} assets ({} objects including previews)",
            self.uploaded,
            self.uploaded * 2
        )?;
        writeln!(f, "  Deleted:   {} objects", self.deleted)?;
        writeln!(f, "  Unchanged: {}", self.unchanged)?;
        writeln!(f, "  Skipped:   {}", self.skipped)?;
        writeln!(
            f,
            "  Assets:    {} ({} public, {} protected)",
            self.total_assets, self.public_assets, self.protected_assets
        )?;
        writeln!(f, "  Workers:   {}", self.concurrency)?;
        writeln!(f, "Data transfer")?;
        writeln!(f, "  Uploaded:  {}", format_bytes(self.stats.bytes_uploaded))?;
        writeln!(f, "Bucket requests")?;
        writeln!(f, "  Put:       {}", self.stats.put_requests)?;
        writeln!(f, "  Delete:    {}", self.stats.delete_requests)?;
        writeln!(f, "  List:      {}", self.stats.list_requests)?;
        write!(f, "  Total:     {}", self.stats.total_requests())?;
        if self.listing_failed {
            write!(f, "\nOrphan cleanup skipped: bucket listing failed")?;
        }
        if !self.failures.is_empty() {
            write!(f, "\nFailures ({})", self.failures.len())?;
            for failure in &self.failures {
                write!(
                    f,
                    "\n  [{}] {}: {}",
                    failure.kind, failure.subject, failure.message
                )?;
            }
        }
        Ok(())
    }
}

/// Binary units with at most two decimals: `1536` becomes `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    if bytes == 0 {
        return "0 B".to_string();
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = format!("{value:.2}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", UNITS[unit])
}

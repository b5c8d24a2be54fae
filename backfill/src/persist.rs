//! Filesystem report sink.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use backfill_core::{BackfillError, ComprehensiveBackfillResult, ReportSink};

/// Writes the end-of-run aggregate as a pretty-printed JSON document with a
/// timestamped filename under a configured directory.
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    dir: PathBuf,
}

impl JsonReportSink {
    /// Create a sink writing into `dir`. The directory is created on first
    /// write, not here.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

impl ReportSink for JsonReportSink {
    fn write_report(
        &self,
        result: &ComprehensiveBackfillResult,
    ) -> Result<PathBuf, BackfillError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| BackfillError::Persistence(format!("create {}: {e}", self.dir.display())))?;

        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let path = self.dir.join(format!("backfill_report_{stamp}.json"));

        let body = serde_json::to_vec_pretty(result)
            .map_err(|e| BackfillError::Persistence(format!("serialize report: {e}")))?;
        fs::write(&path, body)
            .map_err(|e| BackfillError::Persistence(format!("write {}: {e}", path.display())))?;
        Ok(path)
    }
}

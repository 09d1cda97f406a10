//! On-disk JSON sidecar for resumable downloads
//!
//! One [`ResumeDescriptor`] is created at download start, rewritten on
//! every progress tick where `dlnow` has advanced, and deleted on
//! successful finalisation. A failed download leaves its sidecar behind so
//! a later process can pick the offset back up.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Descriptor persisted alongside a partially-downloaded file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResumeDescriptor {
    pub drive_id: String,
    pub item_id: String,
    /// quickXorHash, sha1Hash, or sha256Hash depending on account type.
    pub online_hash: String,
    pub original_filename: String,
    /// The `.partial`-suffixed filename this descriptor accompanies.
    pub partial_filename: String,
    pub resume_offset: u64,
}

impl ResumeDescriptor {
    /// Builds the sidecar path for a partial file: `<base>.<random-suffix>`,
    /// unique per concurrent download so two downloads of the same item
    /// never race on one sidecar.
    pub fn sidecar_path(partial_path: &Path) -> PathBuf {
        use rand::Rng;
        let suffix: String = rand::thread_rng()
            .sample_iter(rand::distributions::Alphanumeric)
            .take(8)
            .map(char::from)
            .collect();
        let mut name = partial_path.as_os_str().to_os_string();
        name.push(".");
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Reads a sidecar at download-start to decide the initial offset.
    /// Never call this from within a progress callback.
    pub fn load(sidecar: &Path) -> std::io::Result<Option<Self>> {
        match std::fs::read(sidecar) {
            Ok(bytes) => {
                let descriptor = serde_json::from_slice(&bytes).map_err(|e| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, e)
                })?;
                Ok(Some(descriptor))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Atomically overwrites the sidecar: write to a temp file in the same
    /// directory, then rename over the target.
    pub fn persist(&self, sidecar: &Path) -> std::io::Result<()> {
        let tmp = sidecar.with_extension("tmp");
        let bytes = serde_json::to_vec(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, sidecar)?;
        debug!(path = %sidecar.display(), offset = self.resume_offset, "resume sidecar persisted");
        Ok(())
    }

    /// Removed on successful finalisation.
    pub fn remove(sidecar: &Path) -> std::io::Result<()> {
        match std::fs::remove_file(sidecar) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!(path = %sidecar.display(), error = %e, "failed to remove resume sidecar");
                Err(e)
            }
        }
    }
}

/// Tracks the last `dlnow` a sidecar was written at, so writers can skip
/// no-op ticks where the offset hasn't actually advanced.
#[derive(Debug, Default)]
pub struct ResumeWriter {
    last_recorded: u64,
}

impl ResumeWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Call on every progress tick. Persists only if `dlnow` advanced
    /// since the last recorded write.
    pub fn on_progress(
        &mut self,
        descriptor: &mut ResumeDescriptor,
        sidecar: &Path,
        dlnow: u64,
    ) -> std::io::Result<()> {
        if dlnow <= self.last_recorded {
            return Ok(());
        }
        self.last_recorded = dlnow;
        descriptor.resume_offset = dlnow;
        descriptor.persist(sidecar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> ResumeDescriptor {
        ResumeDescriptor {
            drive_id: "drive1".to_string(),
            item_id: "item1".to_string(),
            online_hash: "abc123".to_string(),
            original_filename: "report.pdf".to_string(),
            partial_filename: "report.pdf.partial".to_string(),
            resume_offset: 0,
        }
    }

    #[test]
    fn sidecar_path_has_unique_random_suffix() {
        let base = PathBuf::from("/tmp/report.pdf.partial");
        let a = ResumeDescriptor::sidecar_path(&base);
        let b = ResumeDescriptor::sidecar_path(&base);
        assert_ne!(a, b);
        assert!(a.to_string_lossy().starts_with(base.to_string_lossy().as_ref()));
    }

    #[test]
    fn persist_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let sidecar = dir.path().join("download.sidecar");
        let mut descriptor = sample();
        descriptor.resume_offset = 37_000_000;
        descriptor.persist(&sidecar).unwrap();

        let loaded = ResumeDescriptor::load(&sidecar).unwrap().unwrap();
        assert_eq!(loaded, descriptor);
    }

    #[test]
    fn load_missing_sidecar_returns_none() {
        let dir = tempdir().unwrap();
        let sidecar = dir.path().join("missing.sidecar");
        assert!(ResumeDescriptor::load(&sidecar).unwrap().is_none());
    }

    #[test]
    fn remove_is_idempotent() {
        let dir = tempdir().unwrap();
        let sidecar = dir.path().join("download.sidecar");
        sample().persist(&sidecar).unwrap();
        ResumeDescriptor::remove(&sidecar).unwrap();
        assert!(!sidecar.exists());
        // removing again must not error
        ResumeDescriptor::remove(&sidecar).unwrap();
    }

    #[test]
    fn writer_skips_writes_when_offset_has_not_advanced() {
        let dir = tempdir().unwrap();
        let sidecar = dir.path().join("download.sidecar");
        let mut descriptor = sample();
        let mut writer = ResumeWriter::new();

        writer.on_progress(&mut descriptor, &sidecar, 1000).unwrap();
        let first_write_time = std::fs::metadata(&sidecar).unwrap().modified().unwrap();

        std::thread::sleep(std::time::Duration::from_millis(10));
        writer.on_progress(&mut descriptor, &sidecar, 1000).unwrap();
        let second_write_time = std::fs::metadata(&sidecar).unwrap().modified().unwrap();

        assert_eq!(first_write_time, second_write_time);
        assert_eq!(descriptor.resume_offset, 1000);
    }

    #[test]
    fn writer_persists_on_forward_progress() {
        let dir = tempdir().unwrap();
        let sidecar = dir.path().join("download.sidecar");
        let mut descriptor = sample();
        let mut writer = ResumeWriter::new();

        writer.on_progress(&mut descriptor, &sidecar, 1000).unwrap();
        writer.on_progress(&mut descriptor, &sidecar, 2000).unwrap();

        let loaded = ResumeDescriptor::load(&sidecar).unwrap().unwrap();
        assert_eq!(loaded.resume_offset, 2000);
    }
}

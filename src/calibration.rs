//! Calibration collaborator boundary.
//!
//! Calibration parameters are opaque to the synchronization logic; the core
//! only needs every reference to resolve at construction time so a broken
//! deployment fails eagerly instead of mid-stream.

use std::path::Path;

use bytes::Bytes;

use crate::error::SyncError;

/// Opaque per-camera calibration payload, passed through to vision
/// pipelines untouched.
#[derive(Debug, Clone)]
pub struct CalibrationRef {
    pub reference: String,
    pub data: Bytes,
}

pub trait CalibrationProvider: Send + Sync {
    fn resolve(&self, index: usize, reference: &str) -> Result<CalibrationRef, SyncError>;
}

/// Loads calibration blobs from the filesystem.
pub struct FsCalibration;

impl CalibrationProvider for FsCalibration {
    fn resolve(&self, index: usize, reference: &str) -> Result<CalibrationRef, SyncError> {
        std::fs::read(Path::new(reference))
            .map(|data| CalibrationRef {
                reference: reference.to_string(),
                data: Bytes::from(data),
            })
            .map_err(|source| SyncError::Calibration {
                index,
                reference: reference.to_string(),
                source,
            })
    }
}

/// Accepts any non-empty reference without touching the filesystem. For
/// tests and deployments that resolve calibration elsewhere.
pub struct NullCalibration;

impl CalibrationProvider for NullCalibration {
    fn resolve(&self, index: usize, reference: &str) -> Result<CalibrationRef, SyncError> {
        if reference.is_empty() {
            return Err(SyncError::Calibration {
                index,
                reference: String::new(),
                source: std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "empty calibration reference",
                ),
            });
        }
        Ok(CalibrationRef {
            reference: reference.to_string(),
            data: Bytes::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn fs_provider_reads_existing_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"fx fy cx cy").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cal = FsCalibration.resolve(0, &path).unwrap();
        assert_eq!(&cal.data[..], b"fx fy cx cy");
    }

    #[test]
    fn fs_provider_rejects_missing_file() {
        let err = FsCalibration.resolve(2, "/nonexistent/calibration/7");
        assert!(matches!(err, Err(SyncError::Calibration { index: 2, .. })));
    }

    #[test]
    fn null_provider_rejects_empty_reference() {
        assert!(NullCalibration.resolve(0, "").is_err());
        assert!(NullCalibration.resolve(0, "cal/0").is_ok());
    }
}

//! Firmware image loading.
//!
//! Container formats and signatures are out of scope here: a blob is the
//! raw byte payload that gets written to the device as-is.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Firmware image {0} is empty")]
    Empty(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A firmware payload ready for transfer.
#[derive(Debug, Clone)]
pub struct FirmwareBlob {
    data: Vec<u8>,
    source: Option<PathBuf>,
}

impl FirmwareBlob {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, source: None }
    }

    /// Read an image from disk. Empty files are rejected.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        if data.is_empty() {
            return Err(ImageError::Empty(path.display().to_string()));
        }
        info!(path = %path.display(), size = data.len(), "Loaded firmware image");
        Ok(Self {
            data,
            source: Some(path.to_path_buf()),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl AsRef<[u8]> for FirmwareBlob {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Load the image to transfer from a container file.
pub fn get_firmware_blob<P: AsRef<Path>>(container: P) -> Result<FirmwareBlob, ImageError> {
    FirmwareBlob::from_file(container)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("fwxfer-image-{}.bin", std::process::id()));
        std::fs::write(&path, [1u8, 2, 3, 4]).unwrap();

        let blob = get_firmware_blob(&path).unwrap();
        assert_eq!(blob.as_bytes(), &[1, 2, 3, 4]);
        assert_eq!(blob.source(), Some(path.as_path()));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_empty_file_rejected() {
        let path = std::env::temp_dir().join(format!("fwxfer-empty-{}.bin", std::process::id()));
        std::fs::write(&path, b"").unwrap();
        assert!(matches!(FirmwareBlob::from_file(&path), Err(ImageError::Empty(_))));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = FirmwareBlob::from_file("/nonexistent/fwxfer/image.bin").unwrap_err();
        assert!(matches!(err, ImageError::Io(_)));
    }
}

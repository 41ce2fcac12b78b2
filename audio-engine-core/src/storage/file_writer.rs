use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::error::EngineError;

/// Outcome of a successful save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFile {
    pub path: PathBuf,
    pub bytes_written: u64,
    /// Lower-case hex SHA-256 of the file as written.
    pub checksum: String,
}

/// Write `data` to `path` and checksum the result.
///
/// Refuses to replace an existing file unless `overwrite` is set.
pub fn write_file(path: &Path, data: &[u8], overwrite: bool) -> Result<SavedFile, EngineError> {
    let mut file = open(path, overwrite)?;
    file.write_all(data)
        .map_err(|e| EngineError::Storage(format!("failed to write {}: {}", path.display(), e)))?;
    file.sync_all()
        .map_err(|e| EngineError::Storage(format!("failed to flush {}: {}", path.display(), e)))?;
    drop(file);

    let checksum = sha256_file(path)?;
    log::info!("Saved {} bytes to {}", data.len(), path.display());
    Ok(SavedFile {
        path: path.to_path_buf(),
        bytes_written: data.len() as u64,
        checksum,
    })
}

fn open(path: &Path, overwrite: bool) -> Result<File, EngineError> {
    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    options.open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            EngineError::Storage(format!("{} already exists", path.display()))
        } else {
            EngineError::Storage(format!("failed to create {}: {}", path.display(), e))
        }
    })
}

/// SHA-256 of a file's contents as lower-case hex.
pub fn sha256_file(path: &Path) -> Result<String, EngineError> {
    let data =
        fs::read(path).map_err(|e| EngineError::Storage(format!("failed to read file for checksum: {}", e)))?;
    let digest = Sha256::digest(&data);
    Ok(hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

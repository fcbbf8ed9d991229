//! Dataset acquisition and versioning
//!
//! Downloads the source archive, extracts the hourly table, writes it under
//! the data directory and derives the data version from the file bytes.

use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::error::{MlopsError, Result};

const HASH_CHUNK: usize = 4096;

/// Raw table on disk plus its content hash
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    pub path: PathBuf,
    pub data_version: String,
    pub source_url: String,
}

/// Fetch the archive bytes. Network and HTTP failures are fatal; there is no retry.
pub async fn download_archive(url: &str) -> Result<Vec<u8>> {
    info!(url = %url, "Downloading dataset archive");

    let response = reqwest::Client::new().get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(MlopsError::DownloadError(format!(
            "GET {} returned {}",
            url, status
        )));
    }

    let bytes = response.bytes().await?;
    info!(bytes = bytes.len(), "Archive downloaded");
    Ok(bytes.to_vec())
}

/// Read one member out of a zip archive
pub fn extract_member(archive: &[u8], member: &str) -> Result<Vec<u8>> {
    let mut zip = zip::ZipArchive::new(Cursor::new(archive))?;
    let mut file = zip.by_name(member).map_err(|e| {
        MlopsError::ArchiveError(format!("member '{}' unavailable: {}", member, e))
    })?;

    let mut out = Vec::with_capacity(file.size() as usize);
    file.read_to_end(&mut out)?;
    Ok(out)
}

/// Write the table, creating parent directories as needed
pub fn persist(bytes: &[u8], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes)?;
    Ok(())
}

/// SHA-256 of the file contents, streamed
pub fn file_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_CHUNK];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Data version of the table, or a dated placeholder if hashing fails
pub fn data_version(path: &Path) -> String {
    match file_hash(path) {
        Ok(hash) => hash,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Could not hash dataset, using dated version");
            format!("local-version-{}", chrono::Local::now().format("%Y%m%d"))
        }
    }
}

/// Commit hash of the working tree at `repo_root`
pub fn code_version(repo_root: &Path) -> String {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_root)
        .output();

    match output {
        Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout).trim().to_string(),
        _ => "not-a-git-repo".to_string(),
    }
}

/// Download, extract, persist and hash the configured dataset
pub async fn acquire(config: &PipelineConfig) -> Result<DatasetSnapshot> {
    let archive = download_archive(&config.source_url).await?;
    let table = extract_member(&archive, &config.archive_member)?;

    let path = config.dataset_path();
    persist(&table, &path)?;

    let data_version = data_version(&path);
    info!(path = %path.display(), data_version = %data_version, "Dataset persisted");

    Ok(DatasetSnapshot {
        path,
        data_version,
        source_url: config.source_url.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn build_zip(name: &str, contents: &[u8]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut buf);
            writer.start_file(name, SimpleFileOptions::default()).unwrap();
            writer.write_all(contents).unwrap();
            writer.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_extract_member() {
        let archive = build_zip("hour.csv", b"cnt\n1\n");
        let table = extract_member(&archive, "hour.csv").unwrap();
        assert_eq!(table, b"cnt\n1\n");
    }

    #[test]
    fn test_extract_missing_member() {
        let archive = build_zip("day.csv", b"cnt\n1\n");
        let err = extract_member(&archive, "hour.csv").unwrap_err();
        assert!(matches!(err, MlopsError::ArchiveError(_)));
    }

    #[test]
    fn test_extract_malformed_archive() {
        let err = extract_member(b"definitely not a zip", "hour.csv").unwrap_err();
        assert!(matches!(err, MlopsError::ArchiveError(_)));
    }

    #[test]
    fn test_file_hash_is_content_addressed() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.csv");
        let b = dir.path().join("nested/b.csv");
        persist(b"cnt\n50\n250\n", &a).unwrap();
        persist(b"cnt\n50\n250\n", &b).unwrap();

        let hash_a = file_hash(&a).unwrap();
        assert_eq!(hash_a, file_hash(&b).unwrap());
        assert_eq!(hash_a.len(), 64);

        persist(b"cnt\n50\n251\n", &b).unwrap();
        assert_ne!(hash_a, file_hash(&b).unwrap());
    }

    #[test]
    fn test_data_version_fallback() {
        let version = data_version(Path::new("/nonexistent/bike_hour.csv"));
        assert!(version.starts_with("local-version-"));
    }
}

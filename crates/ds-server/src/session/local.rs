use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use ds_core::{Error, Result};
use ds_io::BoxReadSeek;
use ds_media::sniff::{
    content_type_for_path, is_archive_path, is_streamable_type, sniff_content_type, SNIFF_LEN,
};
use tracing::debug;

/// A file on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    size: u64,
}

impl LocalFile {
    /// Stat `path`; fails for missing files, directories and archives.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let display = path.display().to_string();
        if is_archive_path(&display) {
            return Err(Error::UnsupportedContent(format!(
                "{display} is an archive and cannot stream"
            )));
        }
        let meta = std::fs::metadata(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::not_found("file", &display),
            _ => Error::from(e),
        })?;
        if !meta.is_file() {
            return Err(Error::BadRequest(format!("{display} is not a regular file")));
        }
        Ok(Self {
            path,
            size: meta.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Extension table first, then the leading bytes.
    pub async fn resolve_content_type(&self) -> Result<String> {
        if let Some(mime) = content_type_for_path(&self.path.to_string_lossy()) {
            return Ok(mime.to_string());
        }
        let path = self.path.clone();
        let sniffed = tokio::task::spawn_blocking(move || -> Result<&'static str> {
            let mut head = Vec::with_capacity(SNIFF_LEN);
            File::open(&path)?
                .take(SNIFF_LEN as u64)
                .read_to_end(&mut head)?;
            Ok(sniff_content_type(&head))
        })
        .await
        .map_err(|e| Error::Internal(format!("sniff task failed: {e}")))??;
        debug!(path = %self.path.display(), content_type = sniffed, "Sniffed local file");

        if !is_streamable_type(sniffed) {
            return Err(Error::UnsupportedContent(format!(
                "{} is {sniffed}, not video",
                self.path.display()
            )));
        }
        Ok(sniffed.to_string())
    }

    pub fn reader(&self) -> Result<BoxReadSeek> {
        Ok(Box::new(File::open(&self.path)?))
    }
}

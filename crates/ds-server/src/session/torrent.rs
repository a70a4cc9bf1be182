//! Torrent-backed streams.
//!
//! The torrent engine lives outside this crate; it hands over one selected
//! file through [`TorrentFile`]. Readers returned by the engine block until
//! the pieces they need have been downloaded.

use std::io::{self, Read};
use std::sync::Arc;

use ds_core::{Error, Result};
use ds_io::BoxReadSeek;
use ds_media::sniff::{
    content_type_for_path, is_archive_path, is_streamable_type, sniff_content_type, SNIFF_LEN,
};

/// One file inside a torrent, as exposed by the torrent engine.
pub trait TorrentFile: Send + Sync {
    /// Path of the file inside the torrent.
    fn name(&self) -> &str;

    fn length(&self) -> u64;

    /// A new independent reader positioned at 0.
    fn reader(&self) -> io::Result<BoxReadSeek>;
}

#[derive(Clone)]
pub struct TorrentStream {
    file: Arc<dyn TorrentFile>,
}

impl std::fmt::Debug for TorrentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TorrentStream")
            .field("name", &self.file.name())
            .field("length", &self.file.length())
            .finish()
    }
}

impl TorrentStream {
    pub fn new(file: Arc<dyn TorrentFile>) -> Result<Self> {
        if is_archive_path(file.name()) {
            return Err(Error::UnsupportedContent(format!(
                "{} is an archive and cannot stream",
                file.name()
            )));
        }
        Ok(Self { file })
    }

    pub fn name(&self) -> &str {
        self.file.name()
    }

    pub fn size(&self) -> u64 {
        self.file.length()
    }

    pub async fn resolve_content_type(&self) -> Result<String> {
        if let Some(mime) = content_type_for_path(self.file.name()) {
            return Ok(mime.to_string());
        }
        let file = self.file.clone();
        let sniffed = tokio::task::spawn_blocking(move || -> Result<&'static str> {
            let mut head = Vec::with_capacity(SNIFF_LEN);
            file.reader()?.take(SNIFF_LEN as u64).read_to_end(&mut head)?;
            Ok(sniff_content_type(&head))
        })
        .await
        .map_err(|e| Error::Internal(format!("sniff task failed: {e}")))??;

        if !is_streamable_type(sniffed) {
            return Err(Error::UnsupportedContent(format!(
                "{} is {sniffed}, not video",
                self.file.name()
            )));
        }
        Ok(sniffed.to_string())
    }

    pub fn reader(&self) -> Result<BoxReadSeek> {
        Ok(self.file.reader()?)
    }
}

/// In-memory [`TorrentFile`], for tests and tooling.
#[derive(Debug, Clone)]
pub struct MemoryTorrentFile {
    name: String,
    data: Arc<Vec<u8>>,
}

impl MemoryTorrentFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data: Arc::new(data),
        }
    }
}

impl TorrentFile for MemoryTorrentFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn length(&self) -> u64 {
        self.data.len() as u64
    }

    fn reader(&self) -> io::Result<BoxReadSeek> {
        Ok(Box::new(io::Cursor::new(SharedBytes(self.data.clone()))))
    }
}

struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

//! Archive reader.
//!
//! The archive has no index: `manifest.json` and every layer entry are found
//! by scanning headers from the start. Layer lookups remember only the entry's
//! byte range; content is streamed straight from the file on open.

use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use imgpack_core::config::PackConfig;
use imgpack_core::error::{PackError, Result};
use sha2::{Digest as _, Sha256};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::MANIFEST_NAME;
use crate::oci::descriptor::LayerDescriptor;
use crate::oci::digest::Digest;
use crate::oci::graph::DescriptorGraph;
use crate::oci::layers::{LayerContent, LayerProvider, LayerReader};
use crate::oci::media_type;

/// Byte range of one entry's body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryLocation {
    offset: u64,
    size: u64,
}

/// Scan `path` for an entry called `name`.
fn locate_entry(path: &Path, name: &str) -> Result<Option<EntryLocation>> {
    let corrupt = |e: io::Error| PackError::ArchiveCorrupt(format!("{}: {}", path.display(), e));

    let file = std::fs::File::open(path)?;
    let mut archive = tar::Archive::new(file);
    for entry in archive.entries().map_err(corrupt)? {
        let entry = entry.map_err(corrupt)?;
        if &*entry.path_bytes() == name.as_bytes() {
            return Ok(Some(EntryLocation {
                offset: entry.raw_file_position(),
                size: entry.size(),
            }));
        }
    }
    Ok(None)
}

fn read_entry(path: &Path, location: EntryLocation) -> Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    let file_len = file.metadata()?.len();
    let end = location.offset.checked_add(location.size);
    if end.map_or(true, |end| end > file_len) {
        return Err(PackError::ArchiveCorrupt(format!(
            "{}: entry of {} bytes at offset {} runs past end of file ({} bytes)",
            path.display(),
            location.size,
            location.offset,
            file_len
        )));
    }

    file.seek(SeekFrom::Start(location.offset))?;
    let mut data = Vec::new();
    file.take(location.size).read_to_end(&mut data)?;
    if data.len() as u64 != location.size {
        return Err(PackError::ArchiveCorrupt(format!(
            "{}: entry truncated at {} of {} bytes",
            path.display(),
            data.len(),
            location.size
        )));
    }
    Ok(data)
}

async fn blocking<T, F>(task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| PackError::Other(format!("archive scan aborted: {}", e)))?
}

/// Reads archives produced by [`super::TarWriter`].
pub struct TarReader {
    path: PathBuf,
    verify_digests: bool,
}

impl TarReader {
    pub fn new(path: impl Into<PathBuf>, config: &PackConfig) -> Self {
        Self {
            path: path.into(),
            verify_digests: config.verify_digests,
        }
    }

    /// Rebuild the descriptor graph from `manifest.json`.
    ///
    /// Layer content is served lazily from the archive file.
    pub async fn read(&self) -> Result<DescriptorGraph> {
        let path = self.path.clone();
        let manifest = blocking(move || {
            let location = locate_entry(&path, MANIFEST_NAME)?.ok_or_else(|| {
                PackError::ArchiveCorrupt(format!(
                    "{}: missing {}",
                    path.display(),
                    MANIFEST_NAME
                ))
            })?;
            read_entry(&path, location)
        })
        .await?;

        let provider = Arc::new(TarLayerProvider::new(self.path.clone()));
        let graph = DescriptorGraph::from_bytes(&manifest, provider).map_err(|e| {
            PackError::ArchiveCorrupt(format!("{}: bad {}: {}", self.path.display(), MANIFEST_NAME, e))
        })?;

        if self.verify_digests {
            graph.verify()?;
        }

        tracing::info!(
            path = %self.path.display(),
            descriptors = graph.descriptors().len(),
            layers = graph.layers().len(),
            "Opened image archive"
        );
        Ok(graph)
    }

    /// Hash every layer of `graph` present in the archive.
    ///
    /// Checks the compressed digest, and for gzip layers also the diffID of
    /// the decompressed stream. Returns the number of layers checked.
    pub async fn verify_layers(&self, graph: &DescriptorGraph) -> Result<usize> {
        let layers: Vec<LayerDescriptor> = graph.layers().into_iter().cloned().collect();
        let path = self.path.clone();

        blocking(move || {
            for layer in &layers {
                let location = locate_entry(&path, &layer.digest.archive_name())?
                    .ok_or_else(|| missing_layer(&path, layer))?;
                verify_layer(&path, location, layer)?;
                tracing::debug!(digest = %layer.digest, "Verified layer");
            }
            Ok(layers.len())
        })
        .await
    }
}

fn missing_layer(path: &Path, layer: &LayerDescriptor) -> PackError {
    PackError::ArchiveCorrupt(format!(
        "{}: missing layer {} ({})",
        path.display(),
        layer.digest,
        layer.digest.archive_name()
    ))
}

/// Passes bytes through while hashing them.
struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

fn verify_layer(path: &Path, location: EntryLocation, layer: &LayerDescriptor) -> Result<()> {
    let corrupt = |e: io::Error| {
        PackError::ArchiveCorrupt(format!("{}: layer {}: {}", path.display(), layer.digest, e))
    };

    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(location.offset))?;
    let mut reader = HashingReader {
        inner: file.take(location.size),
        hasher: Sha256::new(),
    };

    if media_type::is_gzip_layer(&layer.media_type) {
        let mut decoder = GzDecoder::new(reader);
        let mut uncompressed = Sha256::new();
        io::copy(&mut decoder, &mut uncompressed).map_err(corrupt)?;
        reader = decoder.into_inner();
        io::copy(&mut reader, &mut io::sink()).map_err(corrupt)?;

        let diff_id = Digest::from_sha256(uncompressed);
        if diff_id != layer.diff_id {
            return Err(PackError::ArchiveCorrupt(format!(
                "layer {}: diffID {} does not match uncompressed content {}",
                layer.digest, layer.diff_id, diff_id
            )));
        }
    } else {
        io::copy(&mut reader, &mut io::sink()).map_err(corrupt)?;
    }

    let digest = Digest::from_sha256(reader.hasher);
    if digest != layer.digest {
        return Err(PackError::ArchiveCorrupt(format!(
            "layer {}: content hashes to {}",
            layer.digest, digest
        )));
    }
    Ok(())
}

/// Serves layer content out of an archive file.
#[derive(Debug, Clone)]
pub struct TarLayerProvider {
    path: PathBuf,
}

impl TarLayerProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LayerProvider for TarLayerProvider {
    async fn find(&self, layer: &LayerDescriptor) -> Result<Arc<dyn LayerContent>> {
        let path = self.path.clone();
        let name = layer.digest.archive_name();
        let location = blocking(move || locate_entry(&path, &name))
            .await?
            .ok_or_else(|| missing_layer(&self.path, layer))?;

        if location.size != layer.size {
            return Err(PackError::ArchiveCorrupt(format!(
                "{}: layer {} is {} bytes, descriptor says {}",
                self.path.display(),
                layer.digest,
                location.size,
                layer.size
            )));
        }

        Ok(Arc::new(TarEntryContent {
            path: self.path.clone(),
            location,
        }))
    }
}

/// One entry's body inside an archive.
struct TarEntryContent {
    path: PathBuf,
    location: EntryLocation,
}

#[async_trait]
impl LayerContent for TarEntryContent {
    async fn open(&self) -> Result<LayerReader> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(self.location.offset)).await?;
        Ok(Box::new(file.take(self.location.size)))
    }
}

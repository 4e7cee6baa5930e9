//! Archive writer.
//!
//! Entry order is fixed: `manifest.json` first, then one
//! `<alg>-<hex>.tar.gz` entry per distinct distributable layer in ascending
//! digest order.
//!
//! Writing to a file with `write_concurrency > 1` happens in two passes:
//!
//! ```text
//! inflate:  [manifest.json][hdr L1|000000][hdr L2|0000][hdr L3|00000000][footer]
//!                          ^offset1        ^offset2     ^offset3
//! fill-in:                 worker A ──────► worker B ──► worker C (own handle each)
//! ```
//!
//! The inflate pass reserves every layer's exact byte range; fill-in workers
//! then seek to their recorded offset and overwrite header + body in place.

use std::path::Path;
use std::sync::Arc;

use imgpack_core::config::PackConfig;
use imgpack_core::error::{PackError, Result};
use imgpack_core::throttle::Throttle;
use tokio::io::{AsyncSeekExt, AsyncWrite, AsyncWriteExt, BufWriter};

use super::stream::{copy_exact, entry_len, fits_header, header_block, TarStream};
use super::MANIFEST_NAME;
use crate::oci::descriptor::LayerDescriptor;
use crate::oci::graph::DescriptorGraph;
use crate::oci::layers::LayerProvider;

/// What ended up in a written archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveSummary {
    /// Layer blob entries written
    pub layers_written: usize,
    /// Distinct foreign layers left out
    pub foreign_layers_skipped: usize,
    /// Total archive length in bytes
    pub bytes_written: u64,
}

/// A layer entry reserved by the inflate pass.
#[derive(Debug, Clone)]
struct Placement {
    name: String,
    offset: u64,
    layer: LayerDescriptor,
}

/// Serializes a [`DescriptorGraph`] and its layer blobs into a tar archive.
pub struct TarWriter<'g> {
    graph: &'g DescriptorGraph,
    concurrency: usize,
    throttle: Option<Throttle>,
}

impl<'g> TarWriter<'g> {
    pub fn new(graph: &'g DescriptorGraph, config: &PackConfig) -> Self {
        Self {
            graph,
            concurrency: config.write_concurrency,
            throttle: None,
        }
    }

    /// Draw fill-in permits from a shared throttle.
    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.concurrency = throttle.capacity();
        self.throttle = Some(throttle);
        self
    }

    /// Write the archive to `path`, filling layers in concurrently when
    /// more than one worker is allowed.
    pub async fn write_to_path(&self, path: &Path) -> Result<ArchiveSummary> {
        self.check_entry_names()?;
        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| PackError::write_io(path.display().to_string(), e))?;

        let summary = if self.concurrency > 1 {
            self.write_concurrently(path, file).await?
        } else {
            self.write_sequentially(BufWriter::new(file), &path.display().to_string())
                .await?
        };

        tracing::info!(
            path = %path.display(),
            layers = summary.layers_written,
            foreign_skipped = summary.foreign_layers_skipped,
            bytes = summary.bytes_written,
            concurrency = self.concurrency,
            "Wrote image archive"
        );
        Ok(summary)
    }

    /// Write the archive to a non-seekable destination in a single pass.
    pub async fn write_to<W>(&self, dest: W) -> Result<ArchiveSummary>
    where
        W: AsyncWrite + Unpin,
    {
        self.check_entry_names()?;
        self.write_sequentially(dest, "<stream>").await
    }

    /// Every layer entry name must fit a plain ustar header.
    fn check_entry_names(&self) -> Result<()> {
        for layer in self.graph.layers() {
            let name = layer.digest.archive_name();
            if !fits_header(&name) {
                return Err(PackError::InvalidDigest(format!(
                    "layer {}: {} digests cannot be archived, entry name {} is too long",
                    layer.digest,
                    layer.digest.algorithm(),
                    name
                )));
            }
        }
        Ok(())
    }

    async fn write_sequentially<W>(&self, dest: W, label: &str) -> Result<ArchiveSummary>
    where
        W: AsyncWrite + Unpin,
    {
        let io_err = |e: std::io::Error| PackError::write_io(label, e);
        let manifest = self.graph.as_bytes()?;
        let layers = self.graph.layers();
        let provider = self.graph.layer_provider();

        let mut stream = TarStream::new(dest);
        stream
            .append_bytes(MANIFEST_NAME, &manifest)
            .await
            .map_err(io_err)?;

        for layer in &layers {
            let name = layer.digest.archive_name();
            let content = provider.find(layer).await?;
            let mut reader = content.open().await?;
            tracing::debug!(digest = %layer.digest, size = layer.size, "Writing layer");
            stream
                .append_reader(&name, layer.size, &mut reader)
                .await
                .map_err(io_err)?;
        }

        let bytes_written = stream.position() + 1024;
        stream.finish().await.map_err(io_err)?;

        Ok(ArchiveSummary {
            layers_written: layers.len(),
            foreign_layers_skipped: self.count_foreign(),
            bytes_written,
        })
    }

    async fn write_concurrently(
        &self,
        path: &Path,
        file: tokio::fs::File,
    ) -> Result<ArchiveSummary> {
        let label = path.display().to_string();
        let io_err = |e: std::io::Error| PackError::write_io(label.clone(), e);
        let manifest = self.graph.as_bytes()?;
        let layers = self.graph.layers();

        // Inflate pass: reserve exact-size, zero-filled entries.
        let mut stream = TarStream::new(BufWriter::new(file));
        stream
            .append_bytes(MANIFEST_NAME, &manifest)
            .await
            .map_err(io_err)?;

        let mut placements = Vec::with_capacity(layers.len());
        for layer in &layers {
            let name = layer.digest.archive_name();
            let offset = stream.position();
            stream
                .append_placeholder(&name, layer.size)
                .await
                .map_err(io_err)?;
            debug_assert_eq!(stream.position(), offset + entry_len(layer.size));
            placements.push(Placement {
                name,
                offset,
                layer: (*layer).clone(),
            });
        }
        let bytes_written = stream.position() + 1024;
        stream.finish().await.map_err(io_err)?;

        // Fill-in pass: biggest layers first.
        placements.sort_by(|a, b| {
            b.layer
                .size
                .cmp(&a.layer.size)
                .then_with(|| a.layer.digest.cmp(&b.layer.digest))
        });

        let throttle = self
            .throttle
            .clone()
            .unwrap_or_else(|| Throttle::new(self.concurrency));
        let path = Arc::new(path.to_path_buf());
        let mut handles = Vec::with_capacity(placements.len());

        for placement in placements {
            let throttle = throttle.clone();
            let provider = Arc::clone(self.graph.layer_provider());
            let path = Arc::clone(&path);
            handles.push(tokio::spawn(async move {
                let permit = throttle.take().await?;
                let outcome = fill_in(path.as_path(), &placement, provider.as_ref()).await;
                permit.done();
                outcome
            }));
        }

        let mut first_error = None;
        for handle in handles {
            let outcome = handle
                .await
                .map_err(|e| PackError::QueueError(format!("fill-in worker aborted: {}", e)))
                .and_then(|r| r);
            if let Err(e) = outcome {
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        Ok(ArchiveSummary {
            layers_written: layers.len(),
            foreign_layers_skipped: self.count_foreign(),
            bytes_written,
        })
    }

    fn count_foreign(&self) -> usize {
        let mut foreign: Vec<_> = self
            .graph
            .images()
            .into_iter()
            .flat_map(|image| image.layers.iter())
            .filter(|layer| !layer.distributable)
            .map(|layer| &layer.digest)
            .collect();
        foreign.sort();
        foreign.dedup();
        foreign.len()
    }
}

/// Overwrite one reserved entry with its real header and bytes.
async fn fill_in(path: &Path, placement: &Placement, provider: &dyn LayerProvider) -> Result<()> {
    let label = path.display().to_string();
    let io_err = |e: std::io::Error| PackError::write_io(label.clone(), e);

    let content = provider.find(&placement.layer).await?;
    let mut reader = content.open().await?;

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(io_err)?;
    file.seek(std::io::SeekFrom::Start(placement.offset))
        .await
        .map_err(io_err)?;

    let header = header_block(&placement.name, placement.layer.size).map_err(io_err)?;
    let mut out = BufWriter::new(file);
    out.write_all(&header).await.map_err(io_err)?;
    copy_exact(&mut reader, &mut out, placement.layer.size)
        .await
        .map_err(io_err)?;
    out.flush().await.map_err(io_err)?;

    tracing::debug!(
        digest = %placement.layer.digest,
        offset = placement.offset,
        size = placement.layer.size,
        "Filled in layer"
    );
    Ok(())
}

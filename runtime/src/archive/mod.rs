//! Image archives.
//!
//! A single tar file holding a descriptor graph (`manifest.json`) and one
//! `<alg>-<hex>.tar.gz` entry per distinct distributable layer.

mod reader;
mod stream;
mod writer;

pub use reader::{TarLayerProvider, TarReader};
pub use writer::{ArchiveSummary, TarWriter};

use std::path::Path;
use std::sync::Arc;

use imgpack_core::config::PackConfig;
use imgpack_core::error::Result;

use crate::oci::graph::{DescriptorGraph, GraphBuilder};
use crate::oci::reference::ImageReference;
use crate::oci::registry::Registry;

/// Name of the serialized graph entry; always the first entry.
pub const MANIFEST_NAME: &str = "manifest.json";

/// Fetch `references` from `registry` and write them to `dest`.
pub async fn package(
    registry: Arc<dyn Registry>,
    references: &[ImageReference],
    dest: &Path,
    config: &PackConfig,
) -> Result<ArchiveSummary> {
    config.validate()?;
    let graph = GraphBuilder::new(registry, config).build(references).await?;
    TarWriter::new(&graph, config).write_to_path(dest).await
}

/// Open an archive and rebuild its descriptor graph.
pub async fn open_archive(path: &Path, config: &PackConfig) -> Result<DescriptorGraph> {
    TarReader::new(path, config).read().await
}

//! imgpack Runtime - image packaging.
//!
//! Builds descriptor graphs from a registry, writes them with their layer
//! blobs into a single tar archive, reads such archives back, and runs the
//! build/resolve/import work queues.

#![allow(clippy::result_large_err)]

pub mod archive;
pub mod oci;
pub mod queue;

// Re-export common types
pub use archive::{open_archive, package, ArchiveSummary, TarLayerProvider, TarReader, TarWriter};
pub use oci::{
    Descriptor, DescriptorGraph, Digest, GraphBuilder, ImageDescriptor, ImageReference,
    IndexDescriptor, LayerDescriptor, Registry, RegistryWriter,
};
pub use queue::{alias_map, BuildQueue, BuildRequest, Builder, ImportQueue, ResolveQueue};

/// imgpack Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

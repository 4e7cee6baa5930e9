//! Registry collaborator interfaces.
//!
//! Transport and authentication live behind these traits; packaging only
//! needs to classify references, read image/index metadata, stream layer
//! bytes, and write imported content back.

use std::sync::Arc;

use async_trait::async_trait;
use imgpack_core::error::Result;

use super::descriptor::{
    ConfigDescriptor, ImageDescriptor, IndexDescriptor, LayerDescriptor, ManifestDescriptor,
};
use super::digest::Digest;
use super::layers::{LayerContent, LayerProvider};
use super::reference::ImageReference;

/// Media type and digest of whatever a reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericDescriptor {
    pub media_type: String,
    pub digest: Digest,
}

/// One layer as reported by the registry, with a handle to its bytes.
#[derive(Clone)]
pub struct RegistryLayer {
    pub descriptor: LayerDescriptor,
    pub content: Arc<dyn LayerContent>,
}

impl std::fmt::Debug for RegistryLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryLayer")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Image metadata fetched from a registry.
#[derive(Debug, Clone)]
pub struct RegistryImage {
    pub config: ConfigDescriptor,
    pub manifest: ManifestDescriptor,
    /// Base layer first
    pub layers: Vec<RegistryLayer>,
}

/// Target platform of an index entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    pub variant: Option<String>,
}

/// One manifest listed by an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub media_type: String,
    pub digest: Digest,
    pub platform: Option<Platform>,
}

/// Index metadata fetched from a registry.
#[derive(Debug, Clone)]
pub struct RegistryIndex {
    pub media_type: String,
    pub digest: Digest,
    pub raw: String,
    pub manifests: Vec<IndexEntry>,
}

/// Read side of a container registry.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Classify a reference without fetching its full content.
    async fn generic(&self, reference: &ImageReference) -> Result<GenericDescriptor>;

    /// Fetch a single-platform image.
    async fn image(&self, reference: &ImageReference) -> Result<RegistryImage>;

    /// Fetch an index and its manifest list.
    async fn index(&self, reference: &ImageReference) -> Result<RegistryIndex>;
}

/// Write side of a container registry, used when importing archives.
///
/// Implementations own retries; a returned error is final.
#[async_trait]
pub trait RegistryWriter: Send + Sync {
    /// Upload an image's layers, config and manifest into `repository`.
    /// Returns the digest reference of the written manifest.
    async fn write_image(
        &self,
        repository: &ImageReference,
        image: &ImageDescriptor,
        layers: &dyn LayerProvider,
    ) -> Result<ImageReference>;

    /// Upload an index and all of its children into `repository`.
    async fn write_index(
        &self,
        repository: &ImageReference,
        index: &IndexDescriptor,
        layers: &dyn LayerProvider,
    ) -> Result<ImageReference>;
}

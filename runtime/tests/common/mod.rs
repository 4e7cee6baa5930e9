//! Shared fixtures for integration tests.
//!
//! `FakeRegistry` serves images and indexes from memory with real sha256
//! digests and gzip-compressed layers, so archives built from it pass every
//! digest and diffID check.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use imgpack_core::error::{PackError, Result};
use imgpack_runtime::oci::descriptor::{ConfigDescriptor, LayerDescriptor, ManifestDescriptor};
use imgpack_runtime::oci::digest::Digest;
use imgpack_runtime::oci::layers::{InMemoryLayer, LayerContent};
use imgpack_runtime::oci::media_type;
use imgpack_runtime::oci::reference::ImageReference;
use imgpack_runtime::oci::registry::{
    GenericDescriptor, IndexEntry, Platform, Registry, RegistryImage, RegistryIndex,
    RegistryLayer,
};
use serde_json::json;

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Uncompressed tar stream stand-in for layer `seed`.
pub fn layer_contents(seed: &str) -> Vec<u8> {
    format!("contents of layer {}\n", seed).repeat(200).into_bytes()
}

/// A gzip layer and a handle to its compressed bytes.
pub fn layer(seed: &str) -> RegistryLayer {
    let uncompressed = layer_contents(seed);
    let compressed = gzip(&uncompressed);
    RegistryLayer {
        descriptor: LayerDescriptor::new(
            media_type::OCI_LAYER_GZIP,
            Digest::sha256(&compressed),
            Digest::sha256(&uncompressed),
            compressed.len() as u64,
        ),
        content: Arc::new(InMemoryLayer::new(compressed)) as Arc<dyn LayerContent>,
    }
}

/// Layer whose bytes live elsewhere and must never be archived.
pub fn foreign_layer(seed: &str) -> RegistryLayer {
    let uncompressed = layer_contents(seed);
    RegistryLayer {
        descriptor: LayerDescriptor::new(
            media_type::DOCKER_FOREIGN_LAYER,
            Digest::sha256(seed.as_bytes()),
            Digest::sha256(&uncompressed),
            1 << 20,
        ),
        content: Arc::new(InMemoryLayer::new(Vec::new())) as Arc<dyn LayerContent>,
    }
}

#[derive(Clone)]
enum Stored {
    Image(RegistryImage),
    Index(RegistryIndex),
    Legacy(Digest),
    /// Classification itself fails the way registry clients report schema 1.
    LegacyRejected,
}

/// In-memory registry keyed by full reference string.
#[derive(Default, Clone)]
pub struct FakeRegistry {
    entries: HashMap<String, Stored>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, reference: &str, digest: &Digest, stored: Stored) -> ImageReference {
        let reference = ImageReference::parse(reference).unwrap();
        let pinned = reference.with_digest(digest.clone());
        self.entries
            .insert(pinned.full_reference(), stored.clone());
        self.entries.insert(reference.full_reference(), stored);
        pinned
    }

    /// Publish an image under `reference` and return its pinned reference.
    pub fn add_image(&mut self, reference: &str, layers: Vec<RegistryLayer>) -> ImageReference {
        let diff_ids: Vec<String> = layers
            .iter()
            .map(|l| l.descriptor.diff_id.to_string())
            .collect();
        let config_raw = json!({
            "architecture": "amd64",
            "os": "linux",
            "config": { "Labels": { "source": reference } },
            "rootfs": { "type": "layers", "diff_ids": diff_ids },
        })
        .to_string();
        let config = ConfigDescriptor {
            digest: Digest::sha256(config_raw.as_bytes()),
            raw: config_raw,
        };

        let manifest_layers: Vec<_> = layers
            .iter()
            .map(|l| {
                json!({
                    "mediaType": l.descriptor.media_type,
                    "digest": l.descriptor.digest.to_string(),
                    "size": l.descriptor.size,
                })
            })
            .collect();
        let manifest_raw = json!({
            "schemaVersion": 2,
            "mediaType": media_type::OCI_MANIFEST,
            "config": {
                "mediaType": media_type::OCI_CONFIG,
                "digest": config.digest.to_string(),
                "size": config.raw.len(),
            },
            "layers": manifest_layers,
        })
        .to_string();
        let manifest = ManifestDescriptor {
            media_type: media_type::OCI_MANIFEST.to_string(),
            digest: Digest::sha256(manifest_raw.as_bytes()),
            raw: manifest_raw,
        };

        let digest = manifest.digest.clone();
        self.insert(
            reference,
            &digest,
            Stored::Image(RegistryImage {
                config,
                manifest,
                layers,
            }),
        )
    }

    /// Publish an index over already published manifests of the same repository.
    pub fn add_index(&mut self, reference: &str, children: &[(&ImageReference, &str)]) -> ImageReference {
        let mut manifests = Vec::new();
        let mut raw_manifests = Vec::new();
        for (child, architecture) in children {
            let digest = child.digest.clone().unwrap();
            let media_type = match self.entries.get(&child.full_reference()) {
                Some(Stored::Index(index)) => index.media_type.clone(),
                _ => media_type::OCI_MANIFEST.to_string(),
            };
            raw_manifests.push(json!({
                "mediaType": media_type,
                "digest": digest.to_string(),
                "platform": { "os": "linux", "architecture": architecture },
            }));
            manifests.push(IndexEntry {
                media_type,
                digest,
                platform: Some(Platform {
                    os: "linux".to_string(),
                    architecture: architecture.to_string(),
                    variant: None,
                }),
            });
        }

        let raw = json!({
            "schemaVersion": 2,
            "mediaType": media_type::OCI_INDEX,
            "manifests": raw_manifests,
        })
        .to_string();
        let digest = Digest::sha256(raw.as_bytes());
        self.insert(
            reference,
            &digest,
            Stored::Index(RegistryIndex {
                media_type: media_type::OCI_INDEX.to_string(),
                digest: digest.clone(),
                raw,
                manifests,
            }),
        )
    }

    /// Point another tag at already published content.
    pub fn tag(&mut self, pinned: &ImageReference, reference: &str) {
        let stored = self.entries.get(&pinned.full_reference()).cloned().unwrap();
        let reference = ImageReference::parse(reference).unwrap();
        self.entries.insert(reference.full_reference(), stored);
    }

    /// Publish a schema 1 manifest.
    pub fn add_legacy(&mut self, reference: &str) -> ImageReference {
        let digest = Digest::sha256(reference.as_bytes());
        self.insert(reference, &digest, Stored::Legacy(digest.clone()))
    }

    /// Publish a schema 1 manifest that the client refuses to classify.
    pub fn add_rejected_legacy(&mut self, reference: &str) {
        let reference = ImageReference::parse(reference).unwrap();
        self.entries
            .insert(reference.full_reference(), Stored::LegacyRejected);
    }

    fn lookup(&self, reference: &ImageReference) -> Result<&Stored> {
        self.entries
            .get(&reference.full_reference())
            .ok_or_else(|| PackError::Other(format!("manifest unknown: {}", reference)))
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn generic(&self, reference: &ImageReference) -> Result<GenericDescriptor> {
        Ok(match self.lookup(reference)? {
            Stored::Image(image) => GenericDescriptor {
                media_type: image.manifest.media_type.clone(),
                digest: image.manifest.digest.clone(),
            },
            Stored::Index(index) => GenericDescriptor {
                media_type: index.media_type.clone(),
                digest: index.digest.clone(),
            },
            Stored::Legacy(digest) => GenericDescriptor {
                media_type: media_type::DOCKER_MANIFEST_V1_SIGNED.to_string(),
                digest: digest.clone(),
            },
            Stored::LegacyRejected => {
                return Err(PackError::Other(format!(
                    "unsupported MediaType: \"{}\"",
                    media_type::DOCKER_MANIFEST_V1_SIGNED
                )))
            }
        })
    }

    async fn image(&self, reference: &ImageReference) -> Result<RegistryImage> {
        match self.lookup(reference)? {
            Stored::Image(image) => Ok(image.clone()),
            _ => Err(PackError::Other(format!("{} is not an image", reference))),
        }
    }

    async fn index(&self, reference: &ImageReference) -> Result<RegistryIndex> {
        match self.lookup(reference)? {
            Stored::Index(index) => Ok(index.clone()),
            _ => Err(PackError::Other(format!("{} is not an index", reference))),
        }
    }
}

/// Wraps a registry and records how many calls are in flight at once.
pub struct GaugedRegistry {
    inner: FakeRegistry,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl GaugedRegistry {
    pub fn new(inner: FakeRegistry) -> Self {
        Self {
            inner,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Highest number of simultaneous registry calls observed.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn gauged<T>(&self, call: impl Future<Output = T>) -> T {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let out = call.await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

#[async_trait]
impl Registry for GaugedRegistry {
    async fn generic(&self, reference: &ImageReference) -> Result<GenericDescriptor> {
        self.gauged(self.inner.generic(reference)).await
    }

    async fn image(&self, reference: &ImageReference) -> Result<RegistryImage> {
        self.gauged(self.inner.image(reference)).await
    }

    async fn index(&self, reference: &ImageReference) -> Result<RegistryIndex> {
        self.gauged(self.inner.index(reference)).await
    }
}

/// Every entry of a tar file as `(name, bytes)`, in archive order.
pub fn tar_entries(path: &Path) -> Vec<(String, Vec<u8>)> {
    let file = std::fs::File::open(path).unwrap();
    let mut archive = tar::Archive::new(file);
    let mut out = Vec::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        let name = entry.path().unwrap().to_string_lossy().to_string();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        out.push((name, data));
    }
    out
}

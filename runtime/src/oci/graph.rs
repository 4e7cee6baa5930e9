//! Descriptor graph construction and serialization.
//!
//! [`GraphBuilder`] walks a [`Registry`] for a set of top-level references and
//! produces a [`DescriptorGraph`]: the sorted descriptor tree plus a frozen
//! map of layer content handles. The same graph type is produced when reading
//! an archive, with layer content served from the archive instead.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use imgpack_core::config::PackConfig;
use imgpack_core::error::{PackError, Result};
use imgpack_core::throttle::Throttle;

use super::descriptor::{Descriptor, ImageDescriptor, IndexDescriptor, LayerDescriptor};
use super::digest::Digest;
use super::layers::{FrozenLayers, LayerContent, LayerProvider};
use super::media_type;
use super::reference::ImageReference;
use super::registry::Registry;

/// Images and indexes to package, with access to their layer bytes.
#[derive(Clone)]
pub struct DescriptorGraph {
    descriptors: Vec<Descriptor>,
    layers: Arc<dyn LayerProvider>,
}

impl std::fmt::Debug for DescriptorGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DescriptorGraph")
            .field("descriptors", &self.descriptors)
            .finish_non_exhaustive()
    }
}

impl DescriptorGraph {
    /// Assemble a graph; top-level descriptors are sorted by content.
    pub fn new(mut descriptors: Vec<Descriptor>, layers: Arc<dyn LayerProvider>) -> Self {
        descriptors.sort_by_key(Descriptor::sort_key);
        Self {
            descriptors,
            layers,
        }
    }

    /// Parse the JSON form produced by [`DescriptorGraph::as_bytes`].
    pub fn from_bytes(bytes: &[u8], layers: Arc<dyn LayerProvider>) -> Result<Self> {
        let descriptors: Vec<Descriptor> = serde_json::from_slice(bytes)?;
        Ok(Self::new(descriptors, layers))
    }

    /// Deterministic JSON form, top-level entries sorted by digest-derived key.
    pub fn as_bytes(&self) -> Result<Vec<u8>> {
        let mut sorted: Vec<&Descriptor> = self.descriptors.iter().collect();
        sorted.sort_by_key(|d| d.sort_key());
        Ok(serde_json::to_vec(&sorted)?)
    }

    /// Top-level descriptors in sorted order.
    pub fn descriptors(&self) -> &[Descriptor] {
        &self.descriptors
    }

    /// Layer content for this graph.
    pub fn layer_provider(&self) -> &Arc<dyn LayerProvider> {
        &self.layers
    }

    /// Every image reachable from any top-level descriptor.
    pub fn images(&self) -> Vec<&ImageDescriptor> {
        self.descriptors.iter().flat_map(|d| d.images()).collect()
    }

    /// Distinct distributable layers in ascending digest order.
    pub fn layers(&self) -> Vec<&LayerDescriptor> {
        let mut unique: BTreeMap<&Digest, &LayerDescriptor> = BTreeMap::new();
        for image in self.images() {
            for layer in image.layers.iter().filter(|l| l.distributable) {
                unique.entry(&layer.digest).or_insert(layer);
            }
        }
        unique.into_values().collect()
    }

    /// Aliases of all top-level descriptors.
    pub fn refs(&self) -> Vec<&str> {
        self.descriptors
            .iter()
            .flat_map(|d| d.refs().iter().map(String::as_str))
            .collect()
    }

    /// Check every manifest, config and index body against its digest.
    pub fn verify(&self) -> Result<()> {
        self.descriptors.iter().try_for_each(Descriptor::verify)
    }
}

type LayerEntries = Vec<(LayerDescriptor, Arc<dyn LayerContent>)>;

/// Builds a [`DescriptorGraph`] from registry references.
pub struct GraphBuilder {
    registry: Arc<dyn Registry>,
    throttle: Throttle,
    verify_digests: bool,
}

impl GraphBuilder {
    pub fn new(registry: Arc<dyn Registry>, config: &PackConfig) -> Self {
        Self {
            registry,
            throttle: Throttle::new(config.registry_concurrency),
            verify_digests: config.verify_digests,
        }
    }

    /// Share an existing throttle instead of a private one.
    pub fn with_throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = throttle;
        self
    }

    /// Fetch metadata for every reference.
    ///
    /// One throttled worker per top-level reference; index children are
    /// walked serially inside their parent's worker. The first failing
    /// reference (in input order) aborts the build once all workers finish.
    pub async fn build(&self, references: &[ImageReference]) -> Result<DescriptorGraph> {
        let mut handles = Vec::with_capacity(references.len());

        for reference in references {
            let registry = Arc::clone(&self.registry);
            let throttle = self.throttle.clone();
            let reference = reference.clone();
            let verify = self.verify_digests;

            handles.push(tokio::spawn(async move {
                let permit = throttle.take().await?;
                let mut entries = LayerEntries::new();
                let fetched =
                    fetch_descriptor(registry.as_ref(), &reference, verify, &mut entries).await;
                permit.done();

                let mut descriptor = fetched?;
                *descriptor.refs_mut() = vec![reference.full_reference()];
                Ok::<_, PackError>((descriptor, entries))
            }));
        }

        let mut first_error = None;
        let mut fetched = Vec::with_capacity(handles.len());
        for handle in handles {
            let outcome = handle
                .await
                .map_err(|e| PackError::QueueError(format!("graph worker aborted: {}", e)))
                .and_then(|r| r);
            match outcome {
                Ok(item) => fetched.push(item),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let mut all_entries = LayerEntries::new();
        let mut merged: HashMap<String, Descriptor> = HashMap::new();
        for (descriptor, entries) in fetched {
            all_entries.extend(entries);
            match merged.entry(descriptor.sort_key()) {
                Entry::Occupied(mut existing) => {
                    let refs = existing.get_mut().refs_mut();
                    refs.extend(descriptor.refs().iter().cloned());
                    refs.sort();
                    refs.dedup();
                }
                Entry::Vacant(slot) => {
                    slot.insert(descriptor);
                }
            }
        }

        let layers = FrozenLayers::from_entries(all_entries);
        let graph = DescriptorGraph::new(merged.into_values().collect(), Arc::new(layers));

        tracing::info!(
            references = references.len(),
            descriptors = graph.descriptors().len(),
            layers = graph.layers().len(),
            "Built descriptor graph"
        );

        Ok(graph)
    }
}

fn fetch_descriptor<'a>(
    registry: &'a dyn Registry,
    reference: &'a ImageReference,
    verify: bool,
    entries: &'a mut LayerEntries,
) -> BoxFuture<'a, Result<Descriptor>> {
    async move {
        let generic = registry
            .generic(reference)
            .await
            .map_err(|e| annotate(reference, e))?;

        if media_type::is_legacy_v1(&generic.media_type) {
            return Err(PackError::UnsupportedManifest {
                reference: reference.to_string(),
                hint: media_type::LEGACY_V1_HINT.to_string(),
            });
        }

        if media_type::is_index(&generic.media_type) {
            let index = registry
                .index(reference)
                .await
                .map_err(|e| annotate(reference, e))?;
            if verify {
                index
                    .digest
                    .verify(index.raw.as_bytes())
                    .map_err(|e| PackError::registry(reference.to_string(), e))?;
            }

            let mut children = Vec::with_capacity(index.manifests.len());
            for entry in &index.manifests {
                let child_ref = reference.with_digest(entry.digest.clone());
                tracing::debug!(parent = %reference, child = %child_ref, "Fetching index child");
                children.push(fetch_descriptor(registry, &child_ref, verify, entries).await?);
            }

            return Ok(Descriptor::Index(IndexDescriptor {
                refs: Vec::new(),
                children,
                media_type: index.media_type,
                digest: index.digest,
                raw: index.raw,
            }));
        }

        if media_type::is_image(&generic.media_type) {
            let image = registry
                .image(reference)
                .await
                .map_err(|e| annotate(reference, e))?;

            let mut layers = Vec::with_capacity(image.layers.len());
            for layer in image.layers {
                tracing::debug!(
                    reference = %reference,
                    digest = %layer.descriptor.digest,
                    size = layer.descriptor.size,
                    "Recorded layer"
                );
                layers.push(layer.descriptor.clone());
                entries.push((layer.descriptor, layer.content));
            }

            let descriptor = ImageDescriptor {
                refs: Vec::new(),
                layers,
                config: image.config,
                manifest: image.manifest,
            };
            if verify {
                descriptor
                    .verify()
                    .map_err(|e| PackError::registry(reference.to_string(), e))?;
            }
            return Ok(Descriptor::Image(descriptor));
        }

        Err(PackError::registry(
            reference.to_string(),
            format!("unsupported media type '{}'", generic.media_type),
        ))
    }
    .boxed()
}

/// Attach the failing reference to a registry error, rewriting schema 1
/// failures into an actionable hint.
fn annotate(reference: &ImageReference, err: PackError) -> PackError {
    if matches!(err, PackError::UnsupportedManifest { .. }) {
        return err;
    }
    if media_type::mentions_legacy_v1(&err.to_string()) {
        return PackError::UnsupportedManifest {
            reference: reference.to_string(),
            hint: media_type::LEGACY_V1_HINT.to_string(),
        };
    }
    if matches!(err, PackError::RegistryFetch { .. }) {
        err
    } else {
        PackError::registry(reference.to_string(), err)
    }
}

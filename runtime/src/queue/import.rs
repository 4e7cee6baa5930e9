//! Importing archived images into a registry.

use std::collections::HashMap;
use std::sync::Arc;

use imgpack_core::config::PackConfig;
use imgpack_core::error::{PackError, Result};
use imgpack_core::queue::{QueueOutcome, WorkQueue};
use imgpack_core::throttle::Throttle;

use crate::oci::descriptor::Descriptor;
use crate::oci::digest::Digest;
use crate::oci::graph::DescriptorGraph;
use crate::oci::reference::ImageReference;
use crate::oci::registry::RegistryWriter;

/// Writes every top-level descriptor of a graph into one repository.
pub struct ImportQueue {
    writer: Arc<dyn RegistryWriter>,
    queue: WorkQueue,
}

impl ImportQueue {
    pub fn new(writer: Arc<dyn RegistryWriter>, config: &PackConfig) -> Self {
        Self::with_throttle(writer, Throttle::new(config.queue_concurrency))
    }

    pub fn with_throttle(writer: Arc<dyn RegistryWriter>, throttle: Throttle) -> Self {
        Self {
            writer,
            queue: WorkQueue::new("import", throttle),
        }
    }

    /// Write each top-level image or index into `repository`, keyed by its
    /// digest. Layers are read from the graph's own provider.
    pub async fn run(
        &self,
        graph: &DescriptorGraph,
        repository: &ImageReference,
    ) -> QueueOutcome<Digest, ImageReference> {
        let descriptors: HashMap<Digest, Descriptor> = graph
            .descriptors()
            .iter()
            .map(|d| (d.digest().clone(), d.clone()))
            .collect();
        let digests = graph.descriptors().iter().map(|d| d.digest().clone()).collect();

        let descriptors = Arc::new(descriptors);
        let layers = Arc::clone(graph.layer_provider());
        let writer = Arc::clone(&self.writer);
        let repository = repository.clone();

        self.queue
            .run(digests, move |digest: Digest| {
                let descriptors = Arc::clone(&descriptors);
                let layers = Arc::clone(&layers);
                let writer = Arc::clone(&writer);
                let repository = repository.clone();
                async move {
                    let descriptor = descriptors.get(&digest).ok_or_else(|| {
                        PackError::QueueError(format!("no descriptor for {}", digest))
                    })?;
                    let written = match descriptor {
                        Descriptor::Image(image) => {
                            writer.write_image(&repository, image, layers.as_ref()).await
                        }
                        Descriptor::Index(index) => {
                            writer.write_index(&repository, index, layers.as_ref()).await
                        }
                    }
                    .map_err(|e| PackError::registry(repository.to_string(), e))?;

                    tracing::info!(
                        digest = %digest,
                        refs = ?descriptor.refs(),
                        written = %written,
                        "Imported descriptor"
                    );
                    Ok::<_, PackError>(written)
                }
            })
            .await
    }
}

/// Map every alias and digest of the imported descriptors to the reference
/// it was written as.
pub fn alias_map(
    graph: &DescriptorGraph,
    written: &HashMap<Digest, ImageReference>,
) -> Result<HashMap<String, ImageReference>> {
    let mut aliases = HashMap::new();
    for descriptor in graph.descriptors() {
        let digest = descriptor.digest();
        let target = written.get(digest).ok_or_else(|| {
            PackError::QueueError(format!("descriptor {} was not imported", digest))
        })?;
        aliases.insert(digest.to_string(), target.clone());
        for alias in descriptor.refs() {
            aliases.insert(alias.clone(), target.clone());
        }
    }
    Ok(aliases)
}

//! Tag to digest resolution.

use std::sync::Arc;

use imgpack_core::config::PackConfig;
use imgpack_core::error::PackError;
use imgpack_core::queue::{QueueOutcome, WorkQueue};
use imgpack_core::throttle::Throttle;

use crate::oci::reference::ImageReference;
use crate::oci::registry::Registry;

/// Pins tag references to the digest they currently point at.
pub struct ResolveQueue {
    registry: Arc<dyn Registry>,
    queue: WorkQueue,
}

impl ResolveQueue {
    pub fn new(registry: Arc<dyn Registry>, config: &PackConfig) -> Self {
        Self::with_throttle(registry, Throttle::new(config.queue_concurrency))
    }

    pub fn with_throttle(registry: Arc<dyn Registry>, throttle: Throttle) -> Self {
        Self {
            registry,
            queue: WorkQueue::new("resolve", throttle),
        }
    }

    /// Resolve every reference. Already pinned references are returned as-is
    /// without a registry call.
    pub async fn run(
        &self,
        references: Vec<ImageReference>,
    ) -> QueueOutcome<ImageReference, ImageReference> {
        let registry = Arc::clone(&self.registry);
        self.queue
            .run(references, move |reference: ImageReference| {
                let registry = Arc::clone(&registry);
                async move {
                    if reference.digest.is_some() {
                        return Ok(reference);
                    }
                    let generic = registry
                        .generic(&reference)
                        .await
                        .map_err(|e| PackError::registry(reference.to_string(), e))?;
                    tracing::debug!(reference = %reference, digest = %generic.digest, "Resolved reference");
                    Ok::<_, PackError>(ImageReference {
                        digest: Some(generic.digest),
                        ..reference
                    })
                }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::digest::Digest;
    use crate::oci::media_type;
    use crate::oci::registry::{GenericDescriptor, RegistryImage, RegistryIndex};
    use async_trait::async_trait;
    use imgpack_core::error::Result;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolves every repository except `missing` to the hash of its name.
    #[derive(Default)]
    struct TagRegistry {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Registry for TagRegistry {
        async fn generic(&self, reference: &ImageReference) -> Result<GenericDescriptor> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if reference.repository.ends_with("missing") {
                return Err(PackError::Other("manifest unknown".to_string()));
            }
            Ok(GenericDescriptor {
                media_type: media_type::OCI_MANIFEST.to_string(),
                digest: Digest::sha256(reference.repository.as_bytes()),
            })
        }
        async fn image(&self, _reference: &ImageReference) -> Result<RegistryImage> {
            Err(PackError::Other("not used".to_string()))
        }
        async fn index(&self, _reference: &ImageReference) -> Result<RegistryIndex> {
            Err(PackError::Other("not used".to_string()))
        }
    }

    fn parse(s: &str) -> ImageReference {
        ImageReference::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_resolves_tags_to_digests() {
        let registry = Arc::new(TagRegistry::default());
        let queue = ResolveQueue::new(registry.clone(), &PackConfig::default());
        let tagged = parse("ghcr.io/org/app:v1");

        let resolved = queue.run(vec![tagged.clone()]).await.into_result().unwrap();
        let pinned = &resolved[&tagged];
        assert_eq!(pinned.digest, Some(Digest::sha256(b"org/app")));
        assert_eq!(pinned.tag.as_deref(), Some("v1"));
        assert_eq!(registry.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pinned_references_skip_registry() {
        let registry = Arc::new(TagRegistry::default());
        let queue = ResolveQueue::new(registry.clone(), &PackConfig::default());
        let pinned = parse("app").with_digest(Digest::sha256(b"x"));

        let resolved = queue.run(vec![pinned.clone()]).await.into_result().unwrap();
        assert_eq!(resolved[&pinned], pinned);
        assert_eq!(registry.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_one_bad_reference_among_five() {
        let registry = Arc::new(TagRegistry::default());
        let queue = ResolveQueue::new(registry, &PackConfig::default());
        let mut references: Vec<_> = (0..5).map(|i| parse(&format!("org/app{}:v1", i))).collect();
        references.push(parse("org/missing:v1"));

        let outcome = queue.run(references).await;
        assert_eq!(outcome.results.len(), 5);

        let err = outcome.into_result().unwrap_err();
        assert_eq!(err.failed_keys(), vec!["docker.io/org/missing:v1"]);
        assert!(err.to_string().contains("manifest unknown"));
    }
}

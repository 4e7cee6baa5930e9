//! Image builds through an external builder.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use imgpack_core::config::PackConfig;
use imgpack_core::error::{PackError, Result};
use imgpack_core::queue::{QueueOutcome, WorkQueue};
use imgpack_core::throttle::Throttle;

use crate::oci::reference::ImageReference;

/// One image to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Name the built image is published under; the queue key
    pub name: String,
    /// Build context directory
    pub context: PathBuf,
    /// Extra arguments handed to the builder
    pub args: HashMap<String, String>,
}

impl BuildRequest {
    pub fn new(name: impl Into<String>, context: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            context: context.into(),
            args: HashMap::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Produces images; docker, buildx, ko and friends live behind this.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Build and publish `request`, returning the pushed reference.
    async fn build(&self, request: &BuildRequest) -> Result<ImageReference>;
}

/// Runs build requests concurrently, keyed by image name.
pub struct BuildQueue {
    builder: Arc<dyn Builder>,
    queue: WorkQueue,
}

impl BuildQueue {
    pub fn new(builder: Arc<dyn Builder>, config: &PackConfig) -> Self {
        Self::with_throttle(builder, Throttle::new(config.queue_concurrency))
    }

    pub fn with_throttle(builder: Arc<dyn Builder>, throttle: Throttle) -> Self {
        Self {
            builder,
            queue: WorkQueue::new("build", throttle),
        }
    }

    /// Build every request. A name requested twice is built once, using the
    /// first request for it.
    pub async fn run(&self, requests: Vec<BuildRequest>) -> QueueOutcome<String, ImageReference> {
        let mut names = Vec::with_capacity(requests.len());
        let mut by_name = HashMap::with_capacity(requests.len());
        for request in requests {
            if !by_name.contains_key(&request.name) {
                names.push(request.name.clone());
                by_name.insert(request.name.clone(), request);
            }
        }

        let by_name = Arc::new(by_name);
        let builder = Arc::clone(&self.builder);
        self.queue
            .run(names, move |name: String| {
                let builder = Arc::clone(&builder);
                let by_name = Arc::clone(&by_name);
                async move {
                    let request = by_name
                        .get(&name)
                        .ok_or_else(|| PackError::QueueError(format!("no build request for {}", name)))?;
                    let built = builder.build(request).await?;
                    tracing::info!(name = %name, reference = %built, "Built image");
                    Ok::<_, PackError>(built)
                }
            })
            .await
    }
}

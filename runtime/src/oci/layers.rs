//! Handles to layer bytes.
//!
//! Descriptors never hold layer bytes. A [`LayerProvider`] maps a
//! [`LayerDescriptor`] to a [`LayerContent`] handle that can be opened as
//! many times as needed, whether the bytes come from a registry or from an
//! archive on disk.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use imgpack_core::error::{PackError, Result};
use tokio::io::AsyncRead;

use super::descriptor::LayerDescriptor;

/// Compressed layer byte stream.
pub type LayerReader = Box<dyn AsyncRead + Send + Unpin>;

/// Re-openable source of one layer's compressed bytes.
#[async_trait]
pub trait LayerContent: Send + Sync {
    async fn open(&self) -> Result<LayerReader>;
}

/// Locates layer content by descriptor.
#[async_trait]
pub trait LayerProvider: Send + Sync {
    async fn find(&self, layer: &LayerDescriptor) -> Result<Arc<dyn LayerContent>>;
}

/// Layer bytes held in memory.
#[derive(Debug, Clone)]
pub struct InMemoryLayer {
    data: Arc<Vec<u8>>,
}

impl InMemoryLayer {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::new(data.into()),
        }
    }
}

#[async_trait]
impl LayerContent for InMemoryLayer {
    async fn open(&self) -> Result<LayerReader> {
        Ok(Box::new(std::io::Cursor::new(self.data.as_ref().clone())))
    }
}

/// Read-only map from descriptor to content, built once after all
/// registry workers have finished.
#[derive(Default, Clone)]
pub struct FrozenLayers {
    contents: HashMap<LayerDescriptor, Arc<dyn LayerContent>>,
}

impl FrozenLayers {
    /// Freeze `entries`; the first handle seen for a descriptor wins.
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (LayerDescriptor, Arc<dyn LayerContent>)>,
    {
        let mut contents = HashMap::new();
        for (layer, content) in entries {
            contents.entry(layer).or_insert(content);
        }
        Self { contents }
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

#[async_trait]
impl LayerProvider for FrozenLayers {
    async fn find(&self, layer: &LayerDescriptor) -> Result<Arc<dyn LayerContent>> {
        self.contents.get(layer).cloned().ok_or_else(|| {
            PackError::Other(format!("no content recorded for layer {}", layer.digest))
        })
    }
}

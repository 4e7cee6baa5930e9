//! OCI image metadata for packaging.
//!
//! References, digests and media types, the descriptor model, registry
//! collaborator traits, and the [`DescriptorGraph`] built from them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  generic/image/index   ┌──────────────┐
//! │   Registry   │ ─────────────────────► │ GraphBuilder │
//! └──────────────┘                        └──────┬───────┘
//!                                                │ build()
//!                                                ▼
//!                     ┌───────────────────────────────────────────┐
//!                     │ DescriptorGraph                           │
//!                     │  descriptors: [Image | Index{children}]   │
//!                     │  layers: Arc<dyn LayerProvider>           │
//!                     └───────────────────────────────────────────┘
//! ```

pub mod descriptor;
pub mod digest;
pub mod graph;
pub mod layers;
pub mod media_type;
pub mod reference;
pub mod registry;

pub use descriptor::{
    ConfigDescriptor, Descriptor, ImageDescriptor, IndexDescriptor, LayerDescriptor,
    ManifestDescriptor,
};
pub use digest::Digest;
pub use graph::{DescriptorGraph, GraphBuilder};
pub use layers::{FrozenLayers, InMemoryLayer, LayerContent, LayerProvider, LayerReader};
pub use reference::ImageReference;
pub use registry::{
    GenericDescriptor, IndexEntry, Platform, Registry, RegistryImage, RegistryIndex,
    RegistryLayer, RegistryWriter,
};

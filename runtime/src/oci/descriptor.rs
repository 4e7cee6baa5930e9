//! Content-addressed descriptors for images, indexes and layers.
//!
//! A [`Descriptor`] is either a single-platform image or an index whose
//! children are again images or indexes. Descriptors carry raw manifest and
//! config bytes but never layer bytes.
//!
//! The JSON form uses capitalized field names and wraps each descriptor as
//! `{"ImageIndex": ..., "Image": ...}` with exactly one side set:
//!
//! ```text
//! [
//!   { "ImageIndex": null,
//!     "Image": { "Refs": [...], "Layers": [...], "Config": {...}, "Manifest": {...} } },
//!   { "ImageIndex": { "Refs": [...], "Images": [...], "Indexes": [...],
//!                     "MediaType": "...", "Digest": "...", "Raw": "..." },
//!     "Image": null }
//! ]
//! ```

use imgpack_core::error::{PackError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::digest::Digest;
use super::media_type;

fn default_distributable() -> bool {
    true
}

/// One filesystem layer of an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LayerDescriptor {
    pub media_type: String,
    /// Hash of the compressed blob
    pub digest: Digest,
    /// Hash of the uncompressed tar stream
    #[serde(rename = "DiffID")]
    pub diff_id: Digest,
    pub size: u64,
    /// False for foreign layers that must not be rehosted
    #[serde(default = "default_distributable")]
    pub distributable: bool,
}

impl LayerDescriptor {
    /// Build a layer descriptor, marking foreign media types non-distributable.
    pub fn new(media_type: impl Into<String>, digest: Digest, diff_id: Digest, size: u64) -> Self {
        let media_type = media_type.into();
        let distributable = !media_type::is_foreign_layer(&media_type);
        Self {
            media_type,
            digest,
            diff_id,
            size,
            distributable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfigDescriptor {
    pub digest: Digest,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ManifestDescriptor {
    pub media_type: String,
    pub digest: Digest,
    pub raw: String,
}

/// A single-platform image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageDescriptor {
    #[serde(default)]
    pub refs: Vec<String>,
    /// Base layer first
    pub layers: Vec<LayerDescriptor>,
    pub config: ConfigDescriptor,
    pub manifest: ManifestDescriptor,
}

impl ImageDescriptor {
    /// `<manifest digest>/<config digest>`
    pub fn sort_key(&self) -> String {
        format!("{}/{}", self.manifest.digest, self.config.digest)
    }

    /// Check the manifest and config bytes against their digests.
    pub fn verify(&self) -> Result<()> {
        self.manifest.digest.verify(self.manifest.raw.as_bytes()).map_err(|e| {
            PackError::ArchiveCorrupt(format!("manifest {}: {}", self.manifest.digest, e))
        })?;
        self.config.digest.verify(self.config.raw.as_bytes()).map_err(|e| {
            PackError::ArchiveCorrupt(format!("config {}: {}", self.config.digest, e))
        })
    }
}

/// A multi-platform index. Children may themselves be indexes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    pub refs: Vec<String>,
    pub children: Vec<Descriptor>,
    pub media_type: String,
    pub digest: Digest,
    pub raw: String,
}

impl IndexDescriptor {
    pub fn sort_key(&self) -> String {
        self.digest.to_string()
    }

    /// Check this index's bytes and every child's, recursively.
    pub fn verify(&self) -> Result<()> {
        self.digest.verify(self.raw.as_bytes()).map_err(|e| {
            PackError::ArchiveCorrupt(format!("index {}: {}", self.digest, e))
        })?;
        self.children.iter().try_for_each(Descriptor::verify)
    }
}

/// An image or an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    Image(ImageDescriptor),
    Index(IndexDescriptor),
}

impl Descriptor {
    /// Digest-derived ordering key; independent of fetch order.
    pub fn sort_key(&self) -> String {
        match self {
            Descriptor::Image(image) => image.sort_key(),
            Descriptor::Index(index) => index.sort_key(),
        }
    }

    /// Manifest digest of an image, or the index digest.
    pub fn digest(&self) -> &Digest {
        match self {
            Descriptor::Image(image) => &image.manifest.digest,
            Descriptor::Index(index) => &index.digest,
        }
    }

    pub fn media_type(&self) -> &str {
        match self {
            Descriptor::Image(image) => &image.manifest.media_type,
            Descriptor::Index(index) => &index.media_type,
        }
    }

    pub fn refs(&self) -> &[String] {
        match self {
            Descriptor::Image(image) => &image.refs,
            Descriptor::Index(index) => &index.refs,
        }
    }

    pub fn refs_mut(&mut self) -> &mut Vec<String> {
        match self {
            Descriptor::Image(image) => &mut image.refs,
            Descriptor::Index(index) => &mut index.refs,
        }
    }

    pub fn verify(&self) -> Result<()> {
        match self {
            Descriptor::Image(image) => image.verify(),
            Descriptor::Index(index) => index.verify(),
        }
    }

    /// Every image reachable from this descriptor, depth first.
    pub fn images(&self) -> Vec<&ImageDescriptor> {
        let mut out = Vec::new();
        collect_images(self, &mut out);
        out
    }
}

fn collect_images<'a>(descriptor: &'a Descriptor, out: &mut Vec<&'a ImageDescriptor>) {
    match descriptor {
        Descriptor::Image(image) => out.push(image),
        Descriptor::Index(index) => {
            for child in &index.children {
                collect_images(child, out);
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct IndexWireRef<'a> {
    refs: &'a [String],
    images: Vec<&'a ImageDescriptor>,
    indexes: Vec<&'a IndexDescriptor>,
    media_type: &'a str,
    digest: &'a Digest,
    raw: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IndexWire {
    #[serde(default)]
    refs: Vec<String>,
    #[serde(default)]
    images: Vec<ImageDescriptor>,
    #[serde(default)]
    indexes: Vec<IndexDescriptor>,
    media_type: String,
    digest: Digest,
    raw: String,
}

impl Serialize for IndexDescriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut images = Vec::new();
        let mut indexes = Vec::new();
        for child in &self.children {
            match child {
                Descriptor::Image(image) => images.push(image),
                Descriptor::Index(index) => indexes.push(index),
            }
        }
        IndexWireRef {
            refs: &self.refs,
            images,
            indexes,
            media_type: &self.media_type,
            digest: &self.digest,
            raw: &self.raw,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for IndexDescriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = IndexWire::deserialize(deserializer)?;
        let children = wire
            .images
            .into_iter()
            .map(Descriptor::Image)
            .chain(wire.indexes.into_iter().map(Descriptor::Index))
            .collect();
        Ok(IndexDescriptor {
            refs: wire.refs,
            children,
            media_type: wire.media_type,
            digest: wire.digest,
            raw: wire.raw,
        })
    }
}

#[derive(Serialize)]
struct DescriptorWireRef<'a> {
    #[serde(rename = "ImageIndex")]
    image_index: Option<&'a IndexDescriptor>,
    #[serde(rename = "Image")]
    image: Option<&'a ImageDescriptor>,
}

#[derive(Deserialize)]
struct DescriptorWire {
    #[serde(rename = "ImageIndex", default)]
    image_index: Option<IndexDescriptor>,
    #[serde(rename = "Image", default)]
    image: Option<ImageDescriptor>,
}

impl Serialize for Descriptor {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let wire = match self {
            Descriptor::Image(image) => DescriptorWireRef {
                image_index: None,
                image: Some(image),
            },
            Descriptor::Index(index) => DescriptorWireRef {
                image_index: Some(index),
                image: None,
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Descriptor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        match DescriptorWire::deserialize(deserializer)? {
            DescriptorWire {
                image_index: Some(index),
                image: None,
            } => Ok(Descriptor::Index(index)),
            DescriptorWire {
                image_index: None,
                image: Some(image),
            } => Ok(Descriptor::Image(image)),
            DescriptorWire {
                image_index: Some(_),
                image: Some(_),
            } => Err(serde::de::Error::custom(
                "descriptor sets both ImageIndex and Image",
            )),
            DescriptorWire { .. } => Err(serde::de::Error::custom(
                "descriptor sets neither ImageIndex nor Image",
            )),
        }
    }
}

//! Core data model for IB boards.
//!
//! A board holds two node kinds: image sources (an uploaded picture plus
//! numbered annotation markers) and generators (layered prompt text plus
//! generation settings and results). Nodes are wired together with
//! directed connections that always end at a generator's input.

use crate::id::{ConnectionId, LayerId, NodeId, RequestId};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use kurbo::{Point, Rect, Size};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

/// Width of a freshly created image-source node, in world units.
pub const IMAGE_NODE_WIDTH: f64 = 320.0;
/// Width of a freshly created generator node, in world units.
pub const GENERATOR_NODE_WIDTH: f64 = 380.0;
/// Height nodes start with before the host reports their measured size.
pub const MIN_NODE_HEIGHT: f64 = 120.0;
/// Upper bound on images requested per generation.
pub const MAX_IMAGE_COUNT: u8 = 4;

// ─── Encoded images ──────────────────────────────────────────────────────

/// An encoded raster image (PNG, JPEG, …) with its MIME type.
///
/// The payload is reference-counted: cloning an image, a node, or a whole
/// board shares the bytes instead of copying them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedImage {
    pub mime: String,
    pub bytes: Bytes,
}

impl EncodedImage {
    pub fn new(mime: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    pub fn png(bytes: impl Into<Bytes>) -> Self {
        Self::new("image/png", bytes)
    }

    /// Parse a `data:<mime>;base64,<payload>` URL.
    /// Returns `None` for anything that isn't a base64 image data URL.
    pub fn from_data_url(url: &str) -> Option<Self> {
        let rest = url.strip_prefix("data:")?;
        let (header, payload) = rest.split_once(',')?;
        let mime = header.strip_suffix(";base64")?;
        if !mime.starts_with("image/") {
            return None;
        }
        let bytes = STANDARD.decode(payload.trim()).ok()?;
        Some(Self::new(mime, bytes))
    }

    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncodedImage({}, {} bytes)", self.mime, self.bytes.len())
    }
}

// ─── Image source payload ────────────────────────────────────────────────

/// A numbered marker on an image, positioned in percent of the image size.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u32,
    /// Horizontal position, 0..=100 percent of image width.
    pub x: f64,
    /// Vertical position, 0..=100 percent of image height.
    pub y: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSourceData {
    pub image: Option<EncodedImage>,
    pub annotations: Vec<Annotation>,
    /// Next annotation id. Only ever grows, so deleted ids are not reissued.
    pub next_annotation_id: u32,
    /// Whether clicks on the image add annotations.
    pub annotating: bool,
}

impl Default for ImageSourceData {
    fn default() -> Self {
        Self {
            image: None,
            annotations: Vec::new(),
            next_annotation_id: 1,
            annotating: false,
        }
    }
}

// ─── Generator payload ───────────────────────────────────────────────────

/// A named, toggleable fragment of prompt text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub id: LayerId,
    pub name: String,
    pub prompt: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "2:3")]
    Portrait2x3,
    #[serde(rename = "3:2")]
    Landscape3x2,
    #[serde(rename = "3:4")]
    Portrait3x4,
    #[serde(rename = "4:3")]
    Landscape4x3,
    #[serde(rename = "9:16")]
    Portrait9x16,
    #[serde(rename = "16:9")]
    Landscape16x9,
    #[serde(rename = "21:9")]
    Ultrawide21x9,
}

impl AspectRatio {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Square => "1:1",
            Self::Portrait2x3 => "2:3",
            Self::Landscape3x2 => "3:2",
            Self::Portrait3x4 => "3:4",
            Self::Landscape4x3 => "4:3",
            Self::Portrait9x16 => "9:16",
            Self::Landscape16x9 => "16:9",
            Self::Ultrawide21x9 => "21:9",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[default]
    #[serde(rename = "1K")]
    R1K,
    #[serde(rename = "2K")]
    R2K,
    #[serde(rename = "4K")]
    R4K,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::R1K => "1K",
            Self::R2K => "2K",
            Self::R4K => "4K",
        }
    }
}

/// Per-node settings forwarded to the generation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub model: String,
    pub aspect_ratio: AspectRatio,
    pub resolution: Resolution,
    /// Images requested per trigger, 1..=4.
    pub image_count: u8,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-image".into(),
            aspect_ratio: AspectRatio::default(),
            resolution: Resolution::default(),
            image_count: 1,
        }
    }
}

impl GenerationConfig {
    /// Clamp values into their valid ranges.
    pub fn normalized(mut self) -> Self {
        self.image_count = self.image_count.clamp(1, MAX_IMAGE_COUNT);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GenerationStatus {
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorData {
    pub title: String,
    /// Ordered prompt layers. Never empty.
    pub layers: Vec<Layer>,
    /// Single-prompt field from boards that predate layers.
    pub legacy_prompt: Option<String>,
    pub config: GenerationConfig,
    /// Results of the latest successful generation, in response order.
    pub images: SmallVec<[EncodedImage; 4]>,
    pub selected_index: usize,
    pub status: GenerationStatus,
    pub error: Option<String>,
    /// The generation cycle whose response may still update this node.
    #[serde(skip)]
    pub active_request: Option<RequestId>,
}

impl GeneratorData {
    pub fn new(first_layer: LayerId) -> Self {
        Self {
            title: "Untitled".into(),
            layers: vec![Layer {
                id: first_layer,
                name: "Layer 1".into(),
                prompt: String::new(),
                enabled: true,
            }],
            legacy_prompt: None,
            config: GenerationConfig::default(),
            images: SmallVec::new(),
            selected_index: 0,
            status: GenerationStatus::Idle,
            error: None,
            active_request: None,
        }
    }

    /// The currently selected generated image, if any.
    pub fn generated_image(&self) -> Option<&EncodedImage> {
        self.images.get(self.selected_index)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }
}

// ─── Nodes ───────────────────────────────────────────────────────────────

/// The node kinds on a board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NodeKind {
    ImageSource(ImageSourceData),
    Generator(GeneratorData),
}

impl NodeKind {
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::ImageSource(_) => "image",
            NodeKind::Generator(_) => "generator",
        }
    }
}

/// A single node on the board.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    /// Human-readable sequence number ("image 3"), never reused.
    pub display_id: u32,
    /// Top-left corner in world space.
    pub position: Point,
    /// Width is fixed at creation; height grows with content.
    pub size: Size,
    pub kind: NodeKind,
}

impl Node {
    pub fn bounds(&self) -> Rect {
        Rect::from_origin_size(self.position, self.size)
    }

    pub fn is_generator(&self) -> bool {
        matches!(self.kind, NodeKind::Generator(_))
    }

    pub fn as_image_source(&self) -> Option<&ImageSourceData> {
        match &self.kind {
            NodeKind::ImageSource(data) => Some(data),
            NodeKind::Generator(_) => None,
        }
    }

    pub fn as_generator(&self) -> Option<&GeneratorData> {
        match &self.kind {
            NodeKind::Generator(data) => Some(data),
            NodeKind::ImageSource(_) => None,
        }
    }

    pub fn as_image_source_mut(&mut self) -> Option<&mut ImageSourceData> {
        match &mut self.kind {
            NodeKind::ImageSource(data) => Some(data),
            NodeKind::Generator(_) => None,
        }
    }

    pub fn as_generator_mut(&mut self) -> Option<&mut GeneratorData> {
        match &mut self.kind {
            NodeKind::Generator(data) => Some(data),
            NodeKind::ImageSource(_) => None,
        }
    }

    /// The image this node feeds downstream: the uploaded picture for an
    /// image source, the selected result for a generator.
    pub fn output_image(&self) -> Option<&EncodedImage> {
        match &self.kind {
            NodeKind::ImageSource(data) => data.image.as_ref(),
            NodeKind::Generator(data) => data.generated_image(),
        }
    }
}

/// A directed wire from a node's output into a generator's input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub source: NodeId,
    pub target: NodeId,
}

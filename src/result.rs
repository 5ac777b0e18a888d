use std::path::Path;

use geo::{Coord, LineString, Polygon};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Four corners of a detected region in pixel space, in detector order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct BoundingPolygon {
    pub points: [Coord<f32>; 4],
}

impl BoundingPolygon {
    pub fn new(points: [Coord<f32>; 4]) -> Self {
        Self { points }
    }

    /// Builds a polygon from the flat `[x1, y1, ..., x4, y4]` layout.
    pub fn from_flat(values: [f32; 8]) -> Self {
        let point = |i: usize| Coord {
            x: values[i * 2],
            y: values[i * 2 + 1],
        };
        Self::new([point(0), point(1), point(2), point(3)])
    }

    /// Clockwise corners of an axis-aligned box.
    pub fn from_box(bounds: BoundingBox) -> Self {
        let BoundingBox { x, y, w, h } = bounds;
        Self::from_flat([x, y, x + w, y, x + w, y + h, x, y + h])
    }

    pub fn to_flat(&self) -> [f32; 8] {
        let mut flat = [0.0; 8];
        for (i, point) in self.points.iter().enumerate() {
            flat[i * 2] = point.x;
            flat[i * 2 + 1] = point.y;
        }
        flat
    }

    pub fn to_geo(&self) -> Polygon<f32> {
        Polygon::new(LineString::from(self.points.to_vec()), vec![])
    }
}

impl TryFrom<Vec<f32>> for BoundingPolygon {
    type Error = String;

    fn try_from(values: Vec<f32>) -> std::result::Result<Self, Self::Error> {
        let flat: [f32; 8] = values.try_into().map_err(|values: Vec<f32>| {
            format!("bounding polygon needs 8 numbers, got {}", values.len())
        })?;
        Ok(Self::from_flat(flat))
    }
}

impl From<BoundingPolygon> for Vec<f32> {
    fn from(polygon: BoundingPolygon) -> Self {
        polygon.to_flat().to_vec()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    #[serde(alias = "text")]
    pub content: String,
    #[serde(rename = "boundingBox", alias = "polygon")]
    pub bounds: BoundingPolygon,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextLine {
    #[serde(alias = "text")]
    pub content: String,
    #[serde(rename = "boundingBox", alias = "polygon")]
    pub bounds: BoundingPolygon,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub words: Vec<Word>,
}

impl TextLine {
    pub fn new(content: impl Into<String>, bounds: BoundingPolygon) -> Self {
        Self {
            content: content.into(),
            bounds,
            words: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub name: String,
    pub confidence: f32,
    #[serde(rename = "boundingBox")]
    pub bounds: BoundingBox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caption {
    pub content: String,
    pub confidence: f32,
}

/// A caption for one region of the image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseCaption {
    pub content: String,
    pub confidence: f32,
    #[serde(rename = "boundingBox")]
    pub bounds: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTag {
    pub name: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedPerson {
    pub confidence: f32,
    #[serde(rename = "boundingBox")]
    pub bounds: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CropSuggestion {
    #[serde(rename = "aspectRatio")]
    pub aspect_ratio: f32,
    #[serde(rename = "boundingBox")]
    pub bounds: BoundingBox,
}

/// Everything the vision service recognised in one image. Only `lines` and `objects` drive
/// redaction; the rest is reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalysisDocument {
    pub lines: Vec<TextLine>,
    pub objects: Vec<DetectedObject>,
    pub metadata: Option<ImageMetadata>,
    pub model_version: Option<String>,
    pub caption: Option<Caption>,
    pub dense_captions: Vec<DenseCaption>,
    pub tags: Vec<ImageTag>,
    pub people: Vec<DetectedPerson>,
    pub crop_suggestions: Vec<CropSuggestion>,
}

#[derive(Deserialize)]
struct Node {
    #[serde(default)]
    lines: Vec<TextLine>,
    #[serde(default)]
    objects: Vec<DetectedObject>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SavedDocument {
    Nodes(Vec<Node>),
    Node(Node),
}

impl AnalysisDocument {
    pub fn from_lines(lines: Vec<TextLine>) -> Self {
        Self {
            lines,
            ..Default::default()
        }
    }

    /// Parses a saved analysis result: either an array of nodes that each hold a `lines` array,
    /// or a single such node.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let saved: SavedDocument =
            serde_json::from_str(json).map_err(|e| Error::InvalidDocument(e.to_string()))?;
        let nodes = match saved {
            SavedDocument::Nodes(nodes) => nodes,
            SavedDocument::Node(node) => vec![node],
        };
        let mut document = Self::default();
        for node in nodes {
            document.lines.extend(node.lines);
            document.objects.extend(node.objects);
        }
        log::debug!(
            "Loaded analysis document with {} lines and {} objects",
            document.lines.len(),
            document.objects.len()
        );
        Ok(document)
    }

    #[tracing::instrument(level = "debug")]
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidDocument(format!("{}: {e}", path.display())))?;
        Self::from_json_str(&json)
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.objects.is_empty()
    }
}

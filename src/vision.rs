//! Client for the Azure AI Vision Image Analysis 4.0 REST API.
//!
//! Text lines with their words and detected objects feed redaction. Metadata, captions, tags,
//! people and crop suggestions are decoded for the report.

use std::path::Path;

use float_ord::FloatOrd;
use reqwest::{blocking::Client, header::CONTENT_TYPE, StatusCode};
use serde::Deserialize;
use tracing::instrument;

use crate::{
    config::VisionConfig, AnalysisDocument, BoundingBox, BoundingPolygon, Caption,
    CropSuggestion, DenseCaption, DetectedObject, DetectedPerson, Error, FailureReason,
    ImageMetadata, ImageTag, Result, TextLine, Word,
};

const API_PATH: &str = "computervision/imageanalysis:analyze";
const API_VERSION: &str = "2023-10-01";
const KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Anything that can turn an image file into an [`AnalysisDocument`].
pub trait ImageAnalyzer {
    fn analyze(&self, image: &Path) -> Result<AnalysisDocument>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    Read,
    Objects,
    Caption,
    DenseCaptions,
    People,
    SmartCrops,
    Tags,
}

impl Feature {
    fn as_str(&self) -> &'static str {
        match self {
            Feature::Read => "read",
            Feature::Objects => "objects",
            Feature::Caption => "caption",
            Feature::DenseCaptions => "denseCaptions",
            Feature::People => "people",
            Feature::SmartCrops => "smartCrops",
            Feature::Tags => "tags",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub features: Vec<Feature>,
    pub language: String,
    pub model_version: String,
    pub gender_neutral_caption: bool,
    /// Width over height of the wanted crops. Empty lets the service pick one.
    pub crop_aspect_ratios: Vec<f32>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            features: vec![Feature::Read, Feature::Objects],
            language: "en".to_string(),
            model_version: "latest".to_string(),
            gender_neutral_caption: true,
            crop_aspect_ratios: Vec::new(),
        }
    }
}

impl AnalysisOptions {
    pub fn with_feature(mut self, feature: Feature) -> Self {
        if !self.features.contains(&feature) {
            self.features.push(feature);
        }
        self
    }

    pub fn with_crop_aspect_ratios(mut self, ratios: &[f32]) -> Self {
        self.crop_aspect_ratios = ratios.to_vec();
        self
    }

    fn query(&self) -> Vec<(&'static str, String)> {
        let features = self
            .features
            .iter()
            .map(Feature::as_str)
            .collect::<Vec<_>>()
            .join(",");
        let mut query = vec![
            ("api-version", API_VERSION.to_string()),
            ("features", features),
            ("language", self.language.clone()),
            ("model-version", self.model_version.clone()),
        ];
        if self
            .features
            .iter()
            .any(|it| matches!(it, Feature::Caption | Feature::DenseCaptions))
        {
            query.push((
                "gender-neutral-caption",
                self.gender_neutral_caption.to_string(),
            ));
        }
        if self.features.contains(&Feature::SmartCrops) && !self.crop_aspect_ratios.is_empty() {
            let ratios = self
                .crop_aspect_ratios
                .iter()
                .map(|it| it.to_string())
                .collect::<Vec<_>>()
                .join(",");
            query.push(("smartcrops-aspect-ratios", ratios));
        }
        query
    }
}

/// Synchronous client: each call blocks until the service answers or the timeout passes.
pub struct VisionClient {
    config: VisionConfig,
    options: AnalysisOptions,
    http: Client,
}

impl VisionClient {
    pub fn new(config: VisionConfig, options: AnalysisOptions) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| unavailable(FailureReason::ConnectionFailure, None, e))?;
        Ok(Self {
            config,
            options,
            http,
        })
    }

    fn url(&self) -> String {
        format!("{}/{API_PATH}", self.config.endpoint)
    }

    #[instrument(skip(self, image), fields(len = image.len()))]
    pub fn analyze_bytes(&self, image: Vec<u8>) -> Result<AnalysisDocument> {
        let response = self
            .http
            .post(self.url())
            .query(&self.options.query())
            .header(KEY_HEADER, &self.config.key)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(image)
            .send()
            .map_err(|e| unavailable(FailureReason::ConnectionFailure, None, e))?;
        let status = response.status();
        let body = response
            .text()
            .map_err(|e| unavailable(FailureReason::ConnectionFailure, None, e))?;
        log::debug!("Vision service answered {status} with {} bytes", body.len());
        parse_response(status, &body)
    }
}

impl ImageAnalyzer for VisionClient {
    fn analyze(&self, image: &Path) -> Result<AnalysisDocument> {
        let bytes = std::fs::read(image).map_err(|e| Error::ImageOpen {
            path: image.to_path_buf(),
            source: image::ImageError::IoError(e),
        })?;
        self.analyze_bytes(bytes)
    }
}

fn unavailable(
    reason: FailureReason,
    code: Option<String>,
    message: impl std::fmt::Display,
) -> Error {
    Error::AnalysisUnavailable {
        reason,
        code,
        message: message.to_string(),
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ServiceError,
}

#[derive(Deserialize)]
struct ServiceError {
    code: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyzeResponse {
    model_version: Option<String>,
    metadata: Option<ImageMetadata>,
    caption_result: Option<CaptionResult>,
    objects_result: Option<Values<ObjectValue>>,
    read_result: Option<ReadResult>,
    dense_captions_result: Option<Values<DenseCaptionValue>>,
    tags_result: Option<Values<Tag>>,
    people_result: Option<Values<PersonValue>>,
    smart_crops_result: Option<Values<CropValue>>,
}

#[derive(Deserialize)]
struct Values<T> {
    #[serde(default = "Vec::new")]
    values: Vec<T>,
}

#[derive(Deserialize)]
struct CaptionResult {
    text: String,
    confidence: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectValue {
    bounding_box: BoundingBox,
    #[serde(default)]
    tags: Vec<Tag>,
}

#[derive(Deserialize)]
struct Tag {
    name: String,
    confidence: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DenseCaptionValue {
    text: String,
    confidence: f32,
    bounding_box: BoundingBox,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersonValue {
    bounding_box: BoundingBox,
    confidence: f32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CropValue {
    aspect_ratio: f32,
    bounding_box: BoundingBox,
}

#[derive(Deserialize)]
struct ReadResult {
    blocks: Vec<Block>,
}

#[derive(Deserialize)]
struct Block {
    lines: Vec<LineValue>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LineValue {
    text: String,
    bounding_polygon: Vec<ImagePoint>,
    #[serde(default)]
    words: Vec<WordValue>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WordValue {
    text: String,
    bounding_polygon: Vec<ImagePoint>,
    confidence: f32,
}

#[derive(Deserialize, Clone, Copy)]
struct ImagePoint {
    x: f32,
    y: f32,
}

fn to_polygon(points: &[ImagePoint]) -> Result<BoundingPolygon> {
    match points {
        [a, b, c, d] => Ok(BoundingPolygon::from_flat([
            a.x, a.y, b.x, b.y, c.x, c.y, d.x, d.y,
        ])),
        _ => Err(unavailable(
            FailureReason::InvalidResponse,
            None,
            format!("bounding polygon has {} points, expected 4", points.len()),
        )),
    }
}

fn values<T>(result: Option<Values<T>>) -> impl Iterator<Item = T> {
    result.into_iter().flat_map(|it| it.values)
}

/// Maps a service answer to a document, or to the reason it could not produce one.
pub(crate) fn parse_response(status: StatusCode, body: &str) -> Result<AnalysisDocument> {
    if !status.is_success() {
        let (code, message) = match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(ErrorEnvelope { error }) => (
                error.code,
                error.message.unwrap_or_else(|| format!("HTTP {status}")),
            ),
            Err(_) => (None, format!("HTTP {status}: {body}")),
        };
        return Err(unavailable(FailureReason::ServiceError, code, message));
    }

    let response: AnalyzeResponse = serde_json::from_str(body)
        .map_err(|e| unavailable(FailureReason::InvalidResponse, None, e))?;

    let mut lines = Vec::new();
    for line in response
        .read_result
        .into_iter()
        .flat_map(|it| it.blocks)
        .flat_map(|it| it.lines)
    {
        let words = line
            .words
            .iter()
            .map(|word| {
                Ok(Word {
                    content: word.text.clone(),
                    bounds: to_polygon(&word.bounding_polygon)?,
                    confidence: word.confidence,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        lines.push(TextLine {
            bounds: to_polygon(&line.bounding_polygon)?,
            content: line.text,
            words,
        });
    }

    let objects = values(response.objects_result)
        .filter_map(|object| {
            let tag = object
                .tags
                .into_iter()
                .max_by_key(|tag| FloatOrd(tag.confidence))?;
            Some(DetectedObject {
                name: tag.name,
                confidence: tag.confidence,
                bounds: object.bounding_box,
            })
        })
        .collect();

    Ok(AnalysisDocument {
        lines,
        objects,
        metadata: response.metadata,
        model_version: response.model_version,
        caption: response.caption_result.map(|caption| Caption {
            content: caption.text,
            confidence: caption.confidence,
        }),
        dense_captions: values(response.dense_captions_result)
            .map(|caption| DenseCaption {
                content: caption.text,
                confidence: caption.confidence,
                bounds: caption.bounding_box,
            })
            .collect(),
        tags: values(response.tags_result)
            .map(|tag| ImageTag {
                name: tag.name,
                confidence: tag.confidence,
            })
            .collect(),
        people: values(response.people_result)
            .map(|person| DetectedPerson {
                confidence: person.confidence,
                bounds: person.bounding_box,
            })
            .collect(),
        crop_suggestions: values(response.smart_crops_result)
            .map(|crop| CropSuggestion {
                aspect_ratio: crop.aspect_ratio,
                bounds: crop.bounding_box,
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const ANALYZED: &str = r#"{
        "modelVersion": "2023-10-01",
        "captionResult": {"text": "a white car parked on a street", "confidence": 0.71},
        "metadata": {"width": 800, "height": 600},
        "objectsResult": {"values": [
            {"boundingBox": {"x": 100, "y": 200, "w": 120, "h": 40},
             "tags": [{"name": "Vehicle registration plate", "confidence": 0.62},
                      {"name": "sign", "confidence": 0.31}]},
            {"boundingBox": {"x": 0, "y": 0, "w": 10, "h": 10}, "tags": []}
        ]},
        "readResult": {"blocks": [{"lines": [
            {"text": "VIN 1HGCM82633A004352",
             "boundingPolygon": [{"x": 10, "y": 20}, {"x": 300, "y": 22}, {"x": 299, "y": 60}, {"x": 9, "y": 58}],
             "words": [
                {"text": "VIN", "boundingPolygon": [{"x": 10, "y": 20}, {"x": 60, "y": 20}, {"x": 60, "y": 58}, {"x": 10, "y": 58}], "confidence": 0.99}
             ]}
        ]}]}
    }"#;

    #[test]
    fn maps_analyzed_response() {
        let document = parse_response(StatusCode::OK, ANALYZED).unwrap();
        assert_eq!(document.model_version.as_deref(), Some("2023-10-01"));
        assert_eq!(
            document.metadata,
            Some(ImageMetadata {
                width: 800,
                height: 600
            })
        );
        assert_eq!(
            document.caption.as_ref().map(|it| it.content.as_str()),
            Some("a white car parked on a street")
        );
        assert_eq!(document.lines.len(), 1);
        assert_eq!(document.lines[0].content, "VIN 1HGCM82633A004352");
        assert_eq!(
            document.lines[0].bounds.to_flat(),
            [10.0, 20.0, 300.0, 22.0, 299.0, 60.0, 9.0, 58.0]
        );
        assert_eq!(document.lines[0].words.len(), 1);
        assert_eq!(document.objects.len(), 1);
        assert_eq!(document.objects[0].name, "Vehicle registration plate");
        assert_eq!(document.objects[0].bounds.w, 120.0);
    }

    #[test]
    fn maps_report_only_results() {
        let body = r#"{
            "denseCaptionsResult": {"values": [
                {"text": "a white car", "confidence": 0.83, "boundingBox": {"x": 0, "y": 0, "w": 800, "h": 600}},
                {"text": "a license plate", "confidence": 0.64, "boundingBox": {"x": 100, "y": 200, "w": 120, "h": 40}}
            ]},
            "tagsResult": {"values": [
                {"name": "car", "confidence": 0.99},
                {"name": "outdoor", "confidence": 0.87}
            ]},
            "peopleResult": {"values": [
                {"boundingBox": {"x": 600, "y": 100, "w": 80, "h": 300}, "confidence": 0.91}
            ]},
            "smartCropsResult": {"values": [
                {"aspectRatio": 0.9, "boundingBox": {"x": 40, "y": 0, "w": 540, "h": 600}},
                {"aspectRatio": 1.33, "boundingBox": {"x": 0, "y": 0, "w": 798, "h": 600}}
            ]}
        }"#;
        let document = parse_response(StatusCode::OK, body).unwrap();
        assert!(document.is_empty());
        assert_eq!(
            document
                .dense_captions
                .iter()
                .map(|it| it.content.as_str())
                .collect::<Vec<_>>(),
            vec!["a white car", "a license plate"]
        );
        assert_eq!(document.dense_captions[1].bounds.y, 200.0);
        assert_eq!(
            document.tags,
            vec![
                ImageTag {
                    name: "car".to_string(),
                    confidence: 0.99
                },
                ImageTag {
                    name: "outdoor".to_string(),
                    confidence: 0.87
                }
            ]
        );
        assert_eq!(document.people.len(), 1);
        assert_eq!(document.people[0].bounds.h, 300.0);
        assert_eq!(document.crop_suggestions.len(), 2);
        assert_eq!(document.crop_suggestions[1].aspect_ratio, 1.33);
        assert_eq!(document.crop_suggestions[0].bounds.w, 540.0);
    }

    #[test]
    fn service_error_keeps_code_and_message() {
        let body = r#"{"error": {"code": "InvalidRequest", "message": "Image format is not valid."}}"#;
        let error = parse_response(StatusCode::BAD_REQUEST, body).unwrap_err();
        match error {
            Error::AnalysisUnavailable {
                reason,
                code,
                message,
            } => {
                assert_eq!(reason, FailureReason::ServiceError);
                assert_eq!(code.as_deref(), Some("InvalidRequest"));
                assert_eq!(message, "Image format is not valid.");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn service_error_without_json_body() {
        let error = parse_response(StatusCode::UNAUTHORIZED, "denied").unwrap_err();
        assert!(matches!(
            error,
            Error::AnalysisUnavailable {
                reason: FailureReason::ServiceError,
                code: None,
                ..
            }
        ));
        assert!(error.to_string().contains("401"));
    }

    #[test]
    fn malformed_success_body_is_invalid_response() {
        let error = parse_response(StatusCode::OK, "<html>").unwrap_err();
        assert!(matches!(
            error,
            Error::AnalysisUnavailable {
                reason: FailureReason::InvalidResponse,
                ..
            }
        ));
    }

    #[test]
    fn polygon_with_three_points_is_rejected() {
        let body = r#"{"readResult": {"blocks": [{"lines": [
            {"text": "x", "boundingPolygon": [{"x": 0, "y": 0}, {"x": 1, "y": 0}, {"x": 1, "y": 1}]}
        ]}]}}"#;
        assert!(parse_response(StatusCode::OK, body).is_err());
    }

    #[test]
    fn empty_result_is_an_empty_document() {
        let document = parse_response(StatusCode::OK, "{}").unwrap();
        assert!(document.is_empty());
    }

    #[test]
    fn caption_flag_only_sent_with_caption_features() {
        let options = AnalysisOptions::default();
        let query = options.query();
        assert!(query.contains(&("features", "read,objects".to_string())));
        assert!(query.contains(&("api-version", API_VERSION.to_string())));
        assert!(!query.iter().any(|(key, _)| *key == "gender-neutral-caption"));

        let query = options.with_feature(Feature::Caption).query();
        assert!(query.contains(&("features", "read,objects,caption".to_string())));
        assert!(query.contains(&("gender-neutral-caption", "true".to_string())));
    }

    #[test]
    fn crop_ratios_only_sent_with_smart_crops() {
        let options = AnalysisOptions::default().with_crop_aspect_ratios(&[0.9, 1.33]);
        assert!(!options
            .query()
            .iter()
            .any(|(key, _)| *key == "smartcrops-aspect-ratios"));

        let query = options
            .with_feature(Feature::DenseCaptions)
            .with_feature(Feature::Tags)
            .with_feature(Feature::People)
            .with_feature(Feature::SmartCrops)
            .query();
        assert!(query.contains(&(
            "features",
            "read,objects,denseCaptions,tags,people,smartCrops".to_string()
        )));
        assert!(query.contains(&("smartcrops-aspect-ratios", "0.9,1.33".to_string())));
        assert!(query.contains(&("gender-neutral-caption", "true".to_string())));
    }

    #[test]
    fn unreadable_image_is_an_open_error() {
        let config =
            VisionConfig::new(Some("http://127.0.0.1:9".to_string()), Some("key".to_string()))
                .unwrap();
        let client = VisionClient::new(config, AnalysisOptions::default()).unwrap();
        let error = client
            .analyze(Path::new("does/not/exist.png"))
            .unwrap_err();
        assert!(matches!(error, Error::ImageOpen { .. }));
    }
}

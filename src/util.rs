use std::path::{Path, PathBuf};

use geo::{MinimumRotatedRect, Polygon};
use geo_clipper::{Clipper, EndType, JoinType};
use imageproc::point::Point;

use crate::{BoundingPolygon, Error, Result};

const REDACTED_SUFFIX: &str = "-redacted";
const FALLBACK_EXTENSION: &str = "png";

/// Rounds the corners to pixel positions and drops repeated points, so the result never closes on
/// itself. Returns a single point for fully degenerate polygons.
pub(crate) fn to_pixel_points(polygon: &BoundingPolygon) -> Vec<Point<i32>> {
    let mut points: Vec<Point<i32>> = Vec::with_capacity(4);
    for coord in polygon.points {
        let point = Point::new(coord.x.round() as i32, coord.y.round() as i32);
        if points.last() != Some(&point) {
            points.push(point);
        }
    }
    while points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    points
}

fn from_geo_rect(rect: &Polygon<f32>) -> Option<BoundingPolygon> {
    let coords = rect.exterior().0.as_slice();
    if coords.len() < 4 {
        return None;
    }
    Some(BoundingPolygon::new([coords[0], coords[1], coords[2], coords[3]]))
}

/// Grows the polygon outwards by `distance` pixels and returns the smallest rotated rectangle
/// around the grown shape. Falls back to the input when the offset collapses.
pub(crate) fn expand(polygon: &BoundingPolygon, distance: f32) -> BoundingPolygon {
    if distance <= 0.0 {
        return *polygon;
    }
    let grown = polygon
        .to_geo()
        .offset(distance, JoinType::Miter(2.0), EndType::ClosedPolygon, 1.0);
    let expanded = grown
        .minimum_rotated_rect()
        .and_then(|rect| from_geo_rect(&rect));
    match expanded {
        Some(expanded) => expanded,
        None => {
            log::debug!("Offset of {polygon:?} by {distance} collapsed, keeping original bounds");
            *polygon
        }
    }
}

/// `<output_dir>/<stem>-redacted.<ext>`, keeping the source extension. Sources without an
/// extension are written as PNG.
pub fn redacted_file_path(source: &Path, output_dir: &Path) -> Result<PathBuf> {
    let stem = source
        .file_stem()
        .ok_or(Error::ConfigurationMissing("source file name"))?;
    let extension = source
        .extension()
        .unwrap_or_else(|| FALLBACK_EXTENSION.as_ref());
    let mut file_name = stem.to_os_string();
    file_name.push(REDACTED_SUFFIX);
    file_name.push(".");
    file_name.push(extension);
    Ok(output_dir.join(file_name))
}

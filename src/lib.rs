use std::{
    io::{Cursor, Write},
    path::{Path, PathBuf},
};

pub mod config;
mod error;
pub mod matcher;
mod result;
pub mod util;
pub mod vision;

use image::{DynamicImage, ImageBuffer, ImageFormat, Pixel, Rgba, RgbaImage};
use imageproc::{
    drawing::{draw_line_segment_mut, draw_polygon_mut},
    point::Point,
};
use tracing::instrument;
use util::{expand, to_pixel_points};

pub use error::*;
pub use matcher::{MatchPredicate, Normalization};
pub use result::*;

pub const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

pub struct RedactorBuilder {
    fill_color: Rgba<u8>,
    padding: f32,
}

impl RedactorBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill_color(mut self, color: Rgba<u8>) -> Self {
        self.fill_color = color;
        self
    }

    /// Grows every polygon outwards by this many pixels before painting.
    pub fn padding(mut self, padding: f32) -> Self {
        self.padding = padding.max(0.0);
        self
    }

    pub fn build(self) -> Redactor {
        Redactor {
            fill_color: self.fill_color,
            padding: self.padding,
        }
    }
}

impl Default for RedactorBuilder {
    fn default() -> Self {
        Self {
            fill_color: BLACK,
            padding: 0.0,
        }
    }
}

/// Paints polygons over images. Painted pixels are overwritten, not blended.
#[derive(Debug, Clone)]
pub struct Redactor {
    fill_color: Rgba<u8>,
    padding: f32,
}

impl Default for Redactor {
    fn default() -> Self {
        RedactorBuilder::default().build()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RedactionSummary {
    pub destination: PathBuf,
    pub polygons: usize,
    pub width: u32,
    pub height: u32,
}

impl Redactor {
    pub fn fill_color(&self) -> Rgba<u8> {
        self.fill_color
    }

    /// Paints every polygon, interior and boundary, in the image's own color mode.
    #[instrument(level = "debug", skip(self, image, polygons), fields(count = polygons.len()))]
    pub fn redact_image(&self, image: &mut DynamicImage, polygons: &[BoundingPolygon]) {
        let swatch = DynamicImage::ImageRgba8(RgbaImage::from_pixel(1, 1, self.fill_color));
        for polygon in polygons {
            let polygon = expand(polygon, self.padding);
            let points = to_pixel_points(&polygon);
            log::trace!("Painting {points:?}");
            match &mut *image {
                DynamicImage::ImageLuma8(buffer) => {
                    paint(buffer, &points, *swatch.to_luma8().get_pixel(0, 0))
                }
                DynamicImage::ImageLumaA8(buffer) => {
                    paint(buffer, &points, *swatch.to_luma_alpha8().get_pixel(0, 0))
                }
                DynamicImage::ImageRgb8(buffer) => {
                    paint(buffer, &points, *swatch.to_rgb8().get_pixel(0, 0))
                }
                DynamicImage::ImageRgba8(buffer) => paint(buffer, &points, self.fill_color),
                DynamicImage::ImageLuma16(buffer) => {
                    paint(buffer, &points, *swatch.to_luma16().get_pixel(0, 0))
                }
                DynamicImage::ImageLumaA16(buffer) => {
                    paint(buffer, &points, *swatch.to_luma_alpha16().get_pixel(0, 0))
                }
                DynamicImage::ImageRgb16(buffer) => {
                    paint(buffer, &points, *swatch.to_rgb16().get_pixel(0, 0))
                }
                DynamicImage::ImageRgba16(buffer) => {
                    paint(buffer, &points, *swatch.to_rgba16().get_pixel(0, 0))
                }
                DynamicImage::ImageRgb32F(buffer) => {
                    paint(buffer, &points, *swatch.to_rgb32f().get_pixel(0, 0))
                }
                DynamicImage::ImageRgba32F(buffer) => {
                    paint(buffer, &points, *swatch.to_rgba32f().get_pixel(0, 0))
                }
                other => {
                    let mut buffer = other.to_rgba8();
                    paint(&mut buffer, &points, self.fill_color);
                    *other = DynamicImage::ImageRgba8(buffer);
                }
            }
        }
    }

    /// Writes a redacted copy of `source` to `destination`, format taken from the destination's
    /// extension. Nothing is written unless every polygon was painted and the image encoded.
    #[instrument(skip(self, polygons), fields(count = polygons.len()))]
    pub fn redact(
        &self,
        source: &Path,
        polygons: &[BoundingPolygon],
        destination: &Path,
    ) -> Result<RedactionSummary> {
        let open_error = |source_error| Error::ImageOpen {
            path: source.to_path_buf(),
            source: source_error,
        };
        let bytes = std::fs::read(source).map_err(|e| open_error(image::ImageError::IoError(e)))?;
        let source_format = image::guess_format(&bytes).map_err(open_error)?;
        let mut image =
            image::load_from_memory_with_format(&bytes, source_format).map_err(open_error)?;

        let destination_format = ImageFormat::from_path(destination)
            .map_err(|e| Error::image_write(destination, e))?;
        if is_same_file(source, destination) {
            return Err(Error::image_write(
                destination,
                "destination is the source image",
            ));
        }

        let encoded = if polygons.is_empty() && destination_format == source_format {
            log::debug!("No polygons, copying source bytes");
            bytes
        } else {
            self.redact_image(&mut image, polygons);
            let mut encoded = Cursor::new(Vec::new());
            image
                .write_to(&mut encoded, destination_format)
                .map_err(|e| Error::image_write(destination, e))?;
            encoded.into_inner()
        };
        write_atomically(destination, &encoded)?;

        log::debug!(
            "Wrote {} redactions to {}",
            polygons.len(),
            destination.display()
        );
        Ok(RedactionSummary {
            destination: destination.to_path_buf(),
            polygons: polygons.len(),
            width: image.width(),
            height: image.height(),
        })
    }
}

fn paint<P: Pixel + 'static>(
    buffer: &mut ImageBuffer<P, Vec<P::Subpixel>>,
    points: &[Point<i32>],
    color: P,
) {
    match points {
        [] => {}
        [point] => {
            if point.x >= 0
                && point.y >= 0
                && (point.x as u32) < buffer.width()
                && (point.y as u32) < buffer.height()
            {
                buffer.put_pixel(point.x as u32, point.y as u32, color);
            }
        }
        _ => {
            draw_polygon_mut(buffer, points, color);
            for (start, end) in points.iter().zip(points.iter().cycle().skip(1)) {
                draw_line_segment_mut(
                    buffer,
                    (start.x as f32, start.y as f32),
                    (end.x as f32, end.y as f32),
                    color,
                );
            }
        }
    }
}

/// Writes through a temp file next to `destination` and renames it into place.
fn write_atomically(destination: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let write_error = |e: std::io::Error| Error::image_write(destination, e);
    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(write_error)?;
    file.write_all(bytes).map_err(write_error)?;
    file.flush().map_err(write_error)?;
    file.persist(destination).map_err(|e| write_error(e.error))?;
    Ok(())
}

fn is_same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// One image's worth of work: where to read, what to paint, where to write.
#[derive(Debug, Clone)]
pub struct RedactionJob {
    pub source: PathBuf,
    pub polygons: Vec<BoundingPolygon>,
    pub destination: PathBuf,
}

impl RedactionJob {
    pub fn new(
        source: impl Into<PathBuf>,
        polygons: Vec<BoundingPolygon>,
        destination: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: source.into(),
            polygons,
            destination: destination.into(),
        }
    }

    pub fn run(&self, redactor: &Redactor) -> Result<RedactionSummary> {
        redactor.redact(&self.source, &self.polygons, &self.destination)
    }
}

/// Parses `black`, `white`, `#RRGGBB` or `#RRGGBBAA`.
pub fn parse_color(value: &str) -> Result<Rgba<u8>> {
    let invalid = || Error::InvalidColor(value.to_string());
    match value.trim().to_ascii_lowercase().as_str() {
        "black" => Ok(BLACK),
        "white" => Ok(Rgba([255, 255, 255, 255])),
        hex => {
            let hex = hex.strip_prefix('#').ok_or_else(invalid)?;
            if !matches!(hex.len(), 6 | 8) || !hex.is_ascii() {
                return Err(invalid());
            }
            let channel = |i: usize| u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16);
            let alpha = if hex.len() == 8 { channel(3) } else { Ok(255) };
            match (channel(0), channel(1), channel(2), alpha) {
                (Ok(r), Ok(g), Ok(b), Ok(a)) => Ok(Rgba([r, g, b, a])),
                _ => Err(invalid()),
            }
        }
    }
}

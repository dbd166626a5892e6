//! Reassembles a page from its overlapping horizontal tiles.
//!
//! The reader splits every page into bands that overlap vertically. Each band
//! is drawn at x = 0 and y = offset * page height on a surface of the page's
//! intrinsic size, in the order the reader declares them, then the surface is
//! encoded as JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::{RgbImage, imageops};
use log::debug;

use crate::error::{ExportError, Result, TileDefect};
use crate::host::TileImage;

pub const DEFAULT_TILES_PER_PAGE: usize = 3;
pub const MAX_JPEG_QUALITY: u8 = 100;

/// One band of a page.
#[derive(Debug, Clone)]
pub struct TileDescriptor {
    /// Top edge as a fraction of the page height.
    pub vertical_offset_fraction: f32,
    /// `None` while the image is still loading.
    pub image: Option<TileImage>,
}

/// A page as the reader currently renders it.
#[derive(Debug, Clone)]
pub struct PageSpec {
    pub page_number: u32,
    pub width: u32,
    pub height: u32,
    pub tiles: Vec<TileDescriptor>,
}

impl PageSpec {
    /// Checks the tile layout is the one the compositor understands:
    /// exactly `expected_tiles` loaded bands, top to bottom.
    pub fn validate(&self, expected_tiles: usize) -> std::result::Result<(), TileDefect> {
        if self.tiles.len() != expected_tiles {
            return Err(TileDefect::Count {
                expected: expected_tiles,
                found: self.tiles.len(),
            });
        }

        let mut previous = 0.0_f32;
        for (index, tile) in self.tiles.iter().enumerate() {
            let fraction = tile.vertical_offset_fraction;
            if !fraction.is_finite() || !(0.0..=1.0).contains(&fraction) {
                return Err(TileDefect::BadOffset {
                    index,
                    value: fraction.to_string(),
                });
            }
            if fraction < previous {
                return Err(TileDefect::Misordered { index });
            }
            previous = fraction;

            if tile.image.is_none() {
                return Err(TileDefect::NotLoaded { index });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompositeOptions {
    pub expected_tiles: usize,
    pub jpeg_quality: u8,
}

impl Default for CompositeOptions {
    fn default() -> Self {
        Self {
            expected_tiles: DEFAULT_TILES_PER_PAGE,
            jpeg_quality: MAX_JPEG_QUALITY,
        }
    }
}

/// Encoded page ready for the archive.
#[derive(Debug, Clone)]
pub struct CompositedPage {
    pub page_number: u32,
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

/// Draws the tiles of `spec` onto one surface of the page's intrinsic size.
pub fn composite_raster(spec: &PageSpec, expected_tiles: usize) -> Result<RgbImage> {
    spec.validate(expected_tiles)
        .map_err(|defect| ExportError::IncompleteTile {
            page: spec.page_number,
            defect,
        })?;

    if spec.width == 0 || spec.height == 0 {
        return Err(ExportError::host(format!(
            "page {} reports an empty size {}x{}",
            spec.page_number, spec.width, spec.height
        )));
    }

    let mut canvas = RgbImage::new(spec.width, spec.height);
    for (index, tile) in spec.tiles.iter().enumerate() {
        let Some(image) = tile.image.as_ref() else {
            return Err(ExportError::IncompleteTile {
                page: spec.page_number,
                defect: TileDefect::NotLoaded { index },
            });
        };

        let y = (tile.vertical_offset_fraction * spec.height as f32).round() as i64;
        debug!(
            "Page {} tile {index}: {}x{} at y={y}",
            spec.page_number,
            image.width(),
            image.height()
        );
        // Anything past the canvas edges is clipped, as a canvas draw would.
        imageops::replace(&mut canvas, &image.to_rgb8(), 0, y);
    }

    Ok(canvas)
}

/// Composites `spec` and encodes it as JPEG.
pub fn composite_page(spec: &PageSpec, options: &CompositeOptions) -> Result<CompositedPage> {
    let canvas = composite_raster(spec, options.expected_tiles)?;

    let quality = options.jpeg_quality.clamp(1, MAX_JPEG_QUALITY);
    let mut bytes = Vec::new();
    canvas
        .write_with_encoder(JpegEncoder::new_with_quality(&mut bytes, quality))
        .map_err(|source| ExportError::Encode {
            page: spec.page_number,
            source,
        })?;

    Ok(CompositedPage {
        page_number: spec.page_number,
        width: canvas.width(),
        height: canvas.height(),
        bytes,
    })
}

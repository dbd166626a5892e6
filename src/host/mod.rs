//! The reader widget the exporter drives, seen through two narrow traits.
//!
//! `HostReader` is the widget itself: navigation, page count, render
//! notifications. `HostDocument` is the markup it renders into: one container
//! per page, addressed by [`page_container_id`], holding the tile images.

pub mod snapshot;

use std::sync::Arc;

use image::DynamicImage;

use crate::compositor::{PageSpec, TileDescriptor};
use crate::error::{Result, TileDefect};

pub const PAGE_CONTAINER_PREFIX: &str = "content-p";

/// Decoded tile image as handed out by the host.
pub type TileImage = Arc<DynamicImage>;

/// Identifier of the element holding one-based `page`.
#[must_use]
pub fn page_container_id(page: u32) -> String {
    format!("{PAGE_CONTAINER_PREFIX}{page}")
}

/// Inverse of [`page_container_id`].
#[must_use]
pub fn page_from_container_id(id: &str) -> Option<u32> {
    id.strip_prefix(PAGE_CONTAINER_PREFIX)?.parse().ok()
}

/// Navigation side of the reader widget.
pub trait HostReader {
    /// Number of pages in the open comic.
    fn total_pages(&self) -> u32;

    /// Asks the reader to show the zero-based page `index`. Rendering happens
    /// later and may unload pages far from `index`.
    fn move_to(&self, index: u32) -> Result<()>;

    /// Channel of one-based page numbers the reader has finished rendering.
    /// Readers without such a notification return `None` and get polled.
    fn render_events(&self) -> Option<flume::Receiver<u32>> {
        None
    }

    fn title(&self) -> Option<String> {
        None
    }

    /// Suppresses interactions that would disturb navigation (closing the
    /// reader, key and scroll handling) while an export runs.
    fn set_interaction_locked(&self, _locked: bool) {}
}

/// Markup side of the reader widget.
pub trait HostDocument {
    /// Looks up a page container by identifier; `None` when it is not rendered.
    fn query_container(&self, id: &str) -> Option<PageMarkup>;
}

/// A tile element as found in the page container.
#[derive(Debug, Clone)]
pub struct TileElement {
    /// Declared CSS `top` of the tile, e.g. `"33.3333%"`.
    pub top: String,
    /// `None` until the image resource has finished loading.
    pub image: Option<TileImage>,
}

impl TileElement {
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.image.is_some()
    }
}

/// A rendered page container and its metadata.
#[derive(Debug, Clone)]
pub struct PageMarkup {
    /// Intrinsic (source) size, not the on-screen size.
    pub width: u32,
    pub height: u32,
    /// Tiles in the order the reader declares them, top to bottom.
    pub tiles: Vec<TileElement>,
}

impl PageMarkup {
    /// Reads the tile offsets into a [`PageSpec`] for `page`.
    pub fn to_page_spec(&self, page: u32) -> std::result::Result<PageSpec, TileDefect> {
        let tiles = self
            .tiles
            .iter()
            .enumerate()
            .map(|(index, tile)| {
                let fraction =
                    parse_offset_fraction(&tile.top).ok_or_else(|| TileDefect::BadOffset {
                        index,
                        value: tile.top.clone(),
                    })?;
                Ok(TileDescriptor {
                    vertical_offset_fraction: fraction,
                    image: tile.image.clone(),
                })
            })
            .collect::<std::result::Result<Vec<_>, TileDefect>>()?;

        Ok(PageSpec {
            page_number: page,
            width: self.width,
            height: self.height,
            tiles,
        })
    }
}

/// Parses a percentage such as `"66.6667%"` into a fraction in `[0, 1]`.
///
/// `"0"` and `"0px"` are accepted for the first tile, which some reader
/// builds emit without a unit.
#[must_use]
pub fn parse_offset_fraction(value: &str) -> Option<f32> {
    let value = value.trim();
    if value == "0" || value == "0px" {
        return Some(0.0);
    }

    let percent: f32 = value.strip_suffix('%')?.trim().parse().ok()?;
    let fraction = percent / 100.0;
    (fraction.is_finite() && (0.0..=1.0).contains(&fraction)).then_some(fraction)
}

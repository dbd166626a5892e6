//! A reader session captured to disk, replayed as a host reader.
//!
//! The capture directory holds `session.json` and the tile images it points
//! to:
//!
//! ```json
//! {
//!   "title": "Some Comic 1",
//!   "pages": [
//!     { "width": 1200, "height": 1700,
//!       "tiles": [ { "top": "0%", "src": "p1-0.jpg" },
//!                  { "top": "33.3333%", "src": "p1-1.jpg" },
//!                  { "top": "66.6667%", "src": "p1-2.jpg" } ] }
//!   ]
//! }
//! ```
//!
//! Like the live reader, only pages within a window around the current one are
//! rendered; moving elsewhere unloads the rest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use serde::Deserialize;

use super::{HostDocument, HostReader, PageMarkup, TileElement, TileImage, page_from_container_id};
use crate::error::ExportError;

pub const SESSION_FILENAME: &str = "session.json";
/// Pages rendered on each side of the current one.
pub const DEFAULT_RENDER_WINDOW: u32 = 2;
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Deserialize)]
struct SessionFile {
    #[serde(default)]
    title: Option<String>,
    pages: Vec<SessionPage>,
}

#[derive(Debug, Clone, Deserialize)]
struct SessionPage {
    width: u32,
    height: u32,
    tiles: Vec<SessionTile>,
}

#[derive(Debug, Clone, Deserialize)]
struct SessionTile {
    top: String,
    src: PathBuf,
}

#[derive(Default)]
struct RenderState {
    current: Option<u32>,
    /// Decoded tiles of rendered pages, keyed by one-based page number.
    loaded: HashMap<u32, Vec<Option<TileImage>>>,
    /// Rendered pages with a tile that could not be decoded.
    broken: HashMap<u32, String>,
}

pub struct SnapshotReader {
    root: PathBuf,
    session: SessionFile,
    window: u32,
    state: Mutex<RenderState>,
    interaction_locked: AtomicBool,
    events_tx: flume::Sender<u32>,
    events_rx: flume::Receiver<u32>,
}

impl SnapshotReader {
    pub fn open(dir: &Path) -> Result<Self> {
        let session_path = dir.join(SESSION_FILENAME);
        let content = std::fs::read_to_string(&session_path)
            .with_context(|| format!("Failed to read {}", session_path.display()))?;
        let session: SessionFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", session_path.display()))?;

        if session.pages.is_empty() {
            bail!("{} lists no pages", session_path.display());
        }

        info!(
            "Opened reader session {:?} with {} pages",
            session.title.as_deref().unwrap_or("(untitled)"),
            session.pages.len()
        );

        let (events_tx, events_rx) = flume::bounded(EVENT_BUFFER);
        Ok(Self {
            root: dir.to_path_buf(),
            session,
            window: DEFAULT_RENDER_WINDOW,
            state: Mutex::new(RenderState::default()),
            interaction_locked: AtomicBool::new(false),
            events_tx,
            events_rx,
        })
    }

    pub fn with_window(mut self, window: u32) -> Self {
        self.window = window;
        self
    }

    pub fn is_interaction_locked(&self) -> bool {
        self.interaction_locked.load(Ordering::SeqCst)
    }

    fn in_window(&self, current: u32, page: u32) -> bool {
        current.abs_diff(page) <= self.window
    }

    fn lock_state(&self) -> crate::error::Result<std::sync::MutexGuard<'_, RenderState>> {
        self.state
            .lock()
            .map_err(|_| ExportError::host("snapshot render state poisoned"))
    }

    fn load_tile(&self, page: u32, tile: &SessionTile) -> std::result::Result<TileImage, String> {
        let path = self.root.join(&tile.src);
        match image::open(&path) {
            Ok(img) => {
                debug!("Loaded tile {path:?} for page {page}");
                Ok(Arc::new(img))
            }
            Err(e) => {
                warn!("Failed to load tile {path:?} for page {page}: {e}");
                Err(format!("tile {} could not be decoded: {e}", tile.src.display()))
            }
        }
    }

    /// Drops pages outside the window around `current` and returns the ones
    /// inside it that still need decoding.
    fn unload_outside_window(&self, state: &mut RenderState, current: u32) -> Vec<u32> {
        state.loaded.retain(|page, _| self.in_window(current, *page));
        state.broken.retain(|page, _| self.in_window(current, *page));

        let total = self.session.pages.len() as u32;
        let first = current.saturating_sub(self.window).max(1);
        let last = current.saturating_add(self.window).min(total);
        (first..=last)
            .filter(|page| !state.loaded.contains_key(page))
            .collect()
    }

    fn decode_page(&self, page: u32) -> (Vec<Option<TileImage>>, Option<String>) {
        let Some(spec) = self.session.pages.get(page as usize - 1) else {
            return (Vec::new(), None);
        };
        let mut failure = None;
        let tiles = spec
            .tiles
            .iter()
            .map(|tile| match self.load_tile(page, tile) {
                Ok(image) => Some(image),
                Err(e) => {
                    failure.get_or_insert(e);
                    None
                }
            })
            .collect();
        (tiles, failure)
    }
}

impl HostReader for SnapshotReader {
    fn total_pages(&self) -> u32 {
        self.session.pages.len() as u32
    }

    fn move_to(&self, index: u32) -> crate::error::Result<()> {
        let page = index + 1;
        if page > self.total_pages() {
            return Err(ExportError::host(format!(
                "cannot move to index {index}, the session has {} pages",
                self.total_pages()
            )));
        }

        let pending = {
            let mut state = self.lock_state()?;
            state.current = Some(page);
            self.unload_outside_window(&mut state, page)
        };

        // Decoded without holding the lock so container lookups are not blocked.
        let decoded: Vec<_> = pending
            .into_iter()
            .map(|rendered| (rendered, self.decode_page(rendered)))
            .collect();

        let broken = {
            let mut state = self.lock_state()?;
            for (rendered, (tiles, failure)) in &decoded {
                state.loaded.insert(*rendered, tiles.clone());
                if let Some(failure) = failure {
                    state.broken.insert(*rendered, failure.clone());
                }
            }
            state.broken.get(&page).cloned()
        };

        for (rendered, _) in decoded {
            // Readers drop notifications nobody is listening for.
            let _ = self.events_tx.try_send(rendered);
        }

        // The tile would never finish loading, so there is nothing to wait for.
        match broken {
            Some(failure) => Err(ExportError::host(format!("page {page}: {failure}"))),
            None => Ok(()),
        }
    }

    fn render_events(&self) -> Option<flume::Receiver<u32>> {
        Some(self.events_rx.clone())
    }

    fn title(&self) -> Option<String> {
        self.session.title.clone()
    }

    fn set_interaction_locked(&self, locked: bool) {
        debug!("Reader interaction {}", if locked { "locked" } else { "unlocked" });
        self.interaction_locked.store(locked, Ordering::SeqCst);
    }
}

impl HostDocument for SnapshotReader {
    fn query_container(&self, id: &str) -> Option<PageMarkup> {
        let page = page_from_container_id(id)?;
        let spec = self.session.pages.get((page as usize).checked_sub(1)?)?;
        let state = self.state.lock().ok()?;
        let loaded = state.loaded.get(&page)?;

        let tiles = spec
            .tiles
            .iter()
            .zip(loaded)
            .map(|(tile, image)| TileElement {
                top: tile.top.clone(),
                image: image.clone(),
            })
            .collect();

        Some(PageMarkup {
            width: spec.width,
            height: spec.height,
            tiles,
        })
    }
}

//! Scripted collaborators for exercising the export pipeline without a reader.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use image::{DynamicImage, Rgb, RgbImage};

use crate::error::{ExportError, Result};
use crate::export::save::FileSaver;
use crate::export::surface::{ExportSurface, Progress};
use crate::host::{
    HostDocument, HostReader, PageMarkup, TileElement, TileImage, page_from_container_id,
};

pub const PAGE_WIDTH: u32 = 60;
pub const PAGE_HEIGHT: u32 = 90;
/// Each band is a bit taller than a third so neighbours overlap.
pub const TILE_HEIGHT: u32 = 34;
pub const TILE_OFFSETS: [&str; 3] = ["0%", "33.3333%", "66.6667%"];

/// Solid-color tile fixture.
pub fn solid_tile(width: u32, height: u32, color: Rgb<u8>) -> TileImage {
    Arc::new(DynamicImage::ImageRgb8(RgbImage::from_pixel(
        width, height, color,
    )))
}

/// Color of tile `index` on `page`, distinct per page and band.
#[must_use]
pub fn tile_color(page: u32, index: usize) -> Rgb<u8> {
    Rgb([(page * 20 % 256) as u8, (index as u8).wrapping_mul(100), 255 - (page % 256) as u8])
}

/// How the simulated reader renders a page after being moved to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderScript {
    /// Container appears at once; tiles finish loading after this many lookups.
    AfterPolls(u32),
    /// The container never appears.
    Never,
    /// Container appears but its tiles never finish loading.
    Unloaded,
    /// Renders with a different number of tiles.
    TileCount(usize),
    /// Container appears at once; tiles finish loading when
    /// [`SimulatedReader::notify_rendered`] is called for the page.
    WhenNotified,
}

#[derive(Default)]
struct SimState {
    current: Option<u32>,
    lookups: u32,
    notified: HashSet<u32>,
    moves: Vec<u32>,
    lock_history: Vec<bool>,
}

/// Host reader that renders only the current page, following a per-page script.
pub struct SimulatedReader {
    total: u32,
    title: Option<String>,
    default_script: RenderScript,
    scripts: HashMap<u32, RenderScript>,
    events: Option<(flume::Sender<u32>, flume::Receiver<u32>)>,
    state: Mutex<SimState>,
}

impl SimulatedReader {
    pub fn new(total: u32) -> Self {
        Self {
            total,
            title: None,
            default_script: RenderScript::AfterPolls(0),
            scripts: HashMap::new(),
            events: None,
            state: Mutex::new(SimState::default()),
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = Some(title.to_string());
        self
    }

    pub fn with_script(mut self, page: u32, script: RenderScript) -> Self {
        self.scripts.insert(page, script);
        self
    }

    pub fn with_default_script(mut self, script: RenderScript) -> Self {
        self.default_script = script;
        self
    }

    pub fn with_render_events(mut self) -> Self {
        self.events = Some(flume::unbounded());
        self
    }

    /// Zero-based indices passed to `move_to`, in call order.
    pub fn moves(&self) -> Vec<u32> {
        self.state.lock().map(|s| s.moves.clone()).unwrap_or_default()
    }

    /// Container lookups for the current page since the last move.
    pub fn lookups(&self) -> u32 {
        self.state.lock().map(|s| s.lookups).unwrap_or_default()
    }

    /// Marks `page` as rendered without sending a notification.
    pub fn render_without_notice(&self, page: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.notified.insert(page);
        }
    }

    /// Marks `page` as rendered and sends a render notification for it.
    pub fn notify_rendered(&self, page: u32) {
        self.render_without_notice(page);
        if let Some((sender, _)) = &self.events {
            let _ = sender.send(page);
        }
    }

    pub fn lock_history(&self) -> Vec<bool> {
        self.state
            .lock()
            .map(|s| s.lock_history.clone())
            .unwrap_or_default()
    }

    fn script_for(&self, page: u32) -> RenderScript {
        self.scripts
            .get(&page)
            .copied()
            .unwrap_or(self.default_script)
    }

    fn markup(page: u32, tiles: usize, loaded: bool) -> PageMarkup {
        let tiles = (0..tiles)
            .map(|index| TileElement {
                top: TILE_OFFSETS
                    .get(index)
                    .copied()
                    .unwrap_or("100%")
                    .to_string(),
                image: loaded
                    .then(|| solid_tile(PAGE_WIDTH, TILE_HEIGHT, tile_color(page, index))),
            })
            .collect();
        PageMarkup {
            width: PAGE_WIDTH,
            height: PAGE_HEIGHT,
            tiles,
        }
    }
}

impl HostReader for SimulatedReader {
    fn total_pages(&self) -> u32 {
        self.total
    }

    fn move_to(&self, index: u32) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| ExportError::host("simulated reader state poisoned"))?;
        state.current = Some(index + 1);
        state.lookups = 0;
        state.notified.clear();
        state.moves.push(index);

        if let Some((sender, _)) = &self.events {
            if !matches!(
                self.script_for(index + 1),
                RenderScript::Never | RenderScript::WhenNotified
            ) {
                let _ = sender.send(index + 1);
            }
        }
        Ok(())
    }

    fn render_events(&self) -> Option<flume::Receiver<u32>> {
        self.events.as_ref().map(|(_, receiver)| receiver.clone())
    }

    fn title(&self) -> Option<String> {
        self.title.clone()
    }

    fn set_interaction_locked(&self, locked: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.lock_history.push(locked);
        }
    }
}

impl HostDocument for SimulatedReader {
    fn query_container(&self, id: &str) -> Option<PageMarkup> {
        let page = page_from_container_id(id)?;
        let mut state = self.state.lock().ok()?;
        if state.current != Some(page) {
            return None;
        }
        state.lookups += 1;

        match self.script_for(page) {
            RenderScript::AfterPolls(n) => Some(Self::markup(page, 3, state.lookups > n)),
            RenderScript::Never => None,
            RenderScript::Unloaded => Some(Self::markup(page, 3, false)),
            RenderScript::TileCount(count) => Some(Self::markup(page, count, true)),
            RenderScript::WhenNotified => {
                Some(Self::markup(page, 3, state.notified.contains(&page)))
            }
        }
    }
}

/// File-save collaborator that keeps archives in memory.
#[derive(Default)]
pub struct MemorySaver {
    saved: Mutex<Vec<(String, Vec<u8>)>>,
    fail_with: Option<io::ErrorKind>,
}

impl MemorySaver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(kind: io::ErrorKind) -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            fail_with: Some(kind),
        }
    }

    pub fn saved(&self) -> Vec<(String, Vec<u8>)> {
        self.saved.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl FileSaver for MemorySaver {
    fn save(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = PathBuf::from("memory").join(file_name);
        if let Some(kind) = self.fail_with {
            return Err(ExportError::Save {
                path,
                source: io::Error::new(kind, "simulated save failure"),
            });
        }
        if let Ok(mut saved) = self.saved.lock() {
            saved.push((file_name.to_string(), bytes.to_vec()));
        }
        Ok(path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    ControlsLocked(bool),
    Progress(Progress),
    Failure(String),
    ProgressReset,
}

/// User-facing surface that records every call.
#[derive(Default)]
pub struct RecordingSurface {
    events: Mutex<Vec<SurfaceEvent>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SurfaceEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Page percentages in the order they were reported.
    pub fn page_percents(&self) -> Vec<u8> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SurfaceEvent::Progress(Progress::Pages { percent, .. }) => Some(percent),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: SurfaceEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ExportSurface for RecordingSurface {
    fn set_controls_locked(&self, locked: bool) {
        self.push(SurfaceEvent::ControlsLocked(locked));
    }

    fn report_progress(&self, progress: &Progress) {
        self.push(SurfaceEvent::Progress(progress.clone()));
    }

    fn report_failure(&self, error: &ExportError) {
        self.push(SurfaceEvent::Failure(error.to_string()));
    }

    fn reset_progress(&self) {
        self.push(SurfaceEvent::ProgressReset);
    }
}

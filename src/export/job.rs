use log::debug;

use crate::archive::percent;
use crate::error::RangeError;
use crate::export::filename::resolve_archive_name;
use crate::range::{IntervalSet, parse_ranges};

/// What the export form collects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportRequest {
    /// Free-text page ranges, e.g. `1-5, 8, 11-13`. Blank means every page.
    pub pages: String,
    /// The "All" checkbox; overrides `pages`.
    pub all_pages: bool,
    /// Archive name; blank falls back to the comic title.
    pub archive_name: String,
}

/// One export run: which pages, where they go, how far along it is.
#[derive(Debug, Clone)]
pub struct ExportJob {
    intervals: IntervalSet,
    archive_name: String,
    total_pages: u32,
    completed_pages: u32,
}

impl ExportJob {
    pub fn new(intervals: IntervalSet, archive_name: impl Into<String>) -> Self {
        let total_pages = intervals.page_count();
        Self {
            intervals,
            archive_name: archive_name.into(),
            total_pages,
            completed_pages: 0,
        }
    }

    /// Validates the form against a comic of `comic_pages` pages.
    ///
    /// Errors here are shown next to the form and never start a job.
    pub fn from_request(
        request: &ExportRequest,
        comic_pages: u32,
        title: Option<&str>,
    ) -> Result<Self, RangeError> {
        let intervals = if request.all_pages {
            IntervalSet::all(comic_pages)?
        } else {
            parse_ranges(&request.pages, comic_pages)?
        };
        let archive_name = resolve_archive_name(&request.archive_name, title);
        debug!("Export request resolved to pages {intervals} into {archive_name}");
        Ok(Self::new(intervals, archive_name))
    }

    pub fn intervals(&self) -> &IntervalSet {
        &self.intervals
    }

    pub fn archive_name(&self) -> &str {
        &self.archive_name
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn completed_pages(&self) -> u32 {
        self.completed_pages
    }

    /// Rounded share of pages done.
    pub fn percent(&self) -> u8 {
        percent(self.completed_pages as usize, self.total_pages as usize)
    }

    /// Marks one more page done and returns the new percentage.
    pub fn record_page(&mut self) -> u8 {
        self.completed_pages = (self.completed_pages + 1).min(self.total_pages);
        self.percent()
    }
}

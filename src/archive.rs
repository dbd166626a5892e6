use std::io::{Cursor, Write};

use log::{debug, info};
use serde::{Deserialize, Serialize};
use zip::ZipWriter;
use zip::result::ZipResult;
use zip::write::FileOptions;

use crate::compositor::CompositedPage;

/// How page entries are stored in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// JPEG data does not shrink further, so store it as-is.
    #[default]
    Stored,
    Deflated,
}

impl Compression {
    pub fn as_str(&self) -> &'static str {
        match self {
            Compression::Stored => "stored",
            Compression::Deflated => "deflated",
        }
    }

    fn method(self) -> zip::CompressionMethod {
        match self {
            Compression::Stored => zip::CompressionMethod::Stored,
            Compression::Deflated => zip::CompressionMethod::Deflated,
        }
    }
}

/// Archive entry name for a page.
#[must_use]
pub fn entry_name(page: u32) -> String {
    format!("{page}.jpeg")
}

struct ArchiveEntry {
    page: u32,
    name: String,
    bytes: Vec<u8>,
}

/// Collects composited pages and serializes them into one zip.
pub struct ArchiveBuilder {
    compression: Compression,
    entries: Vec<ArchiveEntry>,
}

impl ArchiveBuilder {
    pub fn new(compression: Compression) -> Self {
        Self {
            compression,
            entries: Vec::new(),
        }
    }

    /// Adds `page` under its entry name and returns that name. Adding the same
    /// page twice keeps the newer image in its first position.
    pub fn add(&mut self, page: CompositedPage) -> String {
        let name = entry_name(page.page_number);
        debug!("Adding {name} ({} bytes)", page.bytes.len());

        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|entry| entry.page == page.page_number)
        {
            existing.bytes = page.bytes;
        } else {
            self.entries.push(ArchiveEntry {
                page: page.page_number,
                name: name.clone(),
                bytes: page.bytes,
            });
        }
        name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry names in insertion order.
    pub fn entry_names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.name.clone()).collect()
    }

    /// Writes every entry and returns the finished archive. `on_progress`
    /// receives the share of entries written so far, in percent.
    pub fn finish(self, mut on_progress: impl FnMut(u8)) -> ZipResult<Vec<u8>> {
        let total = self.entries.len();
        let options = FileOptions::default()
            .compression_method(self.compression.method())
            .unix_permissions(0o644);

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        for (idx, entry) in self.entries.into_iter().enumerate() {
            zip.start_file(entry.name.as_str(), options)?;
            zip.write_all(&entry.bytes)?;
            on_progress(percent(idx + 1, total));
        }
        if total == 0 {
            on_progress(100);
        }

        let bytes = zip.finish()?.into_inner();
        info!(
            "Finalized archive with {total} entries, {} bytes ({})",
            bytes.len(),
            self.compression.as_str()
        );
        Ok(bytes)
    }
}

/// `done / total` as a rounded percentage.
#[must_use]
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let share = (done.min(total) as f64 / total as f64) * 100.0;
    share.round() as u8
}

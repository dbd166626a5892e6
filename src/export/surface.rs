use std::io::{self, Write};
use std::path::PathBuf;

use log::{error, info};

use crate::error::ExportError;

/// Progress notifications sent to the user-facing surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// A page was added to the archive.
    Pages {
        completed: u32,
        total: u32,
        percent: u8,
    },
    /// The archive is being written.
    Finalizing { percent: u8 },
    /// The file-save collaborator stored the archive.
    Saved { path: PathBuf },
}

/// The export form and its progress indicator, as far as the pipeline sees it.
pub trait ExportSurface {
    /// Disables (or re-enables) the form while a job holds the reader.
    fn set_controls_locked(&self, locked: bool);

    fn report_progress(&self, progress: &Progress);

    fn report_failure(&self, error: &ExportError);

    fn reset_progress(&self);
}

/// Terminal surface used by the binary: one status line on stderr.
pub struct ConsoleSurface {
    quiet: bool,
}

impl ConsoleSurface {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    fn status(&self, line: &str) {
        if self.quiet {
            return;
        }
        let mut stderr = io::stderr().lock();
        let _ = write!(stderr, "\r\x1b[2K{line}");
        let _ = stderr.flush();
    }
}

impl ExportSurface for ConsoleSurface {
    fn set_controls_locked(&self, locked: bool) {
        info!("Export controls {}", if locked { "locked" } else { "released" });
    }

    fn report_progress(&self, progress: &Progress) {
        match progress {
            Progress::Pages {
                completed,
                total,
                percent,
            } => self.status(&format!("Pages {completed}/{total} ({percent}%)")),
            Progress::Finalizing { percent } => self.status(&format!("Writing archive ({percent}%)")),
            Progress::Saved { path } => {
                info!("Archive saved to {}", path.display());
                self.status(&format!("Saved {}\n", path.display()));
            }
        }
    }

    fn report_failure(&self, err: &ExportError) {
        error!("Export failed: {err}");
        self.status(&format!("Export failed: {err}\n"));
    }

    fn reset_progress(&self) {
        self.status("");
    }
}
